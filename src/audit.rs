use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{instrument, warn};

/// Fire-and-forget audit sink. Writes after the primary operation has
/// committed; a failed write is logged and swallowed so it can never abort
/// or roll back the operation it describes.
#[instrument(skip(pool, details))]
pub async fn record(
    pool: &SqlitePool,
    actor_id: Option<i64>,
    action: &str,
    entity_type: &str,
    entity_id: i64,
    details: serde_json::Value,
) {
    let result = sqlx::query(
        "INSERT INTO audit_log (actor_id, action, entity_type, entity_id, details, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(actor_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(details.to_string())
    .bind(Utc::now())
    .execute(pool)
    .await;

    if let Err(err) = result {
        warn!(
            action = %action,
            entity_type = %entity_type,
            entity_id,
            error = %err,
            "Failed to write audit entry"
        );
    }
}
