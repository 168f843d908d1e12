use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, instrument};

use crate::db;
use crate::eligibility::{self, Eligibility, EligibilityRejection};
use crate::error::AppError;
use crate::models::{LevelEnrollment, OrderStatus};

#[derive(Debug, Clone, Serialize)]
pub struct ItemRejection {
    pub order_item_id: i64,
    pub worker_id: i64,
    pub course_level_id: i64,
    pub rejection: EligibilityRejection,
}

#[derive(Debug, Clone)]
pub enum ActivationOutcome {
    Activated(Vec<LevelEnrollment>),
    /// The order was already paid; activation is idempotent and returns the
    /// enrollments created the first time.
    AlreadyActivated(Vec<LevelEnrollment>),
    /// At least one item failed eligibility re-validation. Nothing was
    /// written: no enrollments exist and the order stays pending.
    Rejected(Vec<ItemRejection>),
}

/// Turns a paid order into ACTIVE enrollments, one per item, with deadlines
/// computed from each level's completion window. Eligibility is re-validated
/// per item at activation time; the whole order activates or none of it does.
/// Runs on the caller's transaction connection.
#[instrument(skip(conn))]
pub async fn activate_order(
    conn: &mut SqliteConnection,
    order_id: i64,
) -> Result<ActivationOutcome, AppError> {
    let order = db::get_order(&mut *conn, order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;

    match order.status {
        OrderStatus::Paid => {
            info!("Order already activated, returning existing enrollments");
            let enrollments = db::enrollments_for_order(&mut *conn, order.id).await?;
            return Ok(ActivationOutcome::AlreadyActivated(enrollments));
        }
        OrderStatus::Cancelled => {
            return Err(AppError::Validation(format!(
                "Order {} is cancelled and cannot be activated",
                order.id
            )));
        }
        OrderStatus::Pending => {}
    }

    let items = db::get_order_items(&mut *conn, order.id).await?;
    if items.is_empty() {
        return Err(AppError::Validation(format!(
            "Order {} has no items to activate",
            order.id
        )));
    }

    // Re-validate every item before writing anything: time has passed since
    // the order was placed, and a single ineligible item sinks the order.
    let mut rejections = Vec::new();
    let mut eligible = Vec::new();
    for item in &items {
        match eligibility::check_eligibility(&mut *conn, item.worker_id, item.course_level_id)
            .await?
        {
            Eligibility::Eligible => {
                let level = db::get_course_level(&mut *conn, item.course_level_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "Course level {} passed eligibility but does not exist",
                            item.course_level_id
                        ))
                    })?;
                eligible.push((item, level));
            }
            Eligibility::Rejected(rejection) => rejections.push(ItemRejection {
                order_item_id: item.id,
                worker_id: item.worker_id,
                course_level_id: item.course_level_id,
                rejection,
            }),
        }
    }

    if !rejections.is_empty() {
        info!(
            rejected = rejections.len(),
            total = items.len(),
            "Order activation rejected, leaving order pending"
        );
        return Ok(ActivationOutcome::Rejected(rejections));
    }

    let now = Utc::now();
    let mut enrollments = Vec::new();
    for (item, level) in eligible {
        let deadline = now + Duration::days(level.completion_window_days);
        let enrollment =
            db::create_enrollment(&mut *conn, item.worker_id, level.id, Some(order.id), now, deadline)
                .await?;
        enrollments.push(enrollment);
    }

    db::mark_order_paid(&mut *conn, order.id, now).await?;

    info!(
        enrollments = enrollments.len(),
        "Order activated, enrollments created"
    );
    Ok(ActivationOutcome::Activated(enrollments))
}
