#[macro_use]
extern crate rocket;

mod api;
mod audit;
mod auth;
mod certificate;
mod db;
mod eligibility;
mod env;
mod error;
mod models;
mod orders;
mod progress;
mod quiz;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use api::{
    api_activate_order, api_check_eligibility, api_get_certificate, api_get_progress,
    api_submit_progress, health,
};
use auth::{forbidden_api, unauthorized_api};
use rocket::{Build, Rocket, tokio};
use telemetry::{TelemetryFairing, init_tracing};

use sqlx::SqlitePool;
use tracing::{error, info};

#[launch]
async fn rocket() -> _ {
    if let Err(err) = env::load_environment() {
        eprintln!("Failed to load environment files: {}", err);
    }

    init_tracing();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_default();

    let pool = SqlitePool::connect(&database_url)
        .await
        .expect("Failed to connect to SQLite database");

    let pool_clone = pool.clone();

    // Lazy check-on-access is the source of truth for expiry; this sweep
    // just keeps enrollments nobody touches from lingering as ACTIVE.
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match db::expire_overdue_enrollments(&pool_clone, chrono::Utc::now()).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Expired {} overdue enrollments", count);
                    }
                }
                Err(e) => {
                    error!("Failed to expire overdue enrollments: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
        }
    });

    info!("Running database migrations...");
    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            error!("Failed to run migrations: {}", e);
            panic!("Database migration failed: {}", e);
        }
    }

    init_rocket(pool).await
}

pub async fn init_rocket(pool: SqlitePool) -> Rocket<Build> {
    info!("Starting certification tracker");

    rocket::build()
        .manage(pool)
        .mount(
            "/api",
            routes![
                api_check_eligibility,
                api_activate_order,
                api_get_progress,
                api_submit_progress,
                api_get_certificate,
                health,
            ],
        )
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .attach(TelemetryFairing)
}
