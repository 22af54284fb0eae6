#[macro_use]
extern crate rocket;

mod ai;
mod api;
mod auth;
mod content;
mod db;
mod entitlement;
mod env;
mod error;
mod models;
mod progress;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use ai::GeminiClient;
use api::{
    AppConfig, api_activate_premium, api_ai_generate, api_batch_update_progress,
    api_current_user, api_current_user_unauthorized, api_generate_activation_code,
    api_get_content, api_get_progress, api_get_subjects, api_list_content, api_login,
    api_logout, api_progress_stats, api_register, api_revoke_premium, api_test_api_key,
    api_update_progress, api_usage_stats, health,
};
use auth::unauthorized_api;
use content::ContentLibrary;
use db::clean_expired_sessions;
use error::AppError;
use rocket::{Build, Rocket, tokio};
use telemetry::TelemetryFairing;
use telemetry::init_tracing;
use thiserror::Error;

use sqlx::SqlitePool;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

#[launch]
async fn rocket() -> _ {
    if let Err(e) = env::load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    init_tracing();

    let pool = SqlitePool::connect(&env::database_url())
        .await
        .expect("Failed to connect to SQLite database");

    let pool_clone = pool.clone();

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
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

    let library = ContentLibrary::load(&pool)
        .await
        .expect("Failed to load learning content");

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
    if gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY is not set; AI generation will be unavailable");
    }

    let config = AppConfig {
        admin_key: std::env::var("ADMIN_KEY").unwrap_or_default(),
    };
    if config.admin_key.is_empty() {
        warn!("ADMIN_KEY is not set; admin endpoints will reject all requests");
    }

    init_rocket(pool, library, GeminiClient::new(gemini_api_key), config).await
}

pub async fn init_rocket(
    pool: SqlitePool,
    library: ContentLibrary,
    client: GeminiClient,
    config: AppConfig,
) -> Rocket<Build> {
    info!("Starting study app");

    rocket::build()
        .manage(pool)
        .manage(library)
        .manage(client)
        .manage(config)
        .mount(
            "/api",
            routes![
                api_login,
                api_register,
                api_logout,
                api_current_user,
                api_current_user_unauthorized,
                api_list_content,
                api_get_subjects,
                api_get_content,
                api_progress_stats,
                api_get_progress,
                api_update_progress,
                api_batch_update_progress,
                api_ai_generate,
                api_test_api_key,
                api_activate_premium,
                api_generate_activation_code,
                api_usage_stats,
                api_revoke_premium,
            ],
        )
        .register("/api", catchers![unauthorized_api])
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
}
