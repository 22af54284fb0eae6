use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::{ContentType, Status};
use rocket::response::Responder;
use serde_json::json;
use std::io::Cursor;
use thiserror::Error;
use tracing::{Span, error, warn};

use crate::ai::ProviderError;

/// Free-tier monthly allowance for the AI generation endpoint.
pub const FREE_USAGE_LIMIT: i64 = 30;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Monthly free usage limit exceeded ({usage_count}/{FREE_USAGE_LIMIT})")]
    QuotaExceeded { usage_count: i64 },

    #[error("AI provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let is_valid_span = !current_span.is_none();

        let message = self.to_string();
        let error_kind = match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error");
                "database_error"
            }
            AppError::Authentication(msg) => {
                warn!(message = %msg, context = %ctx, "Authentication error");
                "authentication_error"
            }
            AppError::Authorization(msg) => {
                warn!(message = %msg, context = %ctx, "Authorization error");
                "authorization_error"
            }
            AppError::NotFound(msg) => {
                warn!(message = %msg, context = %ctx, "Not found error");
                "not_found_error"
            }
            AppError::Validation(msg) => {
                warn!(message = %msg, context = %ctx, "Validation error");
                "validation_error"
            }
            AppError::QuotaExceeded { usage_count } => {
                warn!(usage_count = %usage_count, context = %ctx, "Usage quota exceeded");
                "quota_exceeded"
            }
            AppError::Provider(err) => {
                error!(provider_error = %err, context = %ctx, "AI provider error");
                "provider_error"
            }
            AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal server error");
                "internal_error"
            }
        };

        if is_valid_span {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(error_kind));
            current_span.record("error.message", tracing::field::display(&message));

            match self {
                AppError::Database(_) | AppError::Internal(_) | AppError::Provider(_) => {
                    current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
                }
                _ => {}
            }
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_) => Status::InternalServerError,
            AppError::Authentication(_) => Status::Unauthorized,
            AppError::Authorization(_) => Status::Forbidden,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Validation(_) => Status::BadRequest,
            AppError::QuotaExceeded { .. } => Status::TooManyRequests,
            AppError::Provider(err) => match err {
                ProviderError::InvalidApiKey(_) => Status::BadRequest,
                ProviderError::QuotaExceeded(_) => Status::TooManyRequests,
                ProviderError::SafetyRejected(_) => Status::BadRequest,
                ProviderError::PermissionDenied(_) => Status::BadRequest,
                ProviderError::EmptyResponse => Status::InternalServerError,
                ProviderError::Transport(_) => Status::InternalServerError,
                ProviderError::Unknown(_) => Status::InternalServerError,
            },
            AppError::Internal(_) => Status::InternalServerError,
        }
    }

    /// Message for the JSON error body. Database and internal failures never
    /// leak their technical details to the client.
    fn user_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn to_status_with_log(&self, context: &str) -> Status {
        self.log_and_record(context);
        self.status_code()
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let status = self.to_status_with_log(&format!("Request to {} {}", req.method(), req.uri()));

        let body = match &self {
            AppError::QuotaExceeded { usage_count } => json!({
                "success": false,
                "error": "USAGE_LIMIT_EXCEEDED",
                "message": format!(
                    "Monthly free usage limit exceeded. Current usage: {}/{}",
                    usage_count, FREE_USAGE_LIMIT
                ),
                "usage_count": usage_count,
                "usage_limit": FREE_USAGE_LIMIT,
            }),
            other => json!({
                "success": false,
                "error": other.user_message(),
            }),
        };

        let payload = body.to_string();
        rocket::Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(payload.len(), Cursor::new(payload))
            .ok()
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Cryptography error: {}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {}", error))
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.to_status_with_log("Error conversion into Status")
    }
}
