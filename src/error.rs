use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conversation not found")]
    NotFound,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            ChatError::Validation(reason) => {
                warn!("Rejected request: {}", reason);
                (
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    "Invalid request",
                    Some(reason.clone()),
                )
            }
            ChatError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Conversation not found",
                None,
            ),
            ChatError::Unauthorized(reason) => {
                warn!("Unauthorized request: {}", reason);
                (
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "Authentication required",
                    Some(reason.clone()),
                )
            }
            ChatError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "Administrator access required",
                None,
            ),
            ChatError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An error occurred while processing your message.",
                    None,
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: error_code.to_owned(),
                message: message.to_owned(),
                details,
            }),
        )
            .into_response()
    }
}
