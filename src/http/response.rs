//! API responses and error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::QueueError;

/// Plain `{"message": ...}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

impl MessageBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors a handler can surface to the client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The batch was refused by the `drop_newest` overflow policy.
    #[error("ingestion queue is full, batch dropped")]
    QueueFull,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::QueueFull | ApiError::Queue(QueueError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(MessageBody::new(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status() {
        assert_eq!(ApiError::QueueFull.status(), StatusCode::SERVICE_UNAVAILABLE);
        let err = ApiError::from(QueueError::Closed);
        assert_eq!(err.to_string(), "ingestion queue is closed");
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
