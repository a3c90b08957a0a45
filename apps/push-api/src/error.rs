use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::push::event::EventType;
use crate::push::transport::TransportFailure;

/// Errors produced by the subscription and dispatch core.
///
/// Per-recipient delivery problems are not represented here: they are
/// collected as [`TransportFailure`] entries inside a `PushResult`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// The backing store is unreachable, erroring, timed out, or holds a
    /// record that cannot be parsed.
    #[error("subscriptions repository unavailable: {0}")]
    RepositoryUnavailable(String),
    /// The selected encoder has no schema for this event type.
    #[error("unsupported event type: {0}")]
    UnsupportedEventType(EventType),
    /// A caller-supplied event type name is blank or malformed.
    #[error("invalid event type: {0}")]
    InvalidEventType(String),
    /// A TTL or configuration value is missing or out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The event cannot be shaped into the requested encoding.
    #[error("encoding failed: {0}")]
    Encoding(String),
    /// The transport refused to open a channel.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportFailure),
}

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<Vec<FieldError>>,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "BAD_GATEWAY", message)
    }

    pub fn validation(details: Vec<FieldError>) -> Self {
        Self {
            details: Some(details),
            ..Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Validation failed")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PushError> for ApiError {
    fn from(err: PushError) -> Self {
        match err {
            PushError::RepositoryUnavailable(reason) => {
                tracing::error!(%reason, "subscriptions repository unavailable");
                Self::service_unavailable("Subscriptions are temporarily unavailable")
            }
            PushError::UnsupportedEventType(event_type) => {
                tracing::warn!(%event_type, "push rejected: unsupported event type");
                Self::unprocessable(format!("Unsupported event type: {event_type}"))
            }
            PushError::InvalidEventType(reason) => {
                tracing::debug!(%reason, "invalid event type in request");
                Self::validation(vec![FieldError::new("event_type", reason)])
            }
            PushError::InvalidConfiguration(reason) => {
                tracing::debug!(%reason, "invalid configuration in request");
                Self::bad_request(reason)
            }
            PushError::Encoding(reason) => {
                tracing::warn!(%reason, "push rejected: encoding failed");
                Self::unprocessable(reason)
            }
            PushError::Transport(failure) => {
                tracing::error!(%failure, "transport refused channel");
                Self::bad_gateway("Channel could not be opened")
            }
        }
    }
}
