//! Interest registration and keep-alive for subscribers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::push::event::{EventType, SubscriberId};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/subscribers/{id}/subscriptions/{event_type}",
            put(subscribe).delete(unsubscribe),
        )
        .route("/subscribers/{id}/keep-alive", post(keep_alive))
}

/// Subscriber ids are opaque but must be non-blank and free of whitespace.
pub(crate) fn validate_subscriber(raw: &str) -> Result<SubscriberId, ApiError> {
    let mut errors = Vec::new();
    if raw.trim().is_empty() {
        errors.push(FieldError::new("subscriber", "must not be blank"));
    } else if raw.chars().any(char::is_whitespace) {
        errors.push(FieldError::new("subscriber", "must not contain whitespace"));
    } else if raw.len() > 256 {
        errors.push(FieldError::new("subscriber", "must be at most 256 characters"));
    }

    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }
    Ok(SubscriberId::new(raw))
}

pub(crate) fn validate_event_type(raw: &str) -> Result<EventType, ApiError> {
    Ok(EventType::parse(raw)?)
}

// ---------------------------------------------------------------------------
// PUT /api/v1/subscribers/:id/subscriptions/:event_type
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    /// Minutes until the subscription lapses. Defaults to the server TTL.
    pub ttl_minutes: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionResponse {
    pub subscriber: String,
    pub event_type: String,
    pub expires_at: DateTime<Utc>,
}

#[utoipa::path(
    put,
    path = "/api/v1/subscribers/{id}/subscriptions/{event_type}",
    tag = "Subscriptions",
    params(
        ("id" = String, Path, description = "Subscriber id"),
        ("event_type" = String, Path, description = "Event type name"),
    ),
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Subscription registered or refreshed", body = SubscriptionResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 503, description = "Subscriptions unavailable", body = ApiErrorBody),
    ),
)]
pub async fn subscribe(
    State(state): State<AppState>,
    Path((id, event_type)): Path<(String, String)>,
    body: Option<Json<SubscribeRequest>>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscriber = validate_subscriber(&id)?;
    let event_type = validate_event_type(&event_type)?;
    let ttl_minutes = body
        .and_then(|Json(body)| body.ttl_minutes)
        .unwrap_or_else(|| state.registrar.default_ttl_minutes());

    let subscription = state
        .registrar
        .register_interest(&subscriber, &event_type, ttl_minutes)
        .await?;

    Ok(Json(SubscriptionResponse {
        subscriber: subscription.subscriber.to_string(),
        event_type: subscription.event_type.to_string(),
        expires_at: subscription.expires_at,
    }))
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/subscribers/:id/subscriptions/:event_type
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/api/v1/subscribers/{id}/subscriptions/{event_type}",
    tag = "Subscriptions",
    params(
        ("id" = String, Path, description = "Subscriber id"),
        ("event_type" = String, Path, description = "Event type name"),
    ),
    responses(
        (status = 204, description = "Subscription removed, or was never present"),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 503, description = "Subscriptions unavailable", body = ApiErrorBody),
    ),
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path((id, event_type)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let subscriber = validate_subscriber(&id)?;
    let event_type = validate_event_type(&event_type)?;

    state
        .registrar
        .remove_interest(&subscriber, &event_type)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// POST /api/v1/subscribers/:id/keep-alive
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct KeepAliveResponse {
    /// Live subscriptions extended by the server TTL.
    pub refreshed: usize,
}

#[utoipa::path(
    post,
    path = "/api/v1/subscribers/{id}/keep-alive",
    tag = "Subscriptions",
    params(("id" = String, Path, description = "Subscriber id")),
    responses(
        (status = 200, description = "Live subscriptions refreshed", body = KeepAliveResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 503, description = "Subscriptions unavailable", body = ApiErrorBody),
    ),
)]
pub async fn keep_alive(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<KeepAliveResponse>, ApiError> {
    let subscriber = validate_subscriber(&id)?;
    let refreshed = state.registrar.keep_alive(&subscriber).await?;
    Ok(Json(KeepAliveResponse { refreshed }))
}
