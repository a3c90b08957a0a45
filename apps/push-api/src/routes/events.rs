//! Event submission: the HTTP face of the push service.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody};
use crate::push::event::{EventFields, RawEvent};
use crate::push::service::PushResult;
use crate::AppState;

use super::subscriptions::validate_event_type;

pub fn router() -> Router<AppState> {
    Router::new().route("/events", post(push_event))
}

// ---------------------------------------------------------------------------
// POST /api/v1/events
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct PushEventRequest {
    /// Event type name, e.g. `addPersonEvent`.
    pub event: String,
    /// Event fields, encoded in the order given.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub fields: EventFields,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PushResponse {
    pub attempted: usize,
    pub succeeded: usize,
    /// Subscriber id to failure reason.
    pub failures: BTreeMap<String, String>,
}

impl From<PushResult> for PushResponse {
    fn from(result: PushResult) -> Self {
        Self {
            attempted: result.attempted,
            succeeded: result.succeeded,
            failures: result
                .failures
                .into_iter()
                .map(|(subscriber, failure)| (subscriber.to_string(), failure.to_string()))
                .collect(),
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "Events",
    request_body = PushEventRequest,
    responses(
        (status = 200, description = "Push attempted; per-subscriber failures are listed", body = PushResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 422, description = "Event cannot be encoded", body = ApiErrorBody),
        (status = 503, description = "Subscriptions unavailable", body = ApiErrorBody),
    ),
)]
pub async fn push_event(
    State(state): State<AppState>,
    Json(body): Json<PushEventRequest>,
) -> Result<Json<PushResponse>, ApiError> {
    let event_type = validate_event_type(&body.event)?;
    let event = RawEvent::new(event_type, body.fields);

    let result = state.push.push(&event).await?;
    Ok(Json(result.into()))
}
