//! Channel token issuance.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

use super::subscriptions::validate_subscriber;

pub fn router() -> Router<AppState> {
    Router::new().route("/channels", post(open_channel))
}

// ---------------------------------------------------------------------------
// POST /api/v1/channels
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenChannelRequest {
    pub subscriber: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OpenChannelResponse {
    pub subscriber: String,
    /// Pass as `?token=` when connecting to `/channel`.
    pub token: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/channels",
    tag = "Channels",
    request_body = OpenChannelRequest,
    responses(
        (status = 201, description = "Channel token issued", body = OpenChannelResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 502, description = "Transport refused the channel", body = ApiErrorBody),
    ),
)]
pub async fn open_channel(
    State(state): State<AppState>,
    Json(body): Json<OpenChannelRequest>,
) -> Result<(StatusCode, Json<OpenChannelResponse>), ApiError> {
    let subscriber = validate_subscriber(&body.subscriber)?;
    let token = state.registrar.open(&subscriber).await?;

    Ok((
        StatusCode::CREATED,
        Json(OpenChannelResponse {
            subscriber: subscriber.to_string(),
            token: token.to_string(),
        }),
    ))
}
