pub mod channels;
pub mod events;
pub mod health;
pub mod subscriptions;

use std::path::Path;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest(
            "/api/v1",
            channels::router()
                .merge(subscriptions::router())
                .merge(events::router()),
        )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Channels
        channels::open_channel,
        // Subscriptions
        subscriptions::subscribe,
        subscriptions::unsubscribe,
        subscriptions::keep_alive,
        // Events
        events::push_event,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Route request/response types
            health::HealthResponse,
            channels::OpenChannelRequest,
            channels::OpenChannelResponse,
            subscriptions::SubscribeRequest,
            subscriptions::SubscriptionResponse,
            subscriptions::KeepAliveResponse,
            events::PushEventRequest,
            events::PushResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Channels", description = "Channel token issuance"),
        (name = "Subscriptions", description = "Interest registration"),
        (name = "Events", description = "Event dispatch"),
    )
)]
pub struct ApiDoc;

/// Render the OpenAPI document as pretty JSON at `out`, creating parent directories.
pub fn write_openapi(out: &Path) -> std::io::Result<()> {
    let document = ApiDoc::openapi()
        .to_pretty_json()
        .map_err(std::io::Error::other)?;
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, document)
}
