//! Webhook receiving events from the WhatsApp bridge.
//!
//! The bridge POSTs every session and message event to `/events` as JSON.
//! Accepted events are queued for the dispatcher; the response is sent
//! before the event is processed.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::gateway::GatewayEvent;

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "x-bridge-secret";

#[derive(Clone)]
struct WebhookState {
    events: mpsc::UnboundedSender<GatewayEvent>,
    secret: Option<Arc<str>>,
}

/// Serve the webhook until `shutdown` resolves.
pub async fn serve<S>(
    listener: TcpListener,
    secret: Option<String>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    shutdown: S,
) -> anyhow::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let address = listener.local_addr()?;

    if secret.is_some() {
        info!("Webhook secret configured");
    }
    let app = router(events, secret);

    info!("📡 Listening for bridge events on {}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Webhook server stopped");
    Ok(())
}

fn router(events: mpsc::UnboundedSender<GatewayEvent>, secret: Option<String>) -> Router {
    let state = WebhookState {
        events,
        secret: secret.map(Arc::from),
    };

    Router::new()
        .route("/events", post(receive_event))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

/// The body is only parsed once the caller is authorized.
async fn receive_event(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !authorized(&headers, state.secret.as_deref()) {
        warn!("Rejected bridge event with a missing or wrong secret");
        return StatusCode::UNAUTHORIZED;
    }

    let event: GatewayEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Malformed bridge event: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    match state.events.send(event) {
        Ok(()) => StatusCode::ACCEPTED,
        // The dispatcher is gone (shutting down)
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    match secret {
        None => true,
        Some(expected) => headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|given| given == expected),
    }
}
