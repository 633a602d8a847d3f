//! HTTP receiver for provider push notifications.
//!
//! The provider sends an empty `POST` whose headers carry the channel id,
//! the channel token (our account id), the resource id and the resource
//! state. Anything that parses is answered 200 so the provider does not
//! retry; only internal failures return 500.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use calsync_core::{ResourceState, WebhookHandler, WebhookNotification, WebhookOutcome};
use calsync_domain::constants::WEBHOOK_PATH;
use calsync_domain::CalsyncError;
use serde::Serialize;
use tracing::{error, warn};

pub const CHANNEL_ID_HEADER: &str = "x-goog-channel-id";
pub const CHANNEL_TOKEN_HEADER: &str = "x-goog-channel-token";
pub const RESOURCE_ID_HEADER: &str = "x-goog-resource-id";
pub const RESOURCE_STATE_HEADER: &str = "x-goog-resource-state";

#[derive(Clone)]
pub struct WebhookState {
    pub handler: Arc<WebhookHandler>,
}

/// Router serving `POST /webhooks/calendar`.
pub fn webhook_router(state: WebhookState) -> Router {
    Router::new().route(WEBHOOK_PATH, post(receive_notification)).with_state(state)
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks: Option<usize>,
}

impl WebhookResponse {
    fn from_outcome(outcome: &WebhookOutcome) -> Self {
        let (status, chunks) = match outcome {
            WebhookOutcome::Acknowledged => ("acknowledged", None),
            WebhookOutcome::StaleChannel => ("stale_channel", None),
            WebhookOutcome::UnknownAccount => ("unknown_account", None),
            WebhookOutcome::AlreadyInProgress => ("in_progress", None),
            WebhookOutcome::Processed(summary) => ("processed", Some(summary.chunks)),
        };
        Self { status, chunks }
    }
}

#[derive(Debug)]
enum WebhookError {
    BadRequest(String),
    Internal(CalsyncError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

async fn receive_notification(
    State(state): State<WebhookState>,
    headers: HeaderMap,
) -> Result<Json<WebhookResponse>, WebhookError> {
    let notification = notification_from_headers(&headers).map_err(|err| {
        warn!(error = %err, "rejected webhook delivery");
        WebhookError::BadRequest(err.to_string())
    })?;

    match state.handler.handle(notification).await {
        Ok(outcome) => Ok(Json(WebhookResponse::from_outcome(&outcome))),
        Err(err) => {
            error!(error = %err, "webhook processing failed");
            Err(WebhookError::Internal(err))
        }
    }
}

/// Map the provider's headers onto a notification. Channel id and resource
/// state are required; the token and resource id are optional.
pub fn notification_from_headers(headers: &HeaderMap) -> Result<WebhookNotification, CalsyncError> {
    let channel_id = header_value(headers, CHANNEL_ID_HEADER)?
        .ok_or_else(|| CalsyncError::InvalidInput(format!("missing {CHANNEL_ID_HEADER}")))?;
    let resource_state: ResourceState = header_value(headers, RESOURCE_STATE_HEADER)?
        .ok_or_else(|| CalsyncError::InvalidInput(format!("missing {RESOURCE_STATE_HEADER}")))?
        .parse()?;

    Ok(WebhookNotification {
        channel_id,
        channel_token: header_value(headers, CHANNEL_TOKEN_HEADER)?,
        resource_id: header_value(headers, RESOURCE_ID_HEADER)?,
        resource_state,
    })
}

/// Trimmed header value; blank counts as absent.
fn header_value(headers: &HeaderMap, name: &str) -> Result<Option<String>, CalsyncError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| CalsyncError::InvalidInput(format!("{name} is not valid ASCII")))?
        .trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}
