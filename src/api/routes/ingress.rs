//! Push ingress: webhooks and inbound mail

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::actors::messages::PushKind;
use crate::actors::state::StateHandle;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::IngressState;
use crate::config::Target;
use crate::util::parse_timestamp;
use crate::{Event, StatusUpdate};

/// Inbound mail as posted by the mail relay (JSON normalised format)
#[derive(Debug, Deserialize)]
pub struct InboundEmail {
    #[serde(default)]
    pub headers: EmailHeaders,

    pub envelope: EmailEnvelope,

    #[serde(default)]
    pub plain: String,

    #[serde(default)]
    pub html: String,

    #[serde(default)]
    pub reply_plain: Option<String>,

    #[serde(default)]
    pub attachments: Vec<EmailAttachment>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmailHeaders {
    pub date: Option<String>,
    pub from: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmailEnvelope {
    /// Sender address, matched against the email hook addresses
    pub from: String,

    #[serde(default)]
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailAttachment {
    #[serde(default)]
    pub file_name: String,

    #[serde(default)]
    pub content_type: String,

    #[serde(default)]
    pub size: u64,
}

impl InboundEmail {
    fn into_update(self, target: &Target) -> StatusUpdate {
        let published_at = self
            .headers
            .date
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        let message = if self.html.trim().is_empty() {
            self.plain.clone()
        } else {
            self.html
        };

        StatusUpdate::for_target(target, message, self.plain, published_at)
    }
}

/// GET /
pub async fn welcome() -> &'static str {
    "Welcome to Status Sentry"
}

fn owner(state: &IngressState) -> ApiResult<&StateHandle> {
    state
        .state
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("status checks are disabled".to_string()))
}

async fn forward(state: &IngressState, update: StatusUpdate) -> ApiResult<StatusCode> {
    state
        .events
        .send(Event::status(update))
        .await
        .map_err(|_| ApiError::Unavailable("event dispatch has stopped".to_string()))?;

    Ok(StatusCode::ACCEPTED)
}

/// POST /webhook/:service
///
/// The body is forwarded verbatim as the status message of `service`.
#[instrument(skip(state, body))]
pub async fn webhook(
    State(state): State<IngressState>,
    Path(service): Path<String>,
    body: String,
) -> ApiResult<StatusCode> {
    let target = owner(&state)?
        .validate(PushKind::Webhook, &service)
        .await?
        .ok_or_else(|| {
            debug!("update received for unknown service");
            ApiError::NotFound(format!("no webhook target named '{service}'"))
        })?;

    let update = StatusUpdate::for_target(&target, body.clone(), body, Utc::now());
    forward(&state, update).await
}

/// POST /email
#[instrument(skip(state, body))]
pub async fn email(State(state): State<IngressState>, body: Bytes) -> ApiResult<StatusCode> {
    let email: InboundEmail = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidRequest(format!("undecodable email payload: {e}")))?;

    let sender = email.envelope.from.clone();
    let target = owner(&state)?
        .validate(PushKind::Email, &sender)
        .await?
        .ok_or_else(|| {
            debug!("mail from {sender} matches no target");
            ApiError::NotFound(format!("no email target for '{sender}'"))
        })?;

    forward(&state, email.into_update(&target)).await
}
