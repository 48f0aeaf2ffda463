//! On-demand probes of arbitrary pages

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
};
use serde::Deserialize;
use tracing::instrument;

use crate::ProbeResult;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::IngressState;
use crate::probe::trace::ProbeContext;

#[derive(Debug, Default, Deserialize)]
pub struct ProbeRequest {
    pub page: Option<String>,
}

fn requested_page(query: ProbeRequest, body: &[u8]) -> ApiResult<String> {
    if let Some(page) = query.page.filter(|page| !page.trim().is_empty()) {
        return Ok(page);
    }

    let request: ProbeRequest = if body.is_empty() {
        ProbeRequest::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| ApiError::InvalidRequest(format!("undecodable probe request: {e}")))?
    };

    request
        .page
        .filter(|page| !page.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("missing page to probe".to_string()))
}

/// GET|POST /probe
///
/// The page comes from the `page` query parameter or a `{"page": ...}` body.
#[instrument(skip(state, query, body))]
pub async fn probe(
    State(state): State<IngressState>,
    Query(query): Query<ProbeRequest>,
    body: Bytes,
) -> ApiResult<Json<ProbeResult>> {
    let page = requested_page(query, &body)?;

    let pool = state
        .pool
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("probing is disabled".to_string()))?;

    let result = pool.probe(&page, ProbeContext::ad_hoc(&page)).await;
    Ok(Json(result))
}
