//! Control listener: configuration refresh

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use crate::api::state::ControlState;

fn refresh_failed(error: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "status": "error",
            "note": "Oops something went wrong.\nPlease contact the administrator",
            "error_msg": error.to_string(),
        })),
    )
}

/// POST /config/refresh
///
/// Reloads the configuration and swaps it into every running side. On failure
/// the previous schedule stays active.
#[instrument(skip(control))]
pub async fn refresh(State(control): State<ControlState>) -> impl IntoResponse {
    let targets = match control.source.load(&control.client).await {
        Ok(targets) => targets,
        Err(e) => {
            error!("configuration refresh failed: {e}");
            return refresh_failed(e);
        }
    };

    let count = targets.len();

    if let Some(state) = &control.state {
        if let Err(e) = state.replace_schedule(targets.clone()).await {
            error!("state owner rejected the new schedule: {e:#}");
            return refresh_failed(format!("{e:#}"));
        }
    }

    if let Some(scheduler) = &control.scheduler {
        if let Err(e) = scheduler.replace_targets(targets).await {
            error!("probe scheduler rejected the new targets: {e:#}");
            return refresh_failed(format!("{e:#}"));
        }
    }

    info!("configuration refreshed with {count} targets");
    (StatusCode::OK, Json(json!({ "status": "success" })))
}

/// Every other path of the control listener
pub async fn not_public() -> (StatusCode, &'static str) {
    (
        StatusCode::BAD_REQUEST,
        "This endpoint is not for public consumption\n",
    )
}
