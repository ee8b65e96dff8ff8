//! Operator command endpoints.

use std::sync::Arc;

use axum::{extract::Query, Extension, Json};
use pbxwatch_monitor::HangupReceipt;
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::middleware::TenantContext;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangupParams {
    #[serde(default)]
    pub call_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PauseParams {
    #[serde(default)]
    pub agent: String,
}

#[derive(Debug, Serialize)]
pub struct PauseResponse {
    pub agent: String,
    /// Queue memberships whose pause flag was flipped.
    pub memberships: usize,
}

/// Handler for `POST /api/actions/hangup?callId=...`.
pub async fn hangup_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(TenantContext(tenant)): Extension<TenantContext>,
    Query(params): Query<HangupParams>,
) -> Result<Json<HangupReceipt>, ApiError> {
    let receipt = state.commands.hangup(tenant, &params.call_id).await?;
    Ok(Json(receipt))
}

/// Handler for `POST /api/actions/pause?agent=...`.
pub async fn pause_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(TenantContext(tenant)): Extension<TenantContext>,
    Query(params): Query<PauseParams>,
) -> Result<Json<PauseResponse>, ApiError> {
    let memberships = state.commands.toggle_pause(&params.agent).await?;
    tracing::debug!(tenant = %tenant, agent = %params.agent, "pause toggled by operator");
    Ok(Json(PauseResponse {
        agent: params.agent,
        memberships,
    }))
}
