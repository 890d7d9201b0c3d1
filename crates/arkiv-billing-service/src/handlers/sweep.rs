//! Scheduled cancellation-sweep trigger.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::auth::SweepAuth;
use crate::error::ApiError;
use crate::reconciler::{self, SweepReport};
use crate::state::AppState;

/// Run the cancellation sweep.
///
/// Invoked by the external scheduler on a fixed cadence; the `SweepAuth`
/// extractor rejects unauthenticated invocations with 401 before any side
/// effect. Per-candidate failures are aggregated into the report rather
/// than failing the run.
pub async fn run_sweep(
    State(state): State<Arc<AppState>>,
    _auth: SweepAuth,
) -> Result<Json<SweepReport>, ApiError> {
    let report = reconciler::run_cancellation_sweep(&state).await?;
    Ok(Json(report))
}
