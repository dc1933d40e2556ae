use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use crate::counters::HostSnapshot;
use crate::runtime::Runtime;

use super::error::AppError;

pub async fn list(State(runtime): State<Arc<Runtime>>) -> Json<Vec<HostSnapshot>> {
    let snapshots = runtime
        .engine
        .live_hosts()
        .into_iter()
        .filter_map(|addr| runtime.engine.inspect(&addr))
        .collect();
    Json(snapshots)
}

pub async fn get_one(
    State(runtime): State<Arc<Runtime>>,
    Path(ip): Path<IpAddr>,
) -> Result<Json<HostSnapshot>, AppError> {
    runtime.engine.inspect(&ip).map(Json).ok_or(AppError::NotFound)
}
