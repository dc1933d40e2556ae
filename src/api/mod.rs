//! Read-only operator HTTP API (§6, new ambient surface): liveness, live
//! host snapshots, and attack/mitigation inspection. Never mutates counter
//! state directly — `unban` replays the same code path a signal-driven
//! operator unban would use.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

pub mod attacks;
pub mod error;
pub mod hosts;

pub use error::AppError;

use crate::runtime::Runtime;

pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .nest("/api/v1", v1_router())
        .with_state(runtime)
}

fn v1_router() -> Router<Arc<Runtime>> {
    Router::new()
        .route("/health", get(health))
        .route("/hosts", get(hosts::list))
        .route("/hosts/:ip", get(hosts::get_one))
        .route("/attacks", get(attacks::list))
        .route("/attacks/:id/unban", post(attacks::unban))
        .route("/mitigations/:id/flowspec", get(attacks::flowspec))
}

async fn health() -> &'static str {
    "ok"
}
