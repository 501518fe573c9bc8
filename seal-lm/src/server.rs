//! The LM health endpoint the GM polls.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use seal_api::models::LmHealthResponse;
use seal_common::time::Clock;

use crate::handler::VaultAgent;

pub struct LmContext {
    pub clock: Clock,
    pub agents: Vec<Arc<VaultAgent>>,
}

pub fn router(ctx: Arc<LmContext>) -> Router<()> {
    Router::new()
        .route("/api/health", get(health))
        .with_state(ctx)
}

async fn health(
    State(ctx): State<Arc<LmContext>>,
) -> Json<LmHealthResponse> {
    let vaults = ctx.agents.iter().map(|agent| agent.health()).collect();
    Json(LmHealthResponse {
        service: "seal-lm".to_owned(),
        timestamp: ctx.clock.now(),
        vaults,
    })
}
