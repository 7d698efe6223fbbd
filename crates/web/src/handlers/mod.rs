use std::sync::Arc;

use action_executor_github::{CacheReport, GitHub};
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;

use crate::AppState;

mod auth;
mod repo;
mod workflow;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/trigger", post(workflow::trigger))
        .route("/api/run", get(workflow::run))
        .route("/api/branches", get(repo::branches))
        .route("/api/workflows", get(repo::workflows))
        .route("/api/workflow", get(repo::workflow))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    cache: CacheReport,
}

async fn health(State(github): State<Arc<GitHub>>) -> Json<Health> {
    Json(Health { status: "ok", cache: github.cache_stats().await })
}
