use std::sync::Arc;

use action_executor_core::{
    AppError,
    config::Config,
    models::{AuthMode, WorkflowInfo, WorkflowSummary},
};
use action_executor_github::GitHub;
use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use crate::handlers::auth::{CurrentUser, read_auth};

#[derive(Deserialize)]
pub struct BranchesQuery {
    owner: String,
    repo: String,
    /// Comma separated; the configured filter applies when absent.
    patterns: Option<String>,
    auth_mode: Option<AuthMode>,
    /// Drop the cached list before reading.
    #[serde(default)]
    refresh: bool,
}

#[derive(Serialize)]
pub struct BranchesResponse {
    branches: Vec<String>,
}

pub async fn branches(
    State(config): State<Arc<Config>>,
    State(github): State<Arc<GitHub>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<BranchesQuery>,
) -> Result<Json<BranchesResponse>, AppError> {
    let patterns = match query.patterns {
        Some(patterns) => patterns.split(',').map(|p| p.trim().to_string()).collect(),
        None => config.branches.filter_patterns.clone(),
    };
    let mode = query.auth_mode.unwrap_or(config.github.default_auth_mode);
    let auth = read_auth(&github, &query.owner, &query.repo, mode, &user).await?;
    if query.refresh {
        github.invalidate_repo(&query.owner, &query.repo, &auth).await;
    }
    let branches = github
        .list_branches(&query.owner, &query.repo, &patterns, &auth)
        .await
        .map_err(|e| e.into_app_error())?;
    Ok(Json(BranchesResponse { branches }))
}

#[derive(Deserialize)]
pub struct RepoQuery {
    owner: String,
    repo: String,
    auth_mode: Option<AuthMode>,
    #[serde(default)]
    refresh: bool,
}

#[derive(Serialize)]
pub struct WorkflowsResponse {
    workflows: Vec<WorkflowSummary>,
}

pub async fn workflows(
    State(config): State<Arc<Config>>,
    State(github): State<Arc<GitHub>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<RepoQuery>,
) -> Result<Json<WorkflowsResponse>, AppError> {
    let mode = query.auth_mode.unwrap_or(config.github.default_auth_mode);
    let auth = read_auth(&github, &query.owner, &query.repo, mode, &user).await?;
    if query.refresh {
        github.invalidate_repo(&query.owner, &query.repo, &auth).await;
    }
    let workflows = github
        .list_workflows(&query.owner, &query.repo, &auth)
        .await
        .map_err(|e| e.into_app_error())?;
    Ok(Json(WorkflowsResponse { workflows }))
}

#[derive(Deserialize)]
pub struct WorkflowQuery {
    owner: String,
    repo: String,
    workflow_id: String,
    auth_mode: Option<AuthMode>,
}

pub async fn workflow(
    State(config): State<Arc<Config>>,
    State(github): State<Arc<GitHub>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<WorkflowQuery>,
) -> Result<Json<WorkflowInfo>, AppError> {
    let mode = query.auth_mode.unwrap_or(config.github.default_auth_mode);
    let auth = read_auth(&github, &query.owner, &query.repo, mode, &user).await?;
    let info = github
        .workflow_info(&query.owner, &query.repo, &query.workflow_id, &auth)
        .await
        .map_err(|e| e.into_app_error())?;
    Ok(Json(info))
}
