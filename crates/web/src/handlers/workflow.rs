use std::sync::Arc;

use action_executor_core::{
    AppError,
    config::Config,
    models::{
        AuthMode, CandidateRun, CorrelationQuery, DispatchRequest, DispatchResult, parse_timestamp,
    },
};
use action_executor_github::{GitHub, permissions::PermissionGate};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::handlers::auth::{CurrentUser, read_auth, resolve_auth};

fn default_ref() -> String { "main".to_string() }

#[derive(Deserialize)]
pub struct TriggerBody {
    owner: String,
    repo: String,
    workflow_id: String,
    #[serde(rename = "ref", default = "default_ref")]
    git_ref: String,
    #[serde(default)]
    inputs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    tests: Option<Vec<String>>,
    #[serde(default)]
    auth_mode: Option<AuthMode>,
}

#[derive(Serialize)]
pub struct TriggerResponse {
    #[serde(flatten)]
    result: DispatchResult,
    auth_mode: AuthMode,
}

pub async fn trigger(
    State(config): State<Arc<Config>>,
    State(github): State<Arc<GitHub>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<TriggerBody>,
) -> Result<Response, AppError> {
    if body.owner.is_empty() || body.repo.is_empty() || body.workflow_id.is_empty() {
        return Err(AppError::Message(
            StatusCode::BAD_REQUEST,
            "Repository owner, name, and workflow_id are required".to_string(),
        ));
    }
    if !github.can_dispatch(&body.owner, &body.repo, &user).await {
        return Err(AppError::Message(
            StatusCode::FORBIDDEN,
            format!("User {} does not have write access to {}/{}", user.login, body.owner, body.repo),
        ));
    }

    let mut inputs = body.inputs;
    if let Some(tests) = body.tests.filter(|t| !t.is_empty()) {
        inputs.insert("tests".to_string(), tests.into());
    }
    let request = DispatchRequest::new(body.owner, body.repo, body.workflow_id, body.git_ref)
        .with_inputs(inputs);
    let auth_mode = body.auth_mode.unwrap_or(config.github.default_auth_mode);
    tracing::info!(
        "User {} triggering {} on {}/{}@{} ({})",
        user.login,
        request.workflow_id,
        request.owner,
        request.repo,
        request.git_ref,
        auth_mode
    );
    let result = github
        .trigger(&request, &resolve_auth(auth_mode, &user))
        .await
        .map_err(|e| e.into_app_error())?;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::from_u16(result.status_code).unwrap_or(StatusCode::BAD_GATEWAY)
    };
    Ok((status, Json(TriggerResponse { result, auth_mode })).into_response())
}

#[derive(Deserialize)]
pub struct RunQuery {
    owner: String,
    repo: String,
    workflow_id: String,
    trigger_time: String,
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    auth_mode: Option<AuthMode>,
}

#[derive(Serialize)]
pub struct RunResponse {
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<CandidateRun>,
}

/// Poll for the run started by an earlier trigger.
pub async fn run(
    State(config): State<Arc<Config>>,
    State(github): State<Arc<GitHub>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<RunQuery>,
) -> Result<Json<RunResponse>, AppError> {
    let trigger_time = parse_timestamp(&query.trigger_time).map_err(|e| {
        AppError::Message(StatusCode::BAD_REQUEST, format!("Invalid trigger_time: {e}"))
    })?;
    let auth_mode = query.auth_mode.unwrap_or(config.github.default_auth_mode);
    let auth = read_auth(&github, &query.owner, &query.repo, auth_mode, &user).await?;
    let mut correlation =
        CorrelationQuery::new(query.owner, query.repo, query.workflow_id, trigger_time, auth_mode)
            .with_ref(query.git_ref);
    if auth_mode == AuthMode::User {
        correlation = correlation.with_actor(user.login.clone());
    }
    let run = github
        .find_run(&correlation, &auth)
        .await
        .map_err(|e| e.into_app_error())?;
    Ok(Json(RunResponse { found: run.is_some(), run }))
}
