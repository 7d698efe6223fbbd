use action_executor_core::models::{DispatchRequest, DispatchResult};
use http::StatusCode;
use octocrab::Octocrab;
use time::OffsetDateTime;

use crate::{
    Auth, GitHub,
    error::{Error, Result},
};

impl GitHub {
    /// Emit a `workflow_dispatch` event. Returns as soon as GitHub answers; the resulting run
    /// has to be located separately with [`GitHub::find_run`].
    pub async fn trigger(&self, request: &DispatchRequest, auth: &Auth) -> Result<DispatchResult> {
        let client = self.client(auth).await?;
        dispatch(&client, request).await
    }
}

pub async fn dispatch(client: &Octocrab, request: &DispatchRequest) -> Result<DispatchResult> {
    // Recorded before the call so the correlation window leans towards including the run.
    let trigger_time = OffsetDateTime::now_utc();
    let workflow_url = request.workflow_url();
    let inputs = serde_json::to_value(&request.inputs)
        .map_err(|e| Error::InvalidRequest(format!("Invalid workflow inputs: {e}")))?;
    let result = client
        .actions()
        .create_workflow_dispatch(
            &request.owner,
            &request.repo,
            &request.workflow_id,
            &request.git_ref,
        )
        .inputs(inputs)
        .send()
        .await;
    match result {
        Ok(()) => {
            tracing::info!(
                "Dispatched {} on {}/{}@{}",
                request.workflow_id,
                request.owner,
                request.repo,
                request.git_ref
            );
            Ok(DispatchResult {
                success: true,
                trigger_time,
                workflow_url,
                status_code: StatusCode::NO_CONTENT.as_u16(),
                message: "Workflow triggered successfully".to_string(),
            })
        }
        Err(octocrab::Error::GitHub { source, .. }) => {
            tracing::warn!(
                "Failed to dispatch {} on {}/{}: {} - {}",
                request.workflow_id,
                request.owner,
                request.repo,
                source.status_code,
                source.message
            );
            Ok(DispatchResult {
                success: false,
                trigger_time,
                workflow_url,
                status_code: source.status_code.as_u16(),
                message: failure_message(&source.message, &request.owner, &request.repo),
            })
        }
        Err(e) => Err(Error::Transport(Box::new(e))),
    }
}

/// User-facing message for a rejected dispatch.
///
/// GitHub answers "Must have admin rights to Repository" when the token lacks write access to
/// Actions, which is misleading for App installations and OAuth users alike.
pub fn failure_message(upstream: &str, owner: &str, repo: &str) -> String {
    if upstream.to_ascii_lowercase().contains("admin rights") {
        format!(
            "Failed to trigger workflow: Write permission to {owner}/{repo} is required to run \
             workflows. Make sure the GitHub App installation (or your account) has Actions \
             read and write access to this repository."
        )
    } else {
        format!("Failed to trigger workflow: {upstream}")
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::testing;

    #[test]
    fn test_failure_message() {
        let message = failure_message("Must have admin rights to Repository.", "o", "r");
        assert!(message.contains("Write permission"));
        assert!(!message.contains("admin rights"));

        let message = failure_message("No ref found for: nope", "o", "r");
        assert_eq!(message, "Failed to trigger workflow: No ref found for: nope");
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/repos/owner/repo/actions/workflows/ci.yml/dispatches")
            .match_body(Matcher::PartialJson(json!({"ref": "main"})))
            .with_status(204)
            .create_async()
            .await;
        let github = testing::github(&server);
        let request = DispatchRequest::new("owner", "repo", "ci.yml", "main");
        let before = OffsetDateTime::now_utc();
        let result = github.trigger(&request, &testing::user("octocat")).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status_code, 204);
        assert!(result.trigger_time >= before);
        assert!(result.trigger_time <= OffsetDateTime::now_utc());
        assert_eq!(result.workflow_url, "https://github.com/owner/repo/actions/workflows/ci.yml");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_dispatch_sends_string_inputs() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/repos/owner/repo/actions/workflows/deploy.yml/dispatches")
            .match_body(Matcher::PartialJson(json!({
                "ref": "release",
                "inputs": {"debug": "true", "count": "3", "target": "prod"}
            })))
            .with_status(204)
            .create_async()
            .await;
        let github = testing::github(&server);
        let request = DispatchRequest::new("owner", "repo", "deploy.yml", "release").with_inputs(
            json!({"debug": true, "count": 3, "target": "prod"}).as_object().unwrap().clone(),
        );
        let result = github.trigger(&request, &testing::user("octocat")).await.unwrap();
        assert!(result.success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_dispatch_admin_rights_rewritten() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/repos/owner/repo/actions/workflows/ci.yml/dispatches")
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"Must have admin rights to Repository.","documentation_url":"https://docs.github.com/rest"}"#)
            .create_async()
            .await;
        let github = testing::github(&server);
        let request = DispatchRequest::new("owner", "repo", "ci.yml", "main");
        let result = github.trigger(&request, &testing::user("octocat")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status_code, 403);
        assert!(result.message.contains("Write permission"));
        assert!(!result.message.contains("Must have admin rights to Repository"));
    }

    #[tokio::test]
    async fn test_dispatch_upstream_message() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/repos/owner/repo/actions/workflows/ci.yml/dispatches")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"Workflow does not have 'workflow_dispatch' trigger","documentation_url":"https://docs.github.com/rest"}"#)
            .create_async()
            .await;
        let github = testing::github(&server);
        let request = DispatchRequest::new("owner", "repo", "ci.yml", "main");
        let result = github.trigger(&request, &testing::user("octocat")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status_code, 422);
        assert_eq!(
            result.message,
            "Failed to trigger workflow: Workflow does not have 'workflow_dispatch' trigger"
        );
    }

    #[tokio::test]
    async fn test_dispatch_with_app_credential() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/app/installations/99/access_tokens")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token":"ghs_installation","expires_at":"2030-01-01T00:00:00Z"}"#)
            .create_async()
            .await;
        let dispatch = server
            .mock("POST", "/repos/owner/repo/actions/workflows/ci.yml/dispatches")
            .match_header("authorization", "Bearer ghs_installation")
            .with_status(204)
            .create_async()
            .await;
        let (github, _key) = testing::github_with_app(&server);
        let request = DispatchRequest::new("owner", "repo", "ci.yml", "main");
        let result = github.trigger(&request, &Auth::App).await.unwrap();
        assert!(result.success);
        token.assert_async().await;
        dispatch.assert_async().await;
    }
}
