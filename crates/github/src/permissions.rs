use std::future::Future;

use http::StatusCode;
use octocrab::Octocrab;
use serde::Deserialize;

use crate::{Credential, GitHub, UserToken};

/// Decides what a user may do with a repository.
pub trait PermissionGate {
    /// Whether the user may dispatch workflows on the repository.
    fn can_dispatch(
        &self,
        owner: &str,
        repo: &str,
        user: &UserToken,
    ) -> impl Future<Output = bool> + Send;

    /// Whether the repository is visible to the user's own token.
    fn can_read(&self, owner: &str, repo: &str, user: &UserToken) -> impl Future<Output = bool> + Send;
}

#[derive(Deserialize)]
struct CollaboratorPermission {
    permission: String,
    role_name: Option<String>,
}

impl CollaboratorPermission {
    fn allows_dispatch(&self) -> bool {
        matches!(self.permission.as_str(), "admin" | "write")
            || matches!(self.role_name.as_deref(), Some("admin" | "maintain" | "write"))
    }
}

#[derive(Deserialize)]
struct Repository {
    #[serde(default)]
    permissions: Option<RepositoryPermissions>,
}

#[derive(Deserialize)]
struct RepositoryPermissions {
    #[serde(default)]
    push: bool,
}

fn refused(err: &octocrab::Error) -> Option<StatusCode> {
    match err {
        octocrab::Error::GitHub { source, .. }
            if matches!(
                source.status_code,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
            ) =>
        {
            Some(source.status_code)
        }
        _ => None,
    }
}

/// The repository as seen by the user's token. Refusals and errors are logged and yield `None`.
async fn repository(client: &Octocrab, owner: &str, repo: &str, login: &str) -> Option<Repository> {
    match client.get::<Repository, _, ()>(format!("/repos/{owner}/{repo}"), None).await {
        Ok(repository) => Some(repository),
        Err(e) => {
            match refused(&e) {
                Some(status) => tracing::warn!(
                    "User {} cannot access {}/{} ({})",
                    login,
                    owner,
                    repo,
                    status
                ),
                None => tracing::error!("Error checking access of {} to {}/{}: {}", login, owner, repo, e),
            }
            None
        }
    }
}

/// Fallback when the collaborator endpoint is unavailable to the caller: the repository's
/// `permissions` block as seen by the user's token.
async fn can_push(client: &Octocrab, owner: &str, repo: &str, login: &str) -> bool {
    repository(client, owner, repo, login)
        .await
        .and_then(|r| r.permissions)
        .is_some_and(|p| p.push)
}

fn user_client(github: &GitHub, user: &UserToken) -> Option<Octocrab> {
    match Credential::user(user.token.clone()).client(&github.config.api_base) {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::error!("Failed to build client for {}: {}", user.login, e);
            None
        }
    }
}

impl PermissionGate for GitHub {
    async fn can_dispatch(&self, owner: &str, repo: &str, user: &UserToken) -> bool {
        let Some(client) = user_client(self, user) else {
            return false;
        };
        let route = format!("/repos/{owner}/{repo}/collaborators/{}/permission", user.login);
        let allowed = match client.get::<CollaboratorPermission, _, ()>(route, None).await {
            Ok(permission) => {
                tracing::debug!(
                    "User {} has {} permission on {}/{}",
                    user.login,
                    permission.permission,
                    owner,
                    repo
                );
                permission.allows_dispatch()
            }
            Err(e) if refused(&e).is_some() => {
                tracing::debug!(
                    "Collaborator permission of {} on {}/{} unavailable, checking repository access",
                    user.login,
                    owner,
                    repo
                );
                can_push(&client, owner, repo, &user.login).await
            }
            Err(e) => {
                tracing::error!(
                    "Error checking permission of {} on {}/{}: {}",
                    user.login,
                    owner,
                    repo,
                    e
                );
                false
            }
        };
        if allowed {
            tracing::info!("User {} may dispatch workflows on {}/{}", user.login, owner, repo);
        } else {
            tracing::warn!("User {} may not dispatch workflows on {}/{}", user.login, owner, repo);
        }
        allowed
    }

    async fn can_read(&self, owner: &str, repo: &str, user: &UserToken) -> bool {
        let Some(client) = user_client(self, user) else {
            return false;
        };
        let visible = repository(&client, owner, repo, &user.login).await.is_some();
        tracing::debug!("Repository {}/{} visible to {}: {}", owner, repo, user.login, visible);
        visible
    }
}
