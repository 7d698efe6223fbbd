pub mod app;
pub mod branches;
pub mod correlate;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod permissions;
pub mod workflows;

use std::sync::Arc;

use action_executor_cache::{CacheStats, TtlCache};
use action_executor_core::{
    config::{CacheConfig, GitHubConfig},
    models::WorkflowSummary,
};
pub use credential::{Auth, Credential, UserToken};
pub use error::{Error, Result};
use octocrab::Octocrab;
use tokio::sync::OnceCell;

use crate::app::AppCredentials;

/// Entry point for every GitHub-facing operation: dispatch, run correlation, branch and
/// workflow listing, and permission checks.
pub struct GitHub {
    pub config: GitHubConfig,
    cache_config: CacheConfig,
    branches: TtlCache<Vec<String>>,
    workflows: TtlCache<Vec<WorkflowSummary>>,
    app_slug: OnceCell<String>,
}

/// Key counts of the branch and workflow caches.
#[derive(Debug, Clone, Copy, Eq, PartialEq, serde::Serialize)]
pub struct CacheReport {
    pub branches: CacheStats,
    pub workflows: CacheStats,
}

#[derive(serde::Deserialize)]
struct AuthenticatedUser {
    login: String,
}

impl GitHub {
    pub fn new(config: &GitHubConfig, cache_config: &CacheConfig) -> Arc<Self> {
        if config.app.id.is_none() || config.app.installation_id.is_none() {
            tracing::warn!("GitHub App is not configured; only user-token mode will work");
        }
        Arc::new(Self {
            config: config.clone(),
            cache_config: cache_config.clone(),
            branches: TtlCache::new("branches"),
            workflows: TtlCache::new("workflows"),
            app_slug: OnceCell::new(),
        })
    }

    /// Obtain a bearer credential for `auth`. App credentials are exchanged fresh on every call.
    pub async fn credential(&self, auth: &Auth) -> Result<Credential> {
        match auth {
            Auth::App => {
                let app = AppCredentials::from_config(&self.config.app)?;
                app::installation_credential(&self.config.api_base, &app).await
            }
            Auth::User(user) => Ok(Credential::user(user.token.clone())),
        }
    }

    pub(crate) async fn client(&self, auth: &Auth) -> Result<Octocrab> {
        self.credential(auth).await?.client(&self.config.api_base)
    }

    /// Resolve the login owning a user OAuth token.
    pub async fn current_user(&self, token: &str) -> Result<UserToken> {
        let client = Credential::user(token.to_string()).client(&self.config.api_base)?;
        let user: AuthenticatedUser = client.get("/user", None::<&()>).await.map_err(Error::auth)?;
        Ok(UserToken { login: user.login, token: token.to_string() })
    }

    /// The App's slug, resolved once per process. Failures are logged and not cached.
    pub async fn app_slug(&self) -> Option<String> {
        let result = self
            .app_slug
            .get_or_try_init(|| async {
                let app = AppCredentials::from_config(&self.config.app)?;
                let slug = app::fetch_app_slug(&self.config.api_base, &app).await?;
                tracing::info!("Resolved GitHub App slug: {}", slug);
                Ok::<_, Error>(slug)
            })
            .await;
        match result {
            Ok(slug) => Some(slug.clone()),
            Err(e) => {
                tracing::warn!("Failed to resolve GitHub App slug, matching any bot actor: {}", e);
                None
            }
        }
    }

    /// Drop the branch and workflow lists cached for a repository under `auth`.
    pub async fn invalidate_repo(&self, owner: &str, repo: &str, auth: &Auth) {
        tracing::info!("Refreshing cached lists of {}/{} ({})", owner, repo, auth.cache_scope());
        self.branches.clear(Some(&branches::cache_key(owner, repo, auth))).await;
        self.workflows.clear(Some(&workflows::cache_key(owner, repo, auth))).await;
    }

    pub async fn cache_stats(&self) -> CacheReport {
        CacheReport { branches: self.branches.stats().await, workflows: self.workflows.stats().await }
    }
}

/// Log an upstream failure with its status and message and classify it.
pub(crate) fn upstream_error(context: &str, err: octocrab::Error) -> Error {
    let err = Error::upstream(err);
    match &err {
        Error::Upstream { status, message } => {
            tracing::error!("{}: {} - {}", context, status, message)
        }
        err => tracing::error!("{}: {}", context, err),
    }
    err
}
