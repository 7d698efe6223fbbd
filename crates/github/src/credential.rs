use std::fmt;

use action_executor_core::models::AuthMode;
use octocrab::Octocrab;
use time::OffsetDateTime;
use url::Url;

use crate::error::{Error, Result};

/// A bearer token for GitHub's REST API.
///
/// Installation tokens are obtained fresh for every operation and never stored.
#[derive(Clone)]
pub struct Credential {
    token: String,
    pub expires_at: Option<OffsetDateTime>,
    pub mode: AuthMode,
}

impl Credential {
    pub fn installation(token: String, expires_at: Option<OffsetDateTime>) -> Self {
        Self { token, expires_at, mode: AuthMode::App }
    }

    pub fn user(token: String) -> Self { Self { token, expires_at: None, mode: AuthMode::User } }

    pub fn token(&self) -> &str { &self.token }

    /// Build an API client authenticating with this credential.
    pub fn client(&self, api_base: &Url) -> Result<Octocrab> { build_client(api_base, &self.token) }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("mode", &self.mode)
            .finish()
    }
}

/// A user's OAuth token and the login it belongs to.
#[derive(Clone)]
pub struct UserToken {
    pub login: String,
    pub token: String,
}

impl fmt::Debug for UserToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserToken").field("login", &self.login).field("token", &"[redacted]").finish()
    }
}

/// The identity an operation acts as.
#[derive(Debug, Clone)]
pub enum Auth {
    /// The configured GitHub App installation.
    App,
    /// The caller's own OAuth token; bypasses the App credential exchange.
    User(UserToken),
}

impl Auth {
    pub fn mode(&self) -> AuthMode {
        match self {
            Self::App => AuthMode::App,
            Self::User(_) => AuthMode::User,
        }
    }

    /// Cache key suffix: App results are shared, user results are kept per login.
    pub fn cache_scope(&self) -> String {
        match self {
            Self::App => "app".to_string(),
            Self::User(user) => format!("user:{}", user.login.to_ascii_lowercase()),
        }
    }
}

/// Create an Octocrab client sending `Authorization: Bearer <token>` to `api_base`.
pub(crate) fn build_client(api_base: &Url, token: &str) -> Result<Octocrab> {
    Octocrab::builder()
        .base_uri(api_base.as_str().trim_end_matches('/'))
        .map_err(|e| Error::Transport(Box::new(e)))?
        .personal_token(token.to_string())
        .build()
        .map_err(|e| Error::Transport(Box::new(e)))
}
