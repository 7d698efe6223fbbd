use std::sync::Arc;

use action_executor_core::{AppError, models::AuthMode};
use action_executor_github::{Auth, GitHub, UserToken, permissions::PermissionGate};
use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{HeaderMap, StatusCode, header, request::Parts},
};

/// The caller, identified by the OAuth token in `Authorization: Bearer <token>`.
pub struct CurrentUser(pub UserToken);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (matches!(scheme.to_ascii_lowercase().as_str(), "bearer" | "token") && !token.is_empty())
        .then_some(token)
}

impl<S> FromRequestParts<S> for CurrentUser
where
    Arc<GitHub>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        <CurrentUser as OptionalFromRequestParts<S>>::from_request_parts(parts, state)
            .await?
            .ok_or_else(|| AppError::Message(StatusCode::UNAUTHORIZED, "Not authenticated".into()))
    }
}

impl<S> OptionalFromRequestParts<S> for CurrentUser
where
    Arc<GitHub>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            return Ok(None);
        };
        let github = Arc::<GitHub>::from_ref(state);
        match github.current_user(token).await {
            Ok(user) => Ok(Some(CurrentUser(user))),
            Err(e) if e.upstream_status() == Some(StatusCode::UNAUTHORIZED) => Err(
                AppError::Message(StatusCode::UNAUTHORIZED, "Invalid or expired token".into()),
            ),
            Err(e) => Err(e.into_app_error()),
        }
    }
}

/// Pick the identity GitHub calls are made with.
pub fn resolve_auth(mode: AuthMode, user: &UserToken) -> Auth {
    match mode {
        AuthMode::App => Auth::App,
        AuthMode::User => Auth::User(user.clone()),
    }
}

/// Resolve the identity for a read, refusing App mode unless the caller's own token can see
/// the repository. In user mode GitHub enforces access on every call.
pub async fn read_auth(
    github: &GitHub,
    owner: &str,
    repo: &str,
    mode: AuthMode,
    user: &UserToken,
) -> Result<Auth, AppError> {
    if mode == AuthMode::App && !github.can_read(owner, repo, user).await {
        return Err(AppError::Message(
            StatusCode::NOT_FOUND,
            format!("Repository {owner}/{repo} not found or not accessible to {}", user.login),
        ));
    }
    Ok(resolve_auth(mode, user))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer gho_abc")), Some("gho_abc"));
        assert_eq!(bearer_token(&headers("token gho_abc")), Some("gho_abc"));
        assert_eq!(bearer_token(&headers("bearer  gho_abc ")), Some("gho_abc"));
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
