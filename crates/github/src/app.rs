use std::path::Path;

use action_executor_core::config::GitHubAppConfig;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use url::Url;

use crate::{
    credential::{Credential, build_client},
    error::{Error, Result},
};

/// Environment variable holding the PEM contents when no key file is configured.
pub const PRIVATE_KEY_ENV: &str = "GITHUB_APP_PRIVATE_KEY";

/// Backdating of the JWT `iat` claim to tolerate clock skew against GitHub.
pub const JWT_BACKDATE: Duration = Duration::seconds(60);
/// JWT validity; GitHub caps App JWTs at 10 minutes.
pub const JWT_LIFETIME: Duration = Duration::seconds(600);

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl AppClaims {
    pub fn new(app_id: u64, now: OffsetDateTime) -> Self {
        Self {
            iat: (now - JWT_BACKDATE).unix_timestamp(),
            exp: (now + JWT_LIFETIME).unix_timestamp(),
            iss: app_id.to_string(),
        }
    }
}

/// Load the App private key from `path` if that file exists, otherwise from
/// `GITHUB_APP_PRIVATE_KEY`.
pub fn load_private_key(path: Option<&Path>) -> Result<String> {
    resolve_private_key(path, std::env::var(PRIVATE_KEY_ENV).ok())
}

fn resolve_private_key(path: Option<&Path>, env_value: Option<String>) -> Result<String> {
    if let Some(path) = path.filter(|p| p.exists()) {
        return std::fs::read_to_string(path).map_err(|e| {
            Error::Key(format!("Failed to read GitHub App private key {}: {}", path.display(), e))
        });
    }
    if let Some(key) = env_value.filter(|k| !k.trim().is_empty()) {
        return Ok(key);
    }
    Err(Error::Key(
        "GitHub App private key not found. Set GITHUB_APP_PRIVATE_KEY_PATH or GITHUB_APP_PRIVATE_KEY"
            .to_string(),
    ))
}

/// Sign an RS256 JWT identifying the App.
pub fn generate_jwt(app_id: u64, private_key: &str, now: OffsetDateTime) -> Result<String> {
    // Keys passed through the environment often arrive with escaped newlines.
    let mut pem = private_key.trim().replace("\\n", "\n");
    pem.push('\n');
    let key = EncodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(|e| Error::Key(format!("Invalid GitHub App private key: {e}")))?;
    let claims = AppClaims::new(app_id, now);
    tracing::debug!("Generating JWT for App ID {}", app_id);
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| Error::Key(format!("Failed to sign GitHub App JWT: {e}")))
}

#[derive(Clone)]
pub struct AppCredentials {
    pub app_id: u64,
    pub installation_id: u64,
    private_key: String,
}

impl AppCredentials {
    pub fn new(app_id: u64, installation_id: u64, private_key: String) -> Self {
        Self { app_id, installation_id, private_key }
    }

    pub fn from_config(config: &GitHubAppConfig) -> Result<Self> {
        let (Some(app_id), Some(installation_id)) = (config.id, config.installation_id) else {
            return Err(Error::Configuration(
                "GITHUB_APP_ID and GITHUB_APP_INSTALLATION_ID must be set".to_string(),
            ));
        };
        let private_key = load_private_key(config.private_key_path.as_deref())?;
        Ok(Self::new(app_id, installation_id, private_key))
    }

    pub fn jwt(&self) -> Result<String> {
        generate_jwt(self.app_id, &self.private_key, OffsetDateTime::now_utc())
    }
}

#[derive(Deserialize)]
struct InstallationToken {
    token: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    expires_at: Option<OffsetDateTime>,
}

#[derive(Deserialize)]
struct AppInfo {
    slug: String,
}

/// Exchange a freshly signed App JWT for an installation access token.
pub async fn installation_credential(api_base: &Url, app: &AppCredentials) -> Result<Credential> {
    tracing::info!(
        "Requesting installation token for App ID {} (installation {})",
        app.app_id,
        app.installation_id
    );
    let client = build_client(api_base, &app.jwt()?)?;
    let route = format!("/app/installations/{}/access_tokens", app.installation_id);
    let response: InstallationToken =
        client.post(route, None::<&()>).await.map_err(Error::auth).inspect_err(|e| {
            tracing::error!("Failed to get installation token: {}", e);
        })?;
    tracing::debug!("Installation token obtained");
    Ok(Credential::installation(response.token, response.expires_at))
}

/// Look up the App's slug; runs it starts are attributed to `{slug}[bot]`.
pub async fn fetch_app_slug(api_base: &Url, app: &AppCredentials) -> Result<String> {
    let client = build_client(api_base, &app.jwt()?)?;
    let info: AppInfo = client.get("/app", None::<&()>).await.map_err(Error::upstream)?;
    Ok(info.slug)
}
