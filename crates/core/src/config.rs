use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::AuthMode;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub branches: BranchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: Url,
    #[serde(default)]
    pub default_auth_mode: AuthMode,
    #[serde(default)]
    pub app: GitHubAppConfig,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self { api_base: default_api_base(), default_auth_mode: AuthMode::App, app: Default::default() }
    }
}

fn default_api_base() -> Url {
    Url::parse("https://api.github.com").expect("Failed to parse default API base")
}

/// GitHub App credentials. Every field is optional at parse time; missing IDs are reported
/// when an installation token is actually requested.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GitHubAppConfig {
    pub id: Option<u64>,
    pub installation_id: Option<u64>,
    pub private_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BranchConfig {
    /// Case-insensitive regex patterns; a branch is listed if any pattern matches.
    #[serde(default)]
    pub filter_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_branches_ttl")]
    pub branches_ttl_secs: u64,
    #[serde(default = "default_workflows_ttl")]
    pub workflows_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { branches_ttl_secs: default_branches_ttl(), workflows_ttl_secs: default_workflows_ttl() }
    }
}

fn default_branches_ttl() -> u64 { 30 * 60 }

fn default_workflows_ttl() -> u64 { 5 * 60 }

impl CacheConfig {
    pub fn branches_ttl(&self) -> Duration { Duration::from_secs(self.branches_ttl_secs) }

    pub fn workflows_ttl(&self) -> Duration { Duration::from_secs(self.workflows_ttl_secs) }
}

impl Config {
    /// Read a YAML config file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        );
        let mut config: Config = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override App credentials and branch filters from environment variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let parse_id = |key: &str| -> Result<Option<u64>> {
            match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                Some(value) => value
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| anyhow!("{key} must be a numeric ID, got {value:?}")),
                None => Ok(None),
            }
        };
        if let Some(id) = parse_id("GITHUB_APP_ID")? {
            self.github.app.id = Some(id);
        }
        if let Some(id) = parse_id("GITHUB_APP_INSTALLATION_ID")? {
            self.github.app.installation_id = Some(id);
        }
        if let Some(path) = lookup("GITHUB_APP_PRIVATE_KEY_PATH").filter(|v| !v.trim().is_empty()) {
            self.github.app.private_key_path = Some(PathBuf::from(path.trim()));
        }
        if let Some(patterns) = lookup("BRANCH_FILTER_PATTERNS").filter(|v| !v.trim().is_empty()) {
            self.branches.filter_patterns = patterns
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }
}
