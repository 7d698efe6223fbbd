use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339};

/// Which identity talks to GitHub: the App installation or the caller's own OAuth token.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    App,
    User,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::User => "user",
        }
    }
}

impl FromStr for AuthMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(Self::App),
            "user" => Ok(Self::User),
            _ => Err(()),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DispatchRequest {
    pub owner: String,
    pub repo: String,
    pub workflow_id: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub inputs: BTreeMap<String, String>,
}

impl DispatchRequest {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        workflow_id: impl Into<String>,
        git_ref: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            workflow_id: workflow_id.into(),
            git_ref: git_ref.into(),
            inputs: BTreeMap::new(),
        }
    }

    /// Add inputs, coercing every value to the string form `workflow_dispatch` requires.
    /// `null` values are omitted.
    pub fn with_inputs<I>(mut self, inputs: I) -> Self
    where I: IntoIterator<Item = (String, serde_json::Value)> {
        for (key, value) in inputs {
            if let Some(value) = coerce_input(&value) {
                self.inputs.insert(key, value);
            }
        }
        self
    }

    pub fn workflow_url(&self) -> String { workflow_url(&self.owner, &self.repo, &self.workflow_id) }
}

/// String form of a dispatch input value.
pub fn coerce_input(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => coerce_input(other).unwrap_or_default(),
                })
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

pub fn workflow_url(owner: &str, repo: &str, workflow_id: &str) -> String {
    format!("https://github.com/{owner}/{repo}/actions/workflows/{workflow_id}")
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub trigger_time: OffsetDateTime,
    pub workflow_url: String,
    pub status_code: u16,
    pub message: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ActorType {
    Bot,
    User,
    Organization,
    #[serde(other)]
    Other,
}

/// A workflow run as listed by GitHub, considered as the possible result of a dispatch.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CandidateRun {
    pub id: u64,
    pub html_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub head_branch: Option<String>,
    pub actor_login: String,
    pub actor_type: ActorType,
    pub status: Option<String>,
    pub conclusion: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CorrelationQuery {
    pub owner: String,
    pub repo: String,
    pub workflow_id: String,
    pub trigger_time: OffsetDateTime,
    pub ref_filter: Option<String>,
    pub expected_actor_login: Option<String>,
    pub auth_mode: AuthMode,
}

impl CorrelationQuery {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        workflow_id: impl Into<String>,
        trigger_time: OffsetDateTime,
        auth_mode: AuthMode,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            workflow_id: workflow_id.into(),
            trigger_time,
            ref_filter: None,
            expected_actor_login: None,
            auth_mode,
        }
    }

    pub fn with_ref(mut self, git_ref: Option<impl Into<String>>) -> Self {
        self.ref_filter = git_ref.map(Into::into).filter(|r: &String| !r.is_empty());
        self
    }

    pub fn with_actor(mut self, login: impl Into<String>) -> Self {
        self.expected_actor_login = Some(login.into());
        self
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    /// Workflow file name, e.g. `ci.yml`.
    pub id: String,
    pub name: String,
    pub path: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowInfo {
    pub found: bool,
    pub name: Option<String>,
    pub path: Option<String>,
    pub state: Option<String>,
    pub inputs: Vec<WorkflowInput>,
}

impl WorkflowInfo {
    pub fn not_found() -> Self {
        Self { found: false, name: None, path: None, state: None, inputs: vec![] }
    }
}

/// A `workflow_dispatch` input declared in the workflow file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowInput {
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: String,
    pub description: String,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Parse an ISO-8601 / RFC 3339 timestamp and normalize it to UTC.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(value.trim(), &Rfc3339).map(|t| t.to_offset(UtcOffset::UTC))
}
