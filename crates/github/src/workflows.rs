use action_executor_core::models::{WorkflowInfo, WorkflowInput, WorkflowSummary};
use base64::{Engine, engine::general_purpose::STANDARD};
use http::StatusCode;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::{
    Auth, GitHub,
    error::{Error, Result},
    upstream_error,
};

pub fn cache_key(owner: &str, repo: &str, auth: &Auth) -> String {
    format!("workflows:{owner}:{repo}:{}", auth.cache_scope())
}

#[derive(Deserialize)]
struct Workflows {
    workflows: Vec<Workflow>,
}

#[derive(Deserialize)]
struct Workflow {
    name: Option<String>,
    #[serde(default)]
    path: String,
    state: Option<String>,
}

impl From<Workflow> for WorkflowSummary {
    fn from(workflow: Workflow) -> Self {
        let id = file_name(&workflow.path).to_string();
        Self {
            name: workflow.name.unwrap_or_else(|| id.clone()),
            state: workflow.state.unwrap_or_else(|| "active".to_string()),
            path: workflow.path,
            id,
        }
    }
}

#[derive(Deserialize)]
struct FileContents {
    content: String,
}

#[derive(Serialize)]
struct ListParams {
    per_page: u8,
}

fn file_name(path: &str) -> &str { path.rsplit('/').next().unwrap_or(path) }

async fn fetch_workflows(client: &Octocrab, owner: &str, repo: &str) -> Result<Vec<WorkflowSummary>> {
    let response: Workflows = client
        .get(format!("/repos/{owner}/{repo}/actions/workflows"), Some(&ListParams { per_page: 100 }))
        .await
        .map_err(|e| upstream_error(&format!("Failed to get workflows of {owner}/{repo}"), e))?;
    let mut workflows =
        response.workflows.into_iter().map(WorkflowSummary::from).collect::<Vec<_>>();
    workflows.sort_by_cached_key(|w| w.name.to_lowercase());
    Ok(workflows)
}

/// Decode the base64 body of a contents API response. GitHub wraps it at 60 columns.
fn decode_content(content: &str) -> Result<String> {
    let compact = content.chars().filter(|c| !c.is_ascii_whitespace()).collect::<String>();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| Error::InvalidRequest(format!("Invalid file encoding: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::InvalidRequest(format!("Invalid file encoding: {e}")))
}

/// The `workflow_dispatch` trigger of a workflow file, if any. `on` may be a mapping or a
/// sequence of mappings.
fn dispatch_trigger(document: &Value) -> Option<&Value> {
    match document.get("on")? {
        Value::Mapping(on) => on.get("workflow_dispatch"),
        Value::Sequence(items) => items.iter().find_map(|item| item.get("workflow_dispatch")),
        _ => None,
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::Sequence(items)) => !items.is_empty(),
        Some(Value::Mapping(map)) => !map.is_empty(),
        _ => false,
    }
}

fn parse_input(name: String, config: &Mapping) -> WorkflowInput {
    let input_type = config.get("type").and_then(Value::as_str).unwrap_or("string").to_string();
    let default = match input_type.as_str() {
        "boolean" => Some(serde_json::Value::Bool(truthy(config.get("default")))),
        _ => config
            .get("default")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::to_value(v).ok()),
    };
    let options = match input_type.as_str() {
        "choice" => config
            .get("options")
            .and_then(Value::as_sequence)
            .map(|options| {
                options
                    .iter()
                    .filter_map(|o| match o {
                        Value::String(s) => Some(s.clone()),
                        Value::Bool(b) => Some(b.to_string()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default(),
        _ => vec![],
    };
    WorkflowInput {
        name,
        description: config
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        required: config.get("required").and_then(Value::as_bool).unwrap_or(false),
        input_type,
        default,
        options,
    }
}

/// Parse the `workflow_dispatch` inputs declared in a workflow file, in declaration order.
pub fn parse_dispatch_inputs(content: &str) -> Result<Vec<WorkflowInput>, serde_yaml::Error> {
    let document: Value = serde_yaml::from_str(content)?;
    let Some(inputs) = dispatch_trigger(&document).and_then(|t| t.get("inputs")) else {
        return Ok(vec![]);
    };
    let Some(inputs) = inputs.as_mapping() else {
        tracing::warn!("Workflow dispatch inputs are not a mapping");
        return Ok(vec![]);
    };
    let mut result = Vec::with_capacity(inputs.len());
    for (name, config) in inputs {
        let Some(name) = name.as_str() else {
            tracing::warn!("Skipping workflow input with non-string name {:?}", name);
            continue;
        };
        let Some(config) = config.as_mapping() else {
            tracing::warn!("Skipping workflow input {}: config is not a mapping", name);
            continue;
        };
        result.push(parse_input(name.to_string(), config));
    }
    Ok(result)
}

async fn fetch_dispatch_inputs(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    path: &str,
) -> Result<Vec<WorkflowInput>> {
    let file: FileContents = client
        .get(format!("/repos/{owner}/{repo}/contents/{path}"), None::<&()>)
        .await
        .map_err(Error::upstream)?;
    let content = decode_content(&file.content)?;
    parse_dispatch_inputs(&content)
        .map_err(|e| Error::InvalidRequest(format!("Invalid workflow file {path}: {e}")))
}

impl GitHub {
    /// Workflows defined in a repository, sorted by name.
    pub async fn list_workflows(
        &self,
        owner: &str,
        repo: &str,
        auth: &Auth,
    ) -> Result<Vec<WorkflowSummary>> {
        self.workflows
            .get_or_try_insert_with(&cache_key(owner, repo, auth), self.cache_config.workflows_ttl(), || async {
                let client = self.client(auth).await?;
                let workflows = fetch_workflows(&client, owner, repo).await?;
                tracing::info!("Retrieved {} workflows for {}/{}", workflows.len(), owner, repo);
                Ok::<_, Error>(workflows)
            })
            .await
    }

    /// Describe a workflow and the inputs its `workflow_dispatch` trigger accepts.
    ///
    /// An unknown workflow is reported as `found: false`. A workflow file that cannot be read or
    /// parsed still yields `found: true`, without inputs.
    pub async fn workflow_info(
        &self,
        owner: &str,
        repo: &str,
        workflow_id: &str,
        auth: &Auth,
    ) -> Result<WorkflowInfo> {
        let client = self.client(auth).await?;
        let route = format!("/repos/{owner}/{repo}/actions/workflows/{workflow_id}");
        let workflow: Workflow = match client.get(route, None::<&()>).await {
            Ok(workflow) => workflow,
            Err(octocrab::Error::GitHub { source, .. })
                if source.status_code == StatusCode::NOT_FOUND =>
            {
                tracing::warn!("Workflow {} not found in {}/{}", workflow_id, owner, repo);
                return Ok(WorkflowInfo::not_found());
            }
            Err(e) => {
                return Err(upstream_error(
                    &format!("Failed to get workflow {workflow_id} of {owner}/{repo}"),
                    e,
                ));
            }
        };
        let path = if workflow.path.is_empty() {
            format!(".github/workflows/{workflow_id}")
        } else {
            workflow.path.clone()
        };
        let inputs = match fetch_dispatch_inputs(&client, owner, repo, &path).await {
            Ok(inputs) => inputs,
            Err(e) => {
                tracing::warn!("Failed to read inputs of {} in {}/{}: {}", path, owner, repo, e);
                vec![]
            }
        };
        tracing::info!(
            "Workflow {} in {}/{} declares {} inputs",
            workflow_id,
            owner,
            repo,
            inputs.len()
        );
        Ok(WorkflowInfo {
            found: true,
            name: Some(workflow.name.unwrap_or_else(|| workflow_id.to_string())),
            path: Some(path),
            state: workflow.state,
            inputs,
        })
    }
}
