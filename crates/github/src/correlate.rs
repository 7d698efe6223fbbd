//! Locating the workflow run produced by a `workflow_dispatch`.
//!
//! GitHub's dispatch endpoint returns no run ID. The run is identified afterwards by listing
//! the workflow's most recent runs and keeping those that
//!
//! * were created within `[trigger_time - 5s, trigger_time + 30s]`,
//! * ran on the requested branch, if one was given, and
//! * were started by the identity that dispatched (the App's bot account or the user).
//!
//! The most recently created survivor wins. Two dispatches of the same workflow by the same
//! actor inside one window cannot be told apart; the later run is reported for both.

use action_executor_core::models::{ActorType, AuthMode, CandidateRun, CorrelationQuery};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{Auth, GitHub, error::Result, upstream_error};

/// Tolerated clock drift between this host and GitHub.
pub const WINDOW_BEFORE: Duration = Duration::seconds(5);
/// Tolerated delay before GitHub makes a new run visible.
pub const WINDOW_AFTER: Duration = Duration::seconds(30);
/// Number of recent runs inspected per attempt.
pub const RECENT_RUNS: u8 = 20;

/// The identity a matching run must have been started by.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ActorMatcher {
    /// Dispatched with an installation token. Without a slug any bot actor is accepted.
    App { slug: Option<String> },
    /// Dispatched with the user's own token.
    User { login: String },
}

impl ActorMatcher {
    pub fn matches(&self, run: &CandidateRun) -> bool {
        match self {
            Self::App { slug: Some(slug) } => {
                run.actor_login.eq_ignore_ascii_case(slug)
                    || run
                        .actor_login
                        .strip_suffix("[bot]")
                        .is_some_and(|login| login.eq_ignore_ascii_case(slug))
            }
            Self::App { slug: None } => run.actor_type == ActorType::Bot,
            Self::User { login } => {
                run.actor_type == ActorType::User && run.actor_login.eq_ignore_ascii_case(login)
            }
        }
    }
}

pub fn in_window(trigger_time: OffsetDateTime, created_at: OffsetDateTime) -> bool {
    created_at >= trigger_time - WINDOW_BEFORE && created_at <= trigger_time + WINDOW_AFTER
}

/// Pick the run most likely produced by the dispatch described by `query`.
pub fn select_run<'a>(
    runs: &'a [CandidateRun],
    query: &CorrelationQuery,
    matcher: &ActorMatcher,
) -> Option<&'a CandidateRun> {
    runs.iter()
        .filter(|run| {
            query.ref_filter.as_deref().is_none_or(|r| run.head_branch.as_deref() == Some(r))
        })
        .filter(|run| in_window(query.trigger_time, run.created_at))
        .filter(|run| matcher.matches(run))
        .max_by_key(|run| run.created_at)
}

#[derive(Deserialize)]
struct WorkflowRuns {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct WorkflowRun {
    id: u64,
    html_url: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    head_branch: Option<String>,
    actor: Actor,
    status: Option<String>,
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct Actor {
    login: String,
    #[serde(rename = "type")]
    actor_type: ActorType,
}

impl From<WorkflowRun> for CandidateRun {
    fn from(run: WorkflowRun) -> Self {
        Self {
            id: run.id,
            html_url: run.html_url,
            created_at: run.created_at,
            head_branch: run.head_branch,
            actor_login: run.actor.login,
            actor_type: run.actor.actor_type,
            status: run.status,
            conclusion: run.conclusion,
        }
    }
}

#[derive(Serialize)]
struct RunsParams<'a> {
    per_page: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

async fn list_recent_runs(client: &Octocrab, query: &CorrelationQuery) -> Result<Vec<CandidateRun>> {
    let route = format!(
        "/repos/{}/{}/actions/workflows/{}/runs",
        query.owner, query.repo, query.workflow_id
    );
    let params = RunsParams { per_page: RECENT_RUNS, branch: query.ref_filter.as_deref() };
    let runs: WorkflowRuns = client.get(route, Some(&params)).await.map_err(|e| {
        upstream_error(
            &format!("Failed to list runs of {} in {}/{}", query.workflow_id, query.owner, query.repo),
            e,
        )
    })?;
    Ok(runs.workflow_runs.into_iter().map(CandidateRun::from).collect())
}

impl GitHub {
    /// Find the run started by a dispatch. `Ok(None)` means no run is visible yet; callers are
    /// expected to poll again.
    pub async fn find_run(
        &self,
        query: &CorrelationQuery,
        auth: &Auth,
    ) -> Result<Option<CandidateRun>> {
        let client = self.client(auth).await?;
        let runs = list_recent_runs(&client, query).await?;
        let matcher = match query.auth_mode {
            AuthMode::App => ActorMatcher::App { slug: self.app_slug().await },
            AuthMode::User => {
                let login = query.expected_actor_login.clone().or_else(|| match auth {
                    Auth::User(user) => Some(user.login.clone()),
                    Auth::App => None,
                });
                let Some(login) = login else {
                    tracing::warn!(
                        "No actor login to match runs of {} in {}/{} against",
                        query.workflow_id,
                        query.owner,
                        query.repo
                    );
                    return Ok(None);
                };
                ActorMatcher::User { login }
            }
        };
        let found = select_run(&runs, query, &matcher).cloned();
        match &found {
            Some(run) => tracing::info!(
                "Matched run {} of {} in {}/{} ({} candidates)",
                run.id,
                query.workflow_id,
                query.owner,
                query.repo,
                runs.len()
            ),
            None => tracing::debug!(
                "No run of {} in {}/{} matches yet ({} candidates)",
                query.workflow_id,
                query.owner,
                query.repo,
                runs.len()
            ),
        }
        Ok(found)
    }
}
