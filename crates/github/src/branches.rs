use std::{collections::BTreeMap, sync::Arc};

use octocrab::{Octocrab, Page};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    Auth, GitHub,
    error::{Error, Result},
    upstream_error,
};

const PER_PAGE: u8 = 100;
const CONCURRENT_PAGES: usize = 10;

pub fn cache_key(owner: &str, repo: &str, auth: &Auth) -> String {
    format!("branches:{owner}:{repo}:{}", auth.cache_scope())
}

#[derive(Deserialize)]
struct Branch {
    name: String,
}

#[derive(Serialize)]
struct PageParams {
    per_page: u8,
    page: u32,
}

async fn fetch_page(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    page: u32,
) -> octocrab::Result<Page<Branch>> {
    client
        .get(format!("/repos/{owner}/{repo}/branches"), Some(&PageParams { per_page: PER_PAGE, page }))
        .await
}

fn page_names(page: Page<Branch>) -> Vec<String> {
    page.items.into_iter().map(|b| b.name).collect()
}

/// Page number carried by a pagination link, e.g. `...?per_page=100&page=7`.
pub fn page_number(link: &http::Uri) -> Option<u32> {
    let query = link.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse().ok())
}

/// Fetch pages `2..=last` concurrently. Failed pages are logged and left out.
async fn fetch_remaining_pages(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    last: u32,
) -> BTreeMap<u32, Vec<String>> {
    let sem = Arc::new(Semaphore::new(CONCURRENT_PAGES));
    let mut set = JoinSet::new();
    for page in 2..=last {
        let sem = sem.clone();
        let client = client.clone();
        let owner = owner.to_string();
        let repo = repo.to_string();
        set.spawn(async move {
            let _permit = sem.acquire_owned().await;
            (page, fetch_page(&client, &owner, &repo, page).await)
        });
    }
    let mut pages = BTreeMap::new();
    while let Some(result) = set.join_next().await {
        match result {
            Ok((page, Ok(response))) => {
                pages.insert(page, page_names(response));
            }
            Ok((page, Err(e))) => {
                tracing::warn!("Failed to fetch branches page {} of {}/{}: {}", page, owner, repo, e);
            }
            Err(e) => tracing::warn!("Branches page task for {}/{} failed: {}", owner, repo, e),
        }
    }
    pages
}

/// Follow `next` links one page at a time. Stops at the first failure and keeps what was
/// fetched so far.
async fn fetch_sequential_pages(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    mut next: Option<http::Uri>,
) -> Vec<String> {
    let mut names = vec![];
    let mut page = 1;
    while let Some(link) = next.take() {
        page = page_number(&link).unwrap_or(page + 1);
        match fetch_page(client, owner, repo, page).await {
            Ok(response) => {
                next = response.next.clone();
                names.extend(page_names(response));
            }
            Err(e) => {
                tracing::warn!("Failed to fetch branches page {} of {}/{}: {}", page, owner, repo, e);
                break;
            }
        }
    }
    names
}

async fn fetch_all_branches(client: &Octocrab, owner: &str, repo: &str) -> Result<Vec<String>> {
    let first = fetch_page(client, owner, repo, 1)
        .await
        .map_err(|e| upstream_error(&format!("Failed to get branches of {owner}/{repo}"), e))?;
    let last = first.last.as_ref().and_then(page_number);
    let next = first.next.clone();
    let mut names = page_names(first);
    match last {
        Some(last) if last > 1 => {
            for (_, page) in fetch_remaining_pages(client, owner, repo, last).await {
                names.extend(page);
            }
        }
        _ => names.extend(fetch_sequential_pages(client, owner, repo, next).await),
    }
    sort_branches(&mut names);
    Ok(names)
}

fn branch_rank(name: &str) -> u8 {
    match name {
        "main" => 0,
        "master" => 1,
        _ => 2,
    }
}

/// `main` and `master` first, everything else by raw string order.
pub fn sort_branches(names: &mut [String]) {
    names.sort_by(|a, b| branch_rank(a).cmp(&branch_rank(b)).then_with(|| a.cmp(b)));
}

/// A branch filter. Patterns that fail to compile match as literal substrings.
#[derive(Debug, Clone)]
pub enum BranchPattern {
    Regex(Regex),
    Literal(String),
}

impl BranchPattern {
    pub fn new(pattern: &str) -> Self {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(regex) => Self::Regex(regex),
            Err(e) => {
                tracing::warn!("Invalid branch pattern {:?}, matching literally: {}", pattern, e);
                Self::Literal(pattern.to_lowercase())
            }
        }
    }

    pub fn is_match(&self, name: &str) -> bool {
        match self {
            Self::Regex(regex) => regex.is_match(name),
            Self::Literal(literal) => name.to_lowercase().contains(literal.as_str()),
        }
    }
}

/// Keep the names matching any of `patterns`. Order is preserved; no patterns keeps everything.
pub fn filter_branches(names: Vec<String>, patterns: &[String]) -> Vec<String> {
    let patterns = patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(BranchPattern::new)
        .collect::<Vec<_>>();
    if patterns.is_empty() {
        return names;
    }
    names.into_iter().filter(|name| patterns.iter().any(|p| p.is_match(name))).collect()
}

impl GitHub {
    /// All branches of a repository, `main`/`master` first, narrowed by `patterns`.
    ///
    /// The unfiltered list is cached per repository and identity, so different filters share one
    /// fetch and one user's results are never served to another.
    pub async fn list_branches(
        &self,
        owner: &str,
        repo: &str,
        patterns: &[String],
        auth: &Auth,
    ) -> Result<Vec<String>> {
        let names = self
            .branches
            .get_or_try_insert_with(&cache_key(owner, repo, auth), self.cache_config.branches_ttl(), || async {
                let client = self.client(auth).await?;
                let names = fetch_all_branches(&client, owner, repo).await?;
                tracing::info!("Retrieved {} branches for {}/{}", names.len(), owner, repo);
                Ok::<_, Error>(names)
            })
            .await?;
        Ok(filter_branches(names, patterns))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::testing;

    fn names(items: &[&str]) -> Vec<String> { items.iter().map(|s| s.to_string()).collect() }

    #[test]
    fn test_sort_branches() {
        let mut branches = names(&["feature-b", "master", "Zeta", "alpha", "main", "develop"]);
        sort_branches(&mut branches);
        assert_eq!(branches, names(&["main", "master", "Zeta", "alpha", "develop", "feature-b"]));

        // Stable for any permutation of the same set.
        let mut reversed = names(&["main", "master", "Zeta", "alpha", "develop", "feature-b"]);
        reversed.reverse();
        sort_branches(&mut reversed);
        assert_eq!(reversed, branches);
    }

    #[test]
    fn test_filter_branches() {
        let all = names(&["main", "release/1.0", "Release/2.0", "feature-x", "fix[1]"]);
        assert_eq!(filter_branches(all.clone(), &[]), all);
        assert_eq!(filter_branches(all.clone(), &["  ".to_string()]), all);
        assert_eq!(
            filter_branches(all.clone(), &["^release/".to_string()]),
            names(&["release/1.0", "Release/2.0"])
        );
        assert_eq!(
            filter_branches(all.clone(), &["^main$".to_string(), "feature".to_string()]),
            names(&["main", "feature-x"])
        );
    }

    #[test]
    fn test_invalid_pattern_matches_literally() {
        let all = names(&["main", "fix[1", "FIX[1-b", "feature"]);
        assert!(matches!(BranchPattern::new("fix[1"), BranchPattern::Literal(_)));
        assert_eq!(
            filter_branches(all, &["fix[1".to_string(), "^main$".to_string()]),
            names(&["main", "fix[1", "FIX[1-b"])
        );
    }

    #[test]
    fn test_page_number() {
        let link: http::Uri = "https://api.github.com/repositories/1/branches?per_page=100&page=7"
            .parse()
            .unwrap();
        assert_eq!(page_number(&link), Some(7));
        let link: http::Uri = "https://api.github.com/repositories/1/branches".parse().unwrap();
        assert_eq!(page_number(&link), None);
    }

    fn page_query(page: u32) -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("per_page".into(), "100".into()),
            Matcher::UrlEncoded("page".into(), page.to_string()),
        ])
    }

    fn branches_body(items: &[&str]) -> String {
        json!(items.iter().map(|name| json!({"name": name, "protected": false})).collect::<Vec<_>>())
            .to_string()
    }

    #[tokio::test]
    async fn test_list_branches_concurrent_pages() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let link = format!(
            "<{base}/repos/owner/repo/branches?per_page=100&page=2>; rel=\"next\", \
             <{base}/repos/owner/repo/branches?per_page=100&page=3>; rel=\"last\""
        );
        let first = server
            .mock("GET", "/repos/owner/repo/branches")
            .match_query(page_query(1))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("link", &link)
            .with_body(branches_body(&["main", "feature-b"]))
            .expect(1)
            .create_async()
            .await;
        let _m = server
            .mock("GET", "/repos/owner/repo/branches")
            .match_query(page_query(2))
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"Not Found"}"#)
            .create_async()
            .await;
        let _m = server
            .mock("GET", "/repos/owner/repo/branches")
            .match_query(page_query(3))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(branches_body(&["alpha", "master"]))
            .create_async()
            .await;
        let github = testing::github(&server);
        let auth = testing::user("octocat");

        let branches = github.list_branches("owner", "repo", &[], &auth).await.unwrap();
        assert_eq!(branches, names(&["main", "master", "alpha", "feature-b"]));

        // Served from the cache, with the filter applied afterwards.
        let filtered =
            github.list_branches("owner", "repo", &["^ma".to_string()], &auth).await.unwrap();
        assert_eq!(filtered, names(&["main", "master"]));
        first.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_branches_sequential_pages() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let _m = server
            .mock("GET", "/repos/owner/repo/branches")
            .match_query(page_query(1))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("link", &format!("<{base}/repos/owner/repo/branches?per_page=100&page=2>; rel=\"next\""))
            .with_body(branches_body(&["develop"]))
            .create_async()
            .await;
        let _m = server
            .mock("GET", "/repos/owner/repo/branches")
            .match_query(page_query(2))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(branches_body(&["main"]))
            .create_async()
            .await;
        let github = testing::github(&server);
        let branches =
            github.list_branches("owner", "repo", &[], &testing::user("octocat")).await.unwrap();
        assert_eq!(branches, names(&["main", "develop"]));
    }

    #[tokio::test]
    async fn test_list_branches_first_page_fails() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/owner/missing/branches")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"Not Found"}"#)
            .expect(2)
            .create_async()
            .await;
        let github = testing::github(&server);
        let auth = testing::user("octocat");
        for _ in 0..2 {
            let err = github.list_branches("owner", "missing", &[], &auth).await.unwrap_err();
            assert_eq!(err.upstream_status(), Some(http::StatusCode::NOT_FOUND));
        }
        // Failures are not cached.
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalidate_repo_refetches() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/owner/repo/branches")
            .match_query(page_query(1))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(branches_body(&["main"]))
            .expect(2)
            .create_async()
            .await;
        let github = testing::github(&server);
        let auth = testing::user("octocat");
        github.list_branches("owner", "repo", &[], &auth).await.unwrap();
        github.invalidate_repo("owner", "repo", &auth).await;
        github.list_branches("owner", "repo", &[], &auth).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cached_branches_not_shared_between_users() {
        let mut server = mockito::Server::new_async().await;
        let alice_mock = server
            .mock("GET", "/repos/owner/private/branches")
            .match_query(page_query(1))
            .match_header("authorization", "Bearer gho_alice")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(branches_body(&["main", "secret-feature"]))
            .expect(1)
            .create_async()
            .await;
        let mallory_mock = server
            .mock("GET", "/repos/owner/private/branches")
            .match_query(page_query(1))
            .match_header("authorization", "Bearer gho_mallory")
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"Not Found"}"#)
            .expect(1)
            .create_async()
            .await;
        let github = testing::github(&server);
        let alice = testing::user_with_token("alice", "gho_alice");
        let mallory = testing::user_with_token("mallory", "gho_mallory");

        let branches = github.list_branches("owner", "private", &[], &alice).await.unwrap();
        assert_eq!(branches, names(&["main", "secret-feature"]));
        let err = github.list_branches("owner", "private", &[], &mallory).await.unwrap_err();
        assert_eq!(err.upstream_status(), Some(http::StatusCode::NOT_FOUND));
        // Alice is still served from her own cache entry.
        github.list_branches("owner", "private", &[], &alice).await.unwrap();

        alice_mock.assert_async().await;
        mallory_mock.assert_async().await;
        assert_ne!(cache_key("owner", "private", &alice), cache_key("owner", "private", &Auth::App));
    }

    #[tokio::test]
    async fn test_concurrent_pages_bounded() {
        const LAST: u32 = 15;
        const FAILING: u32 = 7;
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let link = format!(
            "<{base}/repos/owner/repo/branches?per_page=100&page=2>; rel=\"next\", \
             <{base}/repos/owner/repo/branches?per_page=100&page={LAST}>; rel=\"last\""
        );
        let _first = server
            .mock("GET", "/repos/owner/repo/branches")
            .match_query(page_query(1))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("link", &link)
            .with_body(branches_body(&["main"]))
            .create_async()
            .await;

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut mocks = vec![];
        for page in 2..=LAST {
            let mock = server
                .mock("GET", "/repos/owner/repo/branches")
                .match_query(page_query(page))
                .with_header("content-type", "application/json");
            let mock = if page == FAILING {
                mock.with_status(404).with_body(r#"{"message":"Not Found"}"#)
            } else {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                // Each chunked body runs on its own thread, so overlapping requests overlap here.
                mock.with_status(200).with_chunked_body(move |w| {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(100));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    let name = format!("branch-{page:02}");
                    w.write_all(branches_body(&[name.as_str()]).as_bytes())
                })
            };
            mocks.push(mock.create_async().await);
        }

        let github = testing::github(&server);
        let branches =
            github.list_branches("owner", "repo", &[], &testing::user("octocat")).await.unwrap();

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= CONCURRENT_PAGES, "{peak} pages were in flight at once");
        assert!(peak > 1, "pages were fetched one at a time");
        let mut expected = vec!["main".to_string()];
        expected.extend((2..=LAST).filter(|&p| p != FAILING).map(|p| format!("branch-{p:02}")));
        assert_eq!(branches, expected);
    }
}
