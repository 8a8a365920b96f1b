//! Code-hosting collaborator for PR review mode, backed by the `gh` CLI.
//!
//! Responses are decoded into typed records at this boundary; malformed
//! thread records are skipped with a warning instead of leaking untyped JSON
//! into the loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::threads::{ReviewThread, ThreadComment};
use crate::io::process::{CommandOutput, CommandRunner, CommandSpec};

const THREADS_QUERY: &str = "query($owner: String!, $repo: String!, $number: Int!) { \
repository(owner: $owner, name: $repo) { pullRequest(number: $number) { \
reviewThreads(first: 100) { nodes { isResolved id path line \
comments(last: 10) { nodes { author { login } body createdAt } } } } } } }";

const RESOLVE_MUTATION: &str = "mutation($threadId: ID!) { \
resolveReviewThread(input: {threadId: $threadId}) { thread { id } } }";

/// Identity of the open PR for the current branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrInfo {
    pub number: u64,
    pub url: String,
    pub owner: String,
    pub repo: String,
}

impl PrInfo {
    /// Key stored next to the thread cache.
    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.owner, self.repo, self.number)
    }
}

/// Operations the PR thread manager needs from the hosting service.
pub trait ReviewHost {
    fn is_authenticated(&self) -> Result<bool>;
    /// Open PR for `branch`; `None` when there is none or the lookup failed.
    fn pull_request(&self, branch: &str) -> Result<Option<PrInfo>>;
    /// Up to 100 threads with their last 10 comments each.
    fn review_threads(&self, pr: &PrInfo) -> Result<Vec<ReviewThread>>;
    /// Resolve a single thread.
    fn resolve_thread(&self, thread_id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrView {
    number: u64,
    url: String,
    head_repository: RepoRef,
    head_repository_owner: OwnerRef,
}

#[derive(Debug, Deserialize)]
struct RepoRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OwnerRef {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<ThreadsData>,
}

#[derive(Debug, Deserialize)]
struct ThreadsData {
    repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    pull_request: Option<PullRequestNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestNode {
    review_threads: Connection<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadNode {
    id: String,
    is_resolved: bool,
    path: Option<String>,
    line: Option<u64>,
    comments: Option<Connection<CommentNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentNode {
    author: Option<OwnerRef>,
    body: Option<String>,
    created_at: Option<String>,
}

impl From<ThreadNode> for ReviewThread {
    fn from(node: ThreadNode) -> Self {
        let comments = node
            .comments
            .map(|conn| conn.nodes)
            .unwrap_or_default()
            .into_iter()
            .map(|comment| ThreadComment {
                author: comment.author.map(|a| a.login),
                body: comment.body.unwrap_or_default(),
                created_at: comment.created_at,
            })
            .collect();
        ReviewThread {
            id: node.id,
            is_resolved: node.is_resolved,
            path: node.path,
            line: node.line,
            comments,
        }
    }
}

/// Parse `gh pr view --json number,url,headRepository,headRepositoryOwner`.
pub fn parse_pr_view(json: &str) -> Result<PrInfo> {
    let view: PrView = serde_json::from_str(json).context("parse PR info")?;
    if view.url.is_empty() {
        return Err(anyhow!("PR info has an empty url"));
    }
    Ok(PrInfo {
        number: view.number,
        url: view.url,
        owner: view.head_repository_owner.login,
        repo: view.head_repository.name,
    })
}

/// Parse the review-thread query response, skipping malformed thread records.
pub fn parse_review_threads(json: &str) -> Result<Vec<ReviewThread>> {
    let response: GraphQlResponse = serde_json::from_str(json).context("parse PR thread data")?;
    let nodes = response
        .data
        .and_then(|data| data.repository)
        .and_then(|repo| repo.pull_request)
        .map(|pr| pr.review_threads.nodes)
        .ok_or_else(|| anyhow!("PR thread data is missing reviewThreads"))?;

    let mut threads = Vec::with_capacity(nodes.len());
    for node in nodes {
        match serde_json::from_value::<ThreadNode>(node) {
            Ok(node) if !node.id.is_empty() => threads.push(node.into()),
            Ok(_) => warn!("skipping review thread without an id"),
            Err(err) => warn!(err = %err, "skipping malformed review thread"),
        }
    }
    Ok(threads)
}

/// [`ReviewHost`] backed by the GitHub CLI.
pub struct GhCli<'a> {
    runner: &'a dyn CommandRunner,
    workdir: PathBuf,
    timeout: Option<Duration>,
}

impl<'a> GhCli<'a> {
    pub fn new(runner: &'a dyn CommandRunner, workdir: &Path, timeout: Option<Duration>) -> Self {
        Self {
            runner,
            workdir: workdir.to_path_buf(),
            timeout,
        }
    }

    fn gh(&self, args: &[String]) -> Result<CommandOutput> {
        let spec = CommandSpec::new("gh")
            .args(args.iter().cloned())
            .current_dir(&self.workdir)
            .timeout(self.timeout);
        self.runner.run(&spec)
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl ReviewHost for GhCli<'_> {
    fn is_authenticated(&self) -> Result<bool> {
        Ok(self.gh(&args(&["auth", "status"]))?.success())
    }

    #[instrument(skip(self))]
    fn pull_request(&self, branch: &str) -> Result<Option<PrInfo>> {
        let out = self.gh(&args(&[
            "pr",
            "view",
            branch,
            "--json",
            "number,url,headRepository,headRepositoryOwner",
        ]))?;
        if !out.success() {
            debug!(stderr = %out.stderr_text().trim(), "gh pr view failed");
            return Ok(None);
        }
        match parse_pr_view(&out.stdout_text()) {
            Ok(info) => Ok(Some(info)),
            Err(err) => {
                warn!(
                    "Failed to parse PR info from gh output for branch {branch}: {err:#}"
                );
                Ok(None)
            }
        }
    }

    #[instrument(skip_all, fields(pr = pr.number))]
    fn review_threads(&self, pr: &PrInfo) -> Result<Vec<ReviewThread>> {
        let out = self.gh(&[
            "api".to_string(),
            "graphql".to_string(),
            "-f".to_string(),
            format!("query={THREADS_QUERY}"),
            "-F".to_string(),
            format!("owner={}", pr.owner),
            "-F".to_string(),
            format!("repo={}", pr.repo),
            "-F".to_string(),
            format!("number={}", pr.number),
        ])?;
        if !out.success() {
            return Err(anyhow!(
                "gh api graphql failed: {}",
                out.stderr_text().trim()
            ));
        }
        parse_review_threads(&out.stdout_text())
    }

    fn resolve_thread(&self, thread_id: &str) -> Result<()> {
        let out = self.gh(&[
            "api".to_string(),
            "graphql".to_string(),
            "-f".to_string(),
            format!("query={RESOLVE_MUTATION}"),
            "-F".to_string(),
            format!("threadId={thread_id}"),
        ])?;
        if out.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "exit code {:?}: {}",
                out.exit_code,
                out.stderr_text().trim()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRunner;

    const PR_JSON: &str = r#"{"number":42,"url":"https://github.com/acme/widgets/pull/42",
        "headRepository":{"id":"R_1","name":"widgets"},
        "headRepositoryOwner":{"id":"U_1","login":"acme"}}"#;

    #[test]
    fn parses_pr_identity() {
        let info = parse_pr_view(PR_JSON).expect("parse");
        assert_eq!(info.number, 42);
        assert_eq!(info.cache_key(), "acme/widgets/42");
    }

    #[test]
    fn rejects_pr_info_with_wrong_types() {
        assert!(parse_pr_view(r#"{"number":"42","url":"x"}"#).is_err());
        assert!(parse_pr_view("not json").is_err());
    }

    #[test]
    fn malformed_threads_are_skipped() {
        let json = r#"{"data":{"repository":{"pullRequest":{"reviewThreads":{"nodes":[
            {"id":"T1","isResolved":false,"path":"src/a.rs","line":3,
             "comments":{"nodes":[{"author":{"login":"rev"},"body":"fix","createdAt":"2024-01-01T00:00:00Z"}]}},
            {"id":"T2","isResolved":"nope"},
            {"id":"T3","isResolved":true,"path":null,"line":null,
             "comments":{"nodes":[{"author":null,"body":"ok","createdAt":null}]}}
        ]}}}}}"#;
        let threads = parse_review_threads(json).expect("parse");
        let ids: Vec<&str> = threads.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T3"]);
        assert_eq!(threads[0].comments[0].author.as_deref(), Some("rev"));
        assert_eq!(threads[1].comments[0].author, None);
        assert!(threads[1].is_resolved);
    }

    #[test]
    fn missing_pull_request_is_an_error() {
        assert!(parse_review_threads(r#"{"data":{"repository":{"pullRequest":null}}}"#).is_err());
    }

    #[test]
    fn resolve_sends_one_mutation_per_thread() {
        let runner = FakeRunner::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let gh = GhCli::new(&runner, dir.path(), None);
        gh.resolve_thread("PRRT_abc").expect("resolve");
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "gh");
        assert_eq!(calls[0].args.last().map(String::as_str), Some("threadId=PRRT_abc"));
        assert!(calls[0].args[3].contains("resolveReviewThread"));
    }

    #[test]
    fn failed_pr_lookup_is_none() {
        let runner = FakeRunner::failing();
        let dir = tempfile::tempdir().expect("tempdir");
        let gh = GhCli::new(&runner, dir.path(), None);
        assert_eq!(gh.pull_request("feature").expect("lookup"), None);
        assert!(!gh.is_authenticated().expect("auth"));
    }
}
