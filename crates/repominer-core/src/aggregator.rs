//! Per-repository enrichment.
//!
//! A candidate first has to clear the contributor threshold. Only then are
//! the other endpoints queried, each on its own: one failing sub-fetch just
//! leaves its field empty.
use async_trait::async_trait;
use repominer_api::types::{Contributor, IssueState, SbomEnvelope, Tag};
use repominer_api::{ApiRequest, Fetch};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::detect::{dependency_names, detect_ci_tool};
use crate::models::{EnrichedRepoRow, Enrichment, IssueCounts, PullCounts, RepoRow};
use crate::sink::RecordSink;
use crate::tree::{PathFilter, TreeWalker};
use crate::Result;

pub struct RepoAggregator {
    api: Arc<dyn Fetch>,
    api_base: String,
    filter: PathFilter,
    min_contributors: usize,
}

impl RepoAggregator {
    pub fn new(api: Arc<dyn Fetch>, api_base: impl Into<String>) -> Self {
        Self {
            api,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            filter: PathFilter::default(),
            min_contributors: 1,
        }
    }

    pub fn from_config(api: Arc<dyn Fetch>, config: &Config) -> Self {
        Self::new(api, config.github.api_url.as_str())
            .with_filter(PathFilter::from(&config.filters))
            .with_min_contributors(config.filters.min_contributors)
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_min_contributors(mut self, min_contributors: usize) -> Self {
        self.min_contributors = min_contributors;
        self
    }

    /// A repository is worth enriching only with more than the minimum
    /// number of known contributors
    pub fn includes(&self, contributor_count: Option<usize>) -> bool {
        contributor_count.is_some_and(|count| count > self.min_contributors)
    }

    pub async fn aggregate(&self, candidate: RepoRow) -> EnrichedRepoRow {
        let (owner, name) = candidate.owner_and_name();
        let repo_url = format!("{}/repos/{}/{}", self.api_base, owner, name);
        info!("Processing {}/{}", owner, name);

        let contributor_count = self
            .fetch_list::<Contributor>(ApiRequest::get(format!("{}/contributors", repo_url)))
            .await
            .map(|contributors| contributors.len());

        let mut enrichment = Enrichment {
            contributor_count,
            ..Enrichment::default()
        };

        // Solo projects stop here - no point burning quota on a dozen more calls
        if !self.includes(contributor_count) {
            info!(
                "Excluding {}/{}: contributors {:?}, need more than {}",
                owner, name, contributor_count, self.min_contributors
            );
            return EnrichedRepoRow {
                repo: candidate,
                enrichment,
            };
        }

        let filenames = TreeWalker::new(Arc::clone(&self.api), repo_url.as_str(), self.filter.clone())
            .collect_paths()
            .await;
        enrichment.ci_cd_tool = detect_ci_tool(&filenames);
        enrichment.filenames = Some(filenames);

        enrichment.commits_count = self
            .fetch_list::<serde_json::Value>(ApiRequest::get(format!("{}/commits", repo_url)))
            .await
            .map(|commits| commits.len());

        enrichment.issues_count = self
            .fetch_list::<IssueState>(
                ApiRequest::get(format!("{}/issues", repo_url)).query("state", "all"),
            )
            .await
            .map(|issues| count_issues(&issues));

        enrichment.pull_requests_count = self
            .fetch_list::<IssueState>(
                ApiRequest::get(format!("{}/pulls", repo_url)).query("state", "all"),
            )
            .await
            .map(|pulls| count_pulls(&pulls));

        enrichment.tags = self
            .fetch_list::<Tag>(ApiRequest::get(format!("{}/tags", repo_url)))
            .await
            .map(|tags| tags.into_iter().map(|tag| tag.name).collect());

        enrichment.dependencies = self.dependencies(&repo_url).await;

        EnrichedRepoRow {
            repo: candidate,
            enrichment,
        }
    }

    async fn dependencies(&self, repo_url: &str) -> Option<Vec<String>> {
        let request = ApiRequest::get(format!("{}/dependency-graph/sbom", repo_url));
        let payload = self.api.execute(&request).await.into_payload()?;

        match serde_json::from_value::<SbomEnvelope>(payload) {
            Ok(envelope) => {
                let names: Vec<&str> = envelope
                    .sbom
                    .packages
                    .iter()
                    .map(|package| package.name.as_str())
                    .collect();
                Some(dependency_names(&names))
            }
            Err(err) => {
                warn!("Unexpected SBOM payload from {}: {}", request.url, err);
                None
            }
        }
    }

    async fn fetch_list<T: DeserializeOwned>(&self, request: ApiRequest) -> Option<Vec<T>> {
        let payload = self.api.execute(&request).await.into_payload()?;
        match serde_json::from_value(payload) {
            Ok(items) => Some(items),
            Err(err) => {
                warn!("Unexpected payload from {}: {}", request.url, err);
                None
            }
        }
    }
}

fn count_issues(issues: &[IssueState]) -> IssueCounts {
    issues.iter().fold(IssueCounts::default(), |mut counts, issue| {
        match issue.state.as_str() {
            "open" => counts.open += 1,
            "closed" => counts.closed += 1,
            _ => {}
        }
        counts
    })
}

fn count_pulls(pulls: &[IssueState]) -> PullCounts {
    pulls.iter().fold(PullCounts::default(), |mut counts, pull| {
        match pull.state.as_str() {
            "open" => counts.open += 1,
            "closed" => counts.closed += 1,
            _ => {}
        }
        if pull.merged_at.is_some() {
            counts.merged += 1;
        }
        counts
    })
}

/// Enriches repository rows on their way into another sink
///
/// Lets a repository search feed the aggregate dataset directly.
pub struct EnrichingSink<'a, S: ?Sized> {
    aggregator: &'a RepoAggregator,
    inner: &'a mut S,
}

impl<'a, S: ?Sized> EnrichingSink<'a, S> {
    pub fn new(aggregator: &'a RepoAggregator, inner: &'a mut S) -> Self {
        Self { aggregator, inner }
    }
}

#[async_trait]
impl<'a, S> RecordSink<RepoRow> for EnrichingSink<'a, S>
where
    S: RecordSink<EnrichedRepoRow> + ?Sized,
{
    async fn write(&mut self, record: RepoRow) -> Result<()> {
        let enriched = self.aggregator.aggregate(record).await;
        self.inner.write(enriched).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CiTool;
    use repominer_api::{ApiOutcome, MockFetch};
    use serde_json::{json, Value};

    const API: &str = "https://api.github.com";
    const REPO: &str = "https://api.github.com/repos/octo/demo";

    fn candidate() -> RepoRow {
        RepoRow {
            login: "octo".into(),
            repo_name: "demo".into(),
            repo_html_url: "https://github.com/octo/demo".into(),
            language: Some("Rust".into()),
            topics: "cli".into(),
            repo_description: None,
            open_issues_count: 2,
            forks_count: 1,
            stargazers_count: 1200,
            last_repo_commit_date: None,
            license: None,
        }
    }

    fn contributors(n: usize) -> Value {
        Value::Array((0..n).map(|i| json!({"login": format!("dev{}", i)})).collect())
    }

    /// Serves a healthy repository, minus the endpoints listed in `failing`
    fn repo_api(failing: &'static [&'static str]) -> MockFetch {
        let mut api = MockFetch::new();
        api.expect_execute().returning(move |request| {
            let path = request.url.strip_prefix(REPO).unwrap_or_default();
            if failing.contains(&path) {
                return ApiOutcome::OtherError(Some(500));
            }
            match path {
                "/contributors" => ApiOutcome::Success(contributors(5)),
                "/contents/" => ApiOutcome::Success(json!([
                    {"name": ".github", "path": ".github", "type": "dir"},
                    {"name": "README.md", "path": "README.md", "type": "file"}
                ])),
                "/contents/.github" => ApiOutcome::Success(json!([
                    {"name": "workflows", "path": ".github/workflows", "type": "dir"}
                ])),
                "/contents/.github/workflows" => ApiOutcome::Success(json!([
                    {"name": "ci.yml", "path": ".github/workflows/ci.yml", "type": "file"}
                ])),
                "/commits" => ApiOutcome::Success(json!([{"sha": "a"}, {"sha": "b"}, {"sha": "c"}])),
                "/issues" => {
                    assert_eq!(request.param("state"), Some("all"));
                    ApiOutcome::Success(json!([
                        {"state": "open"},
                        {"state": "closed"},
                        {"state": "closed"}
                    ]))
                }
                "/pulls" => {
                    assert_eq!(request.param("state"), Some("all"));
                    ApiOutcome::Success(json!([
                        {"state": "open", "merged_at": null},
                        {"state": "closed", "merged_at": "2024-01-01T00:00:00Z"},
                        {"state": "closed", "merged_at": null}
                    ]))
                }
                "/tags" => ApiOutcome::Success(json!([{"name": "v1.0.0"}, {"name": "v0.9.0"}])),
                "/dependency-graph/sbom" => ApiOutcome::Success(json!({
                    "sbom": {"packages": [
                        {"name": "com.github.octo/demo"},
                        {"name": "pkg:cargo/serde"},
                        {"name": "actions:actions/checkout"}
                    ]}
                })),
                _ => ApiOutcome::NotFound,
            }
        });
        api
    }

    #[test]
    fn test_inclusion_needs_more_than_minimum() {
        let aggregator = RepoAggregator::new(Arc::new(MockFetch::new()), API);
        assert!(!aggregator.includes(None));
        assert!(!aggregator.includes(Some(0)));
        assert!(!aggregator.includes(Some(1)));
        assert!(aggregator.includes(Some(2)));

        let strict = RepoAggregator::new(Arc::new(MockFetch::new()), API).with_min_contributors(4);
        assert!(!strict.includes(Some(4)));
        assert!(strict.includes(Some(5)));
    }

    #[tokio::test]
    async fn test_single_contributor_makes_only_one_call() {
        for response in [
            ApiOutcome::Success(contributors(1)),
            ApiOutcome::Success(contributors(0)),
            ApiOutcome::NoContent,
            ApiOutcome::NotFound,
        ] {
            let mut api = MockFetch::new();
            api.expect_execute()
                .withf(|r| r.url == format!("{}/contributors", REPO))
                .times(1)
                .return_const(response);

            let aggregator = RepoAggregator::new(Arc::new(api), API);
            let enriched = aggregator.aggregate(candidate()).await;

            assert_eq!(enriched.repo, candidate());
            assert!(enriched.enrichment.filenames.is_none());
            assert!(enriched.enrichment.commits_count.is_none());
            assert!(enriched.enrichment.ci_cd_tool.is_none());
        }
    }

    #[tokio::test]
    async fn test_full_enrichment() {
        let aggregator = RepoAggregator::new(Arc::new(repo_api(&[])), API);
        let enrichment = aggregator.aggregate(candidate()).await.enrichment;

        assert_eq!(enrichment.contributor_count, Some(5));
        assert_eq!(
            enrichment.filenames,
            Some(vec![".github/workflows/ci.yml".to_string(), "README.md".to_string()])
        );
        assert_eq!(enrichment.ci_cd_tool, Some(CiTool::GitHubActions));
        assert_eq!(enrichment.commits_count, Some(3));
        assert_eq!(enrichment.issues_count, Some(IssueCounts { open: 1, closed: 2 }));
        assert_eq!(
            enrichment.pull_requests_count,
            Some(PullCounts {
                open: 1,
                closed: 2,
                merged: 1
            })
        );
        assert_eq!(
            enrichment.tags,
            Some(vec!["v1.0.0".to_string(), "v0.9.0".to_string()])
        );
        assert_eq!(
            enrichment.dependencies,
            Some(vec!["serde".to_string(), "checkout".to_string()])
        );
    }

    #[tokio::test]
    async fn test_failed_sub_fetch_only_empties_its_field() {
        let aggregator = RepoAggregator::new(Arc::new(repo_api(&["/commits", "/dependency-graph/sbom"])), API);
        let enrichment = aggregator.aggregate(candidate()).await.enrichment;

        assert_eq!(enrichment.commits_count, None);
        assert_eq!(enrichment.dependencies, None);
        assert_eq!(enrichment.contributor_count, Some(5));
        assert_eq!(enrichment.ci_cd_tool, Some(CiTool::GitHubActions));
        assert!(enrichment.issues_count.is_some());
        assert!(enrichment.pull_requests_count.is_some());
        assert!(enrichment.tags.is_some());
    }

    #[tokio::test]
    async fn test_enriching_sink_forwards_rows() {
        let aggregator = RepoAggregator::new(Arc::new(repo_api(&[])), API);
        let mut out: Vec<EnrichedRepoRow> = Vec::new();

        {
            let mut sink = EnrichingSink::new(&aggregator, &mut out);
            sink.write(candidate()).await.unwrap();
        }

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].enrichment.contributor_count, Some(5));
    }
}
