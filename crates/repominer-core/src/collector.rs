//! Paginated collection from the search endpoints.
//!
//! The collector walks pages one at a time, projecting each item onto a
//! record and handing it to a sink straight away. Nothing is buffered beyond
//! the page currently being written.
use repominer_api::types::{GitHubRepo, SearchPage};
use repominer_api::{ApiOutcome, ApiRequest, Fetch, OutcomeKind};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SearchConfig;
use crate::models::{RepoRow, UserRow};
use crate::sink::RecordSink;
use crate::Result;

/// A search endpoint plus the query parameters that stay fixed across pages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub endpoint: String,
    pub q: String,
    pub sort: String,
    pub order: String,
    pub per_page: u32,
}

impl SearchQuery {
    pub fn users(api_base: &str, config: &SearchConfig) -> Self {
        Self::build(api_base, "search/users", &config.users_query, config)
    }

    pub fn repositories(api_base: &str, config: &SearchConfig) -> Self {
        Self::build(api_base, "search/repositories", &config.repos_query, config)
    }

    fn build(api_base: &str, path: &str, q: &str, config: &SearchConfig) -> Self {
        Self {
            endpoint: format!("{}/{}", api_base.trim_end_matches('/'), path),
            q: q.to_string(),
            sort: config.sort.clone(),
            order: config.order.clone(),
            per_page: config.per_page,
        }
    }

    /// Override the search expression
    pub fn with_query(mut self, q: impl Into<String>) -> Self {
        self.q = q.into();
        self
    }

    pub fn request(&self, page: u32) -> ApiRequest {
        ApiRequest::get(&self.endpoint)
            .query("q", &self.q)
            .query("sort", &self.sort)
            .query("order", &self.order)
            .query("per_page", self.per_page)
            .query("page", page)
    }
}

/// Pagination state
///
/// The page only moves forward, and the first total count we see is the
/// one we trust for working out the last page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    page: u32,
    per_page: u32,
    total_count: Option<u64>,
}

impl PageCursor {
    pub fn new(start_page: u32, per_page: u32) -> Self {
        Self {
            page: start_page.max(1),
            per_page: per_page.max(1),
            total_count: None,
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    /// Returns true the first time a total is recorded
    pub fn observe_total(&mut self, total_count: u64) -> bool {
        if self.total_count.is_some() {
            return false;
        }
        self.total_count = Some(total_count);
        true
    }

    /// `ceil(total / per_page)`, once the total is known
    pub fn last_page(&self) -> Option<u64> {
        self.total_count
            .map(|total| total.div_ceil(u64::from(self.per_page)))
    }

    pub fn advance(&mut self) {
        self.page += 1;
    }

    pub fn is_exhausted(&self) -> bool {
        self.last_page()
            .is_some_and(|last| u64::from(self.page) > last)
    }
}

/// Why a collection loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Walked past the last page
    Exhausted,
    /// Wrote as many rows as asked for
    TargetReached,
    /// The API returned a page without items
    EmptyPage,
    /// The page payload did not look like a search result
    MalformedPage,
    /// A non-success outcome; the client already retried what it could
    Outcome(OutcomeKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectSummary {
    pub pages_fetched: u32,
    pub rows_written: usize,
    /// Page the loop would request next, handy as a resume point
    pub next_page: u32,
    pub total_count: Option<u64>,
    pub stop: StopReason,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OwnedReposSummary {
    pub users_visited: usize,
    pub users_failed: usize,
    pub rows_written: usize,
}

/// Drives the request client across pages
pub struct Collector {
    api: Arc<dyn Fetch>,
}

impl Collector {
    pub fn new(api: Arc<dyn Fetch>) -> Self {
        Self { api }
    }

    /// Walk `query` from `start_page`, writing projected items to `sink`
    ///
    /// Stops after the last page, after `target` rows (possibly mid-page), or
    /// on the first non-success outcome. Only sink errors are returned.
    pub async fn collect<R, S, P>(
        &self,
        query: &SearchQuery,
        start_page: u32,
        target: Option<usize>,
        sink: &mut S,
        mut project: P,
    ) -> Result<CollectSummary>
    where
        R: Send + 'static,
        S: RecordSink<R> + ?Sized,
        P: FnMut(Value) -> Option<R>,
    {
        // Pages are fetched one after another like a sensible person would do,
        // the search API gets grumpy fast enough as it is
        let mut cursor = PageCursor::new(start_page, query.per_page);
        let mut pages_fetched = 0;
        let mut rows_written = 0usize;
        let target_reached = |rows: usize| target.is_some_and(|t| rows >= t);

        let stop = 'pages: loop {
            if target_reached(rows_written) {
                break StopReason::TargetReached;
            }

            let outcome = self.api.execute(&query.request(cursor.page())).await;
            let payload = match outcome {
                ApiOutcome::Success(payload) => payload,
                other => {
                    warn!(
                        "Stopping collection at page {}: {}",
                        cursor.page(),
                        other.kind()
                    );
                    break StopReason::Outcome(other.kind());
                }
            };
            pages_fetched += 1;

            let page: SearchPage = match serde_json::from_value(payload) {
                Ok(page) => page,
                Err(err) => {
                    warn!("Unexpected search payload on page {}: {}", cursor.page(), err);
                    break StopReason::MalformedPage;
                }
            };

            if cursor.observe_total(page.total_count) {
                info!("Total results found: {}", page.total_count);
            }
            if page.items.is_empty() {
                break StopReason::EmptyPage;
            }

            for item in page.items {
                let Some(record) = project(item) else {
                    warn!("Skipping item on page {} that does not fit the schema", cursor.page());
                    continue;
                };
                sink.write(record).await?;
                rows_written += 1;

                if target_reached(rows_written) {
                    // got what we came for, the rest of the page can go
                    cursor.advance();
                    break 'pages StopReason::TargetReached;
                }
            }

            info!("Scraped page number {}", cursor.page());
            cursor.advance();

            if cursor.is_exhausted() {
                info!("Finished all the pages!");
                break StopReason::Exhausted;
            }
        };

        Ok(CollectSummary {
            pages_fetched,
            rows_written,
            next_page: cursor.page(),
            total_count: cursor.total_count(),
            stop,
        })
    }

    /// `/search/users` into `login,url` rows
    pub async fn collect_users<S>(
        &self,
        query: &SearchQuery,
        start_page: u32,
        target: Option<usize>,
        sink: &mut S,
    ) -> Result<CollectSummary>
    where
        S: RecordSink<UserRow> + ?Sized,
    {
        self.collect(query, start_page, target, sink, |item| {
            serde_json::from_value::<UserRow>(item).ok()
        })
        .await
    }

    /// `/search/repositories` into repository rows
    pub async fn collect_repositories<S>(
        &self,
        query: &SearchQuery,
        start_page: u32,
        target: Option<usize>,
        sink: &mut S,
    ) -> Result<CollectSummary>
    where
        S: RecordSink<RepoRow> + ?Sized,
    {
        self.collect(query, start_page, target, sink, |item| {
            serde_json::from_value::<GitHubRepo>(item)
                .ok()
                .map(RepoRow::from_search)
        })
        .await
    }

    /// For every user, list `{url}/repos` (first page) into repository rows
    ///
    /// Callers resume by skipping users already processed.
    pub async fn collect_owned_repos<I, S>(&self, users: I, sink: &mut S) -> Result<OwnedReposSummary>
    where
        I: IntoIterator<Item = Result<UserRow>>,
        S: RecordSink<RepoRow> + ?Sized,
    {
        let mut summary = OwnedReposSummary::default();

        for user in users {
            let user = user?;
            summary.users_visited += 1;

            let url = format!("{}/repos", user.url.trim_end_matches('/'));
            let repos = self
                .api
                .execute(&ApiRequest::get(url))
                .await
                .into_payload()
                .and_then(|payload| serde_json::from_value::<Vec<GitHubRepo>>(payload).ok());

            let Some(repos) = repos else {
                info!("No repos for {}", user.login);
                summary.users_failed += 1;
                continue;
            };

            for repo in repos {
                sink.write(RepoRow::from_owned(&user.login, repo)).await?;
                summary.rows_written += 1;
            }
            info!("Scraped all `{}` repos", user.login);
        }

        Ok(summary)
    }
}
