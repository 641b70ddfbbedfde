//! Lazy, depth-first walk over a repository's `contents` tree.
//!
//! Paths come out in the same order a recursive descent would produce them:
//! a directory's subtree is emitted right where the directory sits in its
//! parent's listing. Directories are only listed once the consumer pulls
//! past them.
use futures::stream::{self, Stream};
use repominer_api::types::{ContentEntry, EntryKind};
use repominer_api::{ApiRequest, Fetch};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::FilterConfig;

/// Which files to report and which directories to skip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    excluded_extensions: Vec<String>,
    excluded_dirs: Vec<String>,
}

impl PathFilter {
    pub fn new(excluded_extensions: Vec<String>, excluded_dirs: Vec<String>) -> Self {
        Self {
            excluded_extensions: excluded_extensions
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
            excluded_dirs: excluded_dirs.into_iter().map(|d| d.to_lowercase()).collect(),
        }
    }

    pub fn keeps_file(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        !self
            .excluded_extensions
            .iter()
            .any(|ext| name.ends_with(ext.as_str()))
    }

    pub fn enters_dir(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        !self.excluded_dirs.iter().any(|dir| *dir == name)
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::from(&FilterConfig::default())
    }
}

impl From<&FilterConfig> for PathFilter {
    fn from(config: &FilterConfig) -> Self {
        Self::new(
            config.excluded_extensions.clone(),
            config.excluded_dirs.clone(),
        )
    }
}

/// Percent-encode each segment, keep the separators
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walks one repository. Not restartable: build a new one to walk again.
pub struct TreeWalker {
    api: Arc<dyn Fetch>,
    repo_url: String,
    filter: PathFilter,
    root: Option<String>,
    /// Unvisited entries of every directory on the current descent path
    stack: Vec<VecDeque<ContentEntry>>,
}

impl TreeWalker {
    /// `repo_url` is the API url of the repository, `.../repos/{owner}/{name}`
    pub fn new(api: Arc<dyn Fetch>, repo_url: impl Into<String>, filter: PathFilter) -> Self {
        Self::from_path(api, repo_url, filter, "")
    }

    /// Start the walk below `root` instead of at the top of the repository
    pub fn from_path(
        api: Arc<dyn Fetch>,
        repo_url: impl Into<String>,
        filter: PathFilter,
        root: impl Into<String>,
    ) -> Self {
        Self {
            api,
            repo_url: repo_url.into().trim_end_matches('/').to_string(),
            filter,
            root: Some(root.into()),
            stack: Vec::new(),
        }
    }

    /// Next file path, fetching directory listings as needed
    pub async fn next_path(&mut self) -> Option<String> {
        if let Some(root) = self.root.take() {
            if let Some(entries) = self.list(&root).await {
                self.stack.push(entries);
            }
        }

        loop {
            let frame = self.stack.last_mut()?;
            let Some(entry) = frame.pop_front() else {
                self.stack.pop();
                continue;
            };

            match entry.kind {
                EntryKind::File if self.filter.keeps_file(&entry.name) => {
                    return Some(entry.path);
                }
                EntryKind::Dir if self.filter.enters_dir(&entry.name) => {
                    if let Some(entries) = self.list(&entry.path).await {
                        self.stack.push(entries);
                    }
                }
                // symlinks, submodules and thumbnails nobody asked for
                _ => debug!(path = %entry.path, "Skipping entry"),
            }
        }
    }

    /// The walk as a stream of paths
    pub fn into_stream(self) -> impl Stream<Item = String> + Send {
        stream::unfold(self, |mut walker| async move {
            walker.next_path().await.map(|path| (path, walker))
        })
    }

    /// Drain the whole walk
    pub async fn collect_paths(mut self) -> Vec<String> {
        let mut paths = Vec::new();
        while let Some(path) = self.next_path().await {
            paths.push(path);
        }
        paths
    }

    async fn list(&self, directory: &str) -> Option<VecDeque<ContentEntry>> {
        let url = format!("{}/contents/{}", self.repo_url, encode_path(directory));
        let outcome = self.api.execute(&ApiRequest::get(url)).await;

        let Some(payload) = outcome.into_payload() else {
            warn!("Failed to retrieve content for directory: {:?}", directory);
            return None;
        };

        match serde_json::from_value::<Vec<ContentEntry>>(payload) {
            Ok(entries) => Some(entries.into()),
            Err(err) => {
                warn!("Unexpected listing for directory {:?}: {}", directory, err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use repominer_api::{ApiOutcome, MockFetch};
    use serde_json::json;

    const REPO: &str = "https://api.github.com/repos/octo/demo";

    fn file(path: &str) -> serde_json::Value {
        let name = path.rsplit('/').next().unwrap();
        json!({"name": name, "path": path, "type": "file"})
    }

    fn dir(path: &str) -> serde_json::Value {
        let name = path.rsplit('/').next().unwrap();
        json!({"name": name, "path": path, "type": "dir"})
    }

    /// A mock that serves listings from a fixed table and fails everything else
    fn tree_api(listings: Vec<(&'static str, serde_json::Value)>) -> MockFetch {
        let mut api = MockFetch::new();
        api.expect_execute().returning(move |request| {
            listings
                .iter()
                .find(|(dir, _)| request.url == format!("{}/contents/{}", REPO, dir))
                .map(|(_, listing)| ApiOutcome::Success(listing.clone()))
                .unwrap_or(ApiOutcome::NotFound)
        });
        api
    }

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(encode_path(""), "");
        assert_eq!(encode_path("src/My File#1.cs"), "src/My%20File%231.cs");
        assert_eq!(encode_path("a&b/c"), "a%26b/c");
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let filter = PathFilter::default();
        assert!(!filter.keeps_file("Logo.PNG"));
        assert!(!filter.keeps_file("cache.cpython-311.pyc"));
        assert!(filter.keeps_file("README.md"));
        assert!(!filter.enters_dir("Images"));
        assert!(!filter.enters_dir("__pycache__"));
        assert!(filter.enters_dir("src"));
    }

    #[tokio::test]
    async fn test_walk_is_depth_first_in_listing_order() {
        let api = tree_api(vec![
            ("", json!([file("README.md"), dir("src"), file("setup.py")])),
            ("src", json!([dir("src/core"), file("src/app.py")])),
            ("src/core", json!([file("src/core/engine.py")])),
        ]);

        let walker = TreeWalker::new(Arc::new(api), REPO, PathFilter::default());
        let paths = walker.collect_paths().await;

        assert_eq!(
            paths,
            vec!["README.md", "src/core/engine.py", "src/app.py", "setup.py"]
        );
    }

    #[tokio::test]
    async fn test_excluded_names_are_skipped_at_any_depth() {
        let api = tree_api(vec![
            ("", json!([dir("a"), file("logo.png"), dir("images")])),
            ("a", json!([dir("a/b"), file("a/photo.JPG")])),
            ("a/b", json!([dir("a/b/IMGS"), dir("a/b/__pycache__"), file("a/b/keep.rs")])),
            ("a/b/IMGS", json!([file("a/b/IMGS/never.rs")])),
            ("a/b/__pycache__", json!([file("a/b/__pycache__/never.rs")])),
            ("images", json!([file("images/never.rs")])),
        ]);

        let walker = TreeWalker::new(Arc::new(api), REPO, PathFilter::default());
        let paths = walker.collect_paths().await;

        assert_eq!(paths, vec!["a/b/keep.rs"]);
    }

    #[tokio::test]
    async fn test_failed_subtree_does_not_abort_walk() {
        let api = tree_api(vec![
            ("", json!([dir("broken"), file("main.go"), dir("ok")])),
            ("ok", json!([file("ok/util.go")])),
        ]);

        let walker = TreeWalker::new(Arc::new(api), REPO, PathFilter::default());
        assert_eq!(walker.collect_paths().await, vec!["main.go", "ok/util.go"]);
    }

    #[tokio::test]
    async fn test_walk_is_lazy() {
        let mut api = MockFetch::new();
        api.expect_execute()
            .withf(|request| request.url == format!("{}/contents/", REPO))
            .times(1)
            .returning(|_| ApiOutcome::Success(json!([file("first.rs"), dir("deep")])));

        // only the root listing may be fetched to produce the first path
        let mut walker = TreeWalker::new(Arc::new(api), REPO, PathFilter::default());
        assert_eq!(walker.next_path().await.as_deref(), Some("first.rs"));
    }

    #[tokio::test]
    async fn test_stream_yields_same_paths() {
        let api = tree_api(vec![("", json!([file("a.rs"), file("b.rs")]))]);

        let stream = TreeWalker::new(Arc::new(api), REPO, PathFilter::default()).into_stream();
        let paths: Vec<String> = stream.collect().await;

        assert_eq!(paths, vec!["a.rs", "b.rs"]);
    }
}
