use repominer_api::types::{GitHubRepo, UserProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::sink::{CsvRecord, CsvRow, FromCsvRow};
use crate::{Error, Result};

/// A user found by `/search/users`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub login: String,
    /// API url of the user, `{url}/repos` lists their repositories
    pub url: String,
}

/// Repository candidate, one row of the repos dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRow {
    pub login: String,
    pub repo_name: String,
    pub repo_html_url: String,
    pub language: Option<String>,
    /// Comma-space joined, as written to the CSV
    pub topics: String,
    pub repo_description: Option<String>,
    pub open_issues_count: u64,
    pub forks_count: u64,
    pub stargazers_count: u64,
    pub last_repo_commit_date: Option<String>,
    pub license: Option<String>,
}

impl RepoRow {
    /// Row for a repository found through search, owned by whoever owns it
    pub fn from_search(repo: GitHubRepo) -> Self {
        let login = repo.owner.login.clone();
        Self::build(login, repo)
    }

    /// Row for a repository listed under a user we already know
    ///
    /// Notebooks are counted as Python, that is what they almost always are.
    pub fn from_owned(login: &str, repo: GitHubRepo) -> Self {
        let mut row = Self::build(login.to_string(), repo);
        if row.language.as_deref() == Some("Jupyter Notebook") {
            row.language = Some("Python".to_string());
        }
        row
    }

    fn build(login: String, repo: GitHubRepo) -> Self {
        Self {
            login,
            repo_name: repo.name,
            repo_html_url: repo.html_url,
            language: repo.language,
            topics: repo.topics.join(", "),
            repo_description: repo.description,
            open_issues_count: repo.open_issues_count,
            forks_count: repo.forks_count,
            stargazers_count: repo.stargazers_count,
            last_repo_commit_date: repo.updated_at,
            license: repo.license.and_then(|l| l.name),
        }
    }

    /// `(owner, name)` taken from the html url, falling back to the row fields
    pub fn owner_and_name(&self) -> (String, String) {
        let mut segments = self
            .repo_html_url
            .trim_end_matches('/')
            .rsplit('/')
            .filter(|s| !s.is_empty());

        match (segments.next(), segments.next()) {
            (Some(name), Some(owner)) if !owner.contains(':') => {
                (owner.to_string(), name.to_string())
            }
            _ => (self.login.clone(), self.repo_name.clone()),
        }
    }

    /// Topics split back into a list
    pub fn topic_list(&self) -> Vec<String> {
        self.topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCounts {
    pub open: usize,
    pub closed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullCounts {
    pub open: usize,
    pub closed: usize,
    pub merged: usize,
}

/// CI systems we recognise from configuration files, in detection precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CiTool {
    Travis,
    GitLabCi,
    Drone,
    CircleCi,
    GitHubActions,
    Jenkins,
}

impl CiTool {
    pub const PRECEDENCE: [CiTool; 6] = [
        CiTool::Travis,
        CiTool::GitLabCi,
        CiTool::Drone,
        CiTool::CircleCi,
        CiTool::GitHubActions,
        CiTool::Jenkins,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CiTool::Travis => "Travis CI",
            CiTool::GitLabCi => "GitLab CI",
            CiTool::Drone => "Drone CI",
            CiTool::CircleCi => "CircleCI",
            CiTool::GitHubActions => "GitHub Actions",
            CiTool::Jenkins => "Jenkins",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::PRECEDENCE.into_iter().find(|tool| tool.label() == label)
    }
}

impl std::fmt::Display for CiTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything the aggregator adds on top of a candidate
///
/// All optional: a failed sub-fetch leaves its field empty, and excluded
/// repositories only ever get `contributor_count`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub contributor_count: Option<usize>,
    pub filenames: Option<Vec<String>>,
    pub commits_count: Option<usize>,
    pub issues_count: Option<IssueCounts>,
    pub pull_requests_count: Option<PullCounts>,
    pub tags: Option<Vec<String>>,
    pub dependencies: Option<Vec<String>>,
    pub ci_cd_tool: Option<CiTool>,
}

/// Aggregate repository record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRepoRow {
    pub repo: RepoRow,
    pub enrichment: Enrichment,
}

/// Public profile of a repository owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub login: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub repos_num: u64,
    pub gists_num: u64,
    pub followers: u64,
    pub following: u64,
    pub last_user_commit: Option<String>,
}

impl From<UserProfile> for ProfileRow {
    fn from(profile: UserProfile) -> Self {
        Self {
            login: profile.login,
            name: profile.name,
            company: profile.company,
            location: profile.location,
            bio: profile.bio,
            repos_num: profile.public_repos,
            gists_num: profile.public_gists,
            followers: profile.followers,
            following: profile.following,
            last_user_commit: profile.updated_at,
        }
    }
}

/// A repository and the contributors living in a given place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalContributorsRow {
    pub repo: RepoRow,
    pub local_contributors: Option<Vec<String>>,
}

/// Databases spotted in a repository, keyed by database with the evidence source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRow {
    pub login: String,
    pub repo_name: String,
    pub repo_html_url: String,
    pub database_type: BTreeMap<String, String>,
}

// --- CSV mapping -----------------------------------------------------------

const USER_COLUMNS: &[&str] = &["login", "url"];

const REPO_COLUMNS: &[&str] = &[
    "login",
    "repo_name",
    "repo_html_url",
    "language",
    "topics",
    "repo_description",
    "open_issues_count",
    "forks_count",
    "stargazers_count",
    "last_repo_commit_date",
    "license",
];

const ENRICHED_COLUMNS: &[&str] = &[
    "login",
    "repo_name",
    "repo_html_url",
    "language",
    "topics",
    "repo_description",
    "open_issues_count",
    "forks_count",
    "stargazers_count",
    "last_repo_commit_date",
    "license",
    "contributor_count",
    "filenames",
    "commits_count",
    "issues_count",
    "pull_requests_count",
    "tags",
    "dependencies",
    "ci_cd_tool",
];

const PROFILE_COLUMNS: &[&str] = &[
    "login",
    "name",
    "company",
    "location",
    "bio",
    "repos_num",
    "gists_num",
    "followers",
    "following",
    "last_user_commit",
];

const LOCAL_COLUMNS: &[&str] = &[
    "login",
    "repo_name",
    "repo_html_url",
    "language",
    "topics",
    "repo_description",
    "open_issues_count",
    "forks_count",
    "stargazers_count",
    "last_repo_commit_date",
    "license",
    "local_contributors",
];

const DATABASE_COLUMNS: &[&str] = &["login", "repo_name", "repo_html_url", "database_type"];

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn opt_num<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// JSON-encode list/object columns; absent stays empty
fn json_col<T: Serialize>(value: Option<&T>) -> String {
    value
        .and_then(|v| serde_json::to_string(v).ok())
        .unwrap_or_default()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

fn parse_count(row: &CsvRow, column: &str) -> Result<u64> {
    let raw = row.get(column).unwrap_or("").trim();
    if raw.is_empty() {
        return Ok(0);
    }
    // pandas round-trips counts as floats ("12.0"), accept those too
    raw.parse::<u64>()
        .or_else(|_| raw.parse::<f64>().map(|f| f as u64))
        .map_err(|_| Error::InvalidRecord(format!("{} is not a count: {:?}", column, raw)))
}

fn parse_opt_count(row: &CsvRow, column: &str) -> Result<Option<usize>> {
    match row.get(column).map(str::trim) {
        None | Some("") => Ok(None),
        Some(_) => parse_count(row, column).map(|n| Some(n as usize)),
    }
}

fn parse_json_col<T: for<'de> Deserialize<'de>>(row: &CsvRow, column: &str) -> Result<Option<T>> {
    match row.get(column).map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
    }
}

impl CsvRecord for UserRow {
    fn header() -> &'static [&'static str] {
        USER_COLUMNS
    }

    fn fields(&self) -> Vec<String> {
        vec![self.login.clone(), self.url.clone()]
    }
}

impl FromCsvRow for UserRow {
    fn from_row(row: &CsvRow) -> Result<Self> {
        Ok(Self {
            login: row.required("login")?.to_string(),
            url: row.required("url")?.to_string(),
        })
    }
}

impl CsvRecord for RepoRow {
    fn header() -> &'static [&'static str] {
        REPO_COLUMNS
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.login.clone(),
            self.repo_name.clone(),
            self.repo_html_url.clone(),
            opt(&self.language),
            self.topics.clone(),
            opt(&self.repo_description),
            self.open_issues_count.to_string(),
            self.forks_count.to_string(),
            self.stargazers_count.to_string(),
            opt(&self.last_repo_commit_date),
            opt(&self.license),
        ]
    }
}

impl FromCsvRow for RepoRow {
    fn from_row(row: &CsvRow) -> Result<Self> {
        Ok(Self {
            login: row.required("login")?.to_string(),
            repo_name: row.required("repo_name")?.to_string(),
            repo_html_url: row.required("repo_html_url")?.to_string(),
            language: non_empty(row.get("language")),
            topics: row.get("topics").unwrap_or("").to_string(),
            repo_description: non_empty(row.get("repo_description")),
            open_issues_count: parse_count(row, "open_issues_count")?,
            forks_count: parse_count(row, "forks_count")?,
            stargazers_count: parse_count(row, "stargazers_count")?,
            last_repo_commit_date: non_empty(row.get("last_repo_commit_date")),
            license: non_empty(row.get("license")),
        })
    }
}

impl CsvRecord for EnrichedRepoRow {
    fn header() -> &'static [&'static str] {
        ENRICHED_COLUMNS
    }

    fn fields(&self) -> Vec<String> {
        let e = &self.enrichment;
        let mut fields = self.repo.fields();
        fields.extend([
            opt_num(e.contributor_count),
            json_col(e.filenames.as_ref()),
            opt_num(e.commits_count),
            json_col(e.issues_count.as_ref()),
            json_col(e.pull_requests_count.as_ref()),
            json_col(e.tags.as_ref()),
            json_col(e.dependencies.as_ref()),
            e.ci_cd_tool.map(|t| t.label().to_string()).unwrap_or_default(),
        ]);
        fields
    }
}

impl FromCsvRow for EnrichedRepoRow {
    fn from_row(row: &CsvRow) -> Result<Self> {
        let ci_cd_tool = match row.get("ci_cd_tool").map(str::trim) {
            None | Some("") => None,
            Some(label) => Some(CiTool::from_label(label).ok_or_else(|| {
                Error::InvalidRecord(format!("unknown CI tool {:?}", label))
            })?),
        };

        Ok(Self {
            repo: RepoRow::from_row(row)?,
            enrichment: Enrichment {
                contributor_count: parse_opt_count(row, "contributor_count")?,
                filenames: parse_json_col(row, "filenames")?,
                commits_count: parse_opt_count(row, "commits_count")?,
                issues_count: parse_json_col(row, "issues_count")?,
                pull_requests_count: parse_json_col(row, "pull_requests_count")?,
                tags: parse_json_col(row, "tags")?,
                dependencies: parse_json_col(row, "dependencies")?,
                ci_cd_tool,
            },
        })
    }
}

impl CsvRecord for ProfileRow {
    fn header() -> &'static [&'static str] {
        PROFILE_COLUMNS
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.login.clone(),
            opt(&self.name),
            opt(&self.company),
            opt(&self.location),
            opt(&self.bio),
            self.repos_num.to_string(),
            self.gists_num.to_string(),
            self.followers.to_string(),
            self.following.to_string(),
            opt(&self.last_user_commit),
        ]
    }
}

impl CsvRecord for LocalContributorsRow {
    fn header() -> &'static [&'static str] {
        LOCAL_COLUMNS
    }

    fn fields(&self) -> Vec<String> {
        let mut fields = self.repo.fields();
        fields.push(json_col(self.local_contributors.as_ref()));
        fields
    }
}

impl CsvRecord for DatabaseRow {
    fn header() -> &'static [&'static str] {
        DATABASE_COLUMNS
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.login.clone(),
            self.repo_name.clone(),
            self.repo_html_url.clone(),
            json_col(Some(&self.database_type)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github_repo(language: Option<&str>) -> GitHubRepo {
        serde_json::from_value(serde_json::json!({
            "name": "notebooks",
            "html_url": "https://github.com/octo/notebooks",
            "owner": {"login": "octo"},
            "description": "Data, with commas",
            "language": language,
            "topics": ["ml", "data"],
            "stargazers_count": 12,
            "forks_count": 3,
            "open_issues_count": 1,
            "updated_at": "2024-05-01T10:00:00Z",
            "license": {"key": "mit", "name": "MIT License"}
        }))
        .unwrap()
    }

    #[test]
    fn test_owned_repo_treats_notebooks_as_python() {
        let row = RepoRow::from_owned("someone", github_repo(Some("Jupyter Notebook")));
        assert_eq!(row.login, "someone");
        assert_eq!(row.language.as_deref(), Some("Python"));
        assert_eq!(row.topics, "ml, data");
        assert_eq!(row.license.as_deref(), Some("MIT License"));

        // search results keep the language verbatim
        let row = RepoRow::from_search(github_repo(Some("Jupyter Notebook")));
        assert_eq!(row.login, "octo");
        assert_eq!(row.language.as_deref(), Some("Jupyter Notebook"));
    }

    #[test]
    fn test_owner_and_name_from_url() {
        let row = RepoRow::from_search(github_repo(None));
        assert_eq!(
            row.owner_and_name(),
            ("octo".to_string(), "notebooks".to_string())
        );

        let mut odd = row.clone();
        odd.repo_html_url = "notebooks".to_string();
        assert_eq!(
            odd.owner_and_name(),
            ("octo".to_string(), "notebooks".to_string())
        );
    }

    #[test]
    fn test_enriched_fields_line_up_with_header() {
        let row = EnrichedRepoRow {
            repo: RepoRow::from_search(github_repo(Some("Rust"))),
            enrichment: Enrichment {
                contributor_count: Some(4),
                filenames: Some(vec!["src/main.rs".into()]),
                issues_count: Some(IssueCounts { open: 1, closed: 2 }),
                ci_cd_tool: Some(CiTool::GitHubActions),
                ..Enrichment::default()
            },
        };

        let fields = row.fields();
        assert_eq!(fields.len(), EnrichedRepoRow::header().len());
        assert_eq!(fields[11], "4");
        assert_eq!(fields[12], r#"["src/main.rs"]"#);
        assert_eq!(fields[13], "");
        assert_eq!(fields[14], r#"{"open":1,"closed":2}"#);
        assert_eq!(fields[18], "GitHub Actions");
    }

    #[test]
    fn test_ci_tool_labels_round_trip() {
        for tool in CiTool::PRECEDENCE {
            assert_eq!(CiTool::from_label(tool.label()), Some(tool));
        }
        assert_eq!(CiTool::from_label("Buildkite"), None);
    }
}
