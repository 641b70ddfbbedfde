// GitHub REST payloads we read. Fields we never look at are simply not declared.
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of `/search/users` or `/search/repositories`
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    pub total_count: u64,
    #[serde(default)]
    pub items: Vec<Value>,
}

/// Repository object as returned by search and `/users/{login}/repos`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRepo {
    pub name: String,
    pub html_url: String,
    pub owner: RepoOwner,
    pub description: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    pub updated_at: Option<String>,
    pub license: Option<RepoLicense>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoOwner {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoLicense {
    pub name: Option<String>,
}

/// Entry of a `/contents/{path}` directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    // symlink, submodule
    #[serde(other)]
    Other,
}

/// `/contents/{file}` for a single file
#[derive(Debug, Clone, Deserialize)]
pub struct FileContent {
    pub content: Option<String>,
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contributor {
    // anonymous contributors have no login
    pub login: Option<String>,
}

/// Issues and pull requests share the bits we count
#[derive(Debug, Clone, Deserialize)]
pub struct IssueState {
    pub state: String,
    #[serde(default)]
    pub merged_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub name: String,
}

/// `/dependency-graph/sbom` envelope
#[derive(Debug, Clone, Deserialize)]
pub struct SbomEnvelope {
    pub sbom: Sbom,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sbom {
    #[serde(default)]
    pub packages: Vec<SbomPackage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SbomPackage {
    pub name: String,
}

/// `/users/{login}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub login: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    #[serde(default)]
    pub public_repos: u64,
    #[serde(default)]
    pub public_gists: u64,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub following: u64,
    pub updated_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_entry_kinds() {
        let entries: Vec<ContentEntry> = serde_json::from_value(serde_json::json!([
            {"name": "src", "path": "src", "type": "dir", "sha": "abc"},
            {"name": "main.rs", "path": "src/main.rs", "type": "file"},
            {"name": "vendor", "path": "vendor", "type": "submodule"}
        ]))
        .unwrap();

        assert_eq!(entries[0].kind, EntryKind::Dir);
        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[2].kind, EntryKind::Other);
    }

    #[test]
    fn test_repo_tolerates_missing_optionals() {
        let repo: GitHubRepo = serde_json::from_value(serde_json::json!({
            "name": "repo",
            "html_url": "https://github.com/octo/repo",
            "owner": {"login": "octo", "id": 1},
            "description": null,
            "language": null,
            "updated_at": "2024-01-01T00:00:00Z",
            "license": null
        }))
        .unwrap();

        assert!(repo.topics.is_empty());
        assert_eq!(repo.stargazers_count, 0);
        assert!(repo.license.is_none());
    }
}
