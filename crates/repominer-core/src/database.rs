//! Database technology detection over an enriched repository row.
//!
//! Evidence is gathered from root-level manifest files, then topics, the
//! description and finally the primary language. Later sources overwrite
//! earlier ones for the same database.
use base64::Engine;
use regex::{Regex, RegexBuilder};
use repominer_api::types::FileContent;
use repominer_api::{ApiRequest, Fetch};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{DatabaseRow, EnrichedRepoRow};
use crate::sink::RecordSink;
use crate::tree::encode_path;
use crate::{Error, Result};

const BUILTIN_KEYWORDS: &str = include_str!("../data/database_keywords.json");

/// Root-level files worth opening
pub const DB_FILES: &[&str] = &[
    "requirements.txt",
    "schema.sql",
    "pom.xml",
    "Pipfile",
    "database.yml",
    ".env",
    ".env.example",
    "database.config",
    "config.yml",
    "pyproject.toml",
    "package.json",
    "docker-compose.yml",
    "Gemfile",
    "go.mod",
    "build.gradle",
    "settings.py",
    "init.sql",
];

/// Primary languages that are themselves a database
pub const DB_LANGUAGES: &[&str] = &[
    "SQL", "TSQL", "PLSQL", "PL/pgSQL", "MongoDB", "Cypher", "CQL", "NoSQL", "DynamoDB",
];

pub const SOURCE_TOPICS: &str = "repo_topics";
pub const SOURCE_DESCRIPTION: &str = "repo_description";

/// Database name to keywords, in file order
///
/// Order matters: within one text the first database that matches wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMap(Vec<(String, Vec<String>)>);

impl KeywordMap {
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_KEYWORDS)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let map = Self::from_json(&contents)?;
        info!("Loaded {} database keyword sets", map.0.len());
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for KeywordMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = KeywordMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of database name to keyword list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((db, keywords)) = access.next_entry::<String, Vec<String>>()? {
                    entries.push((db, keywords));
                }
                Ok(KeywordMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

pub struct DatabaseDetector {
    api: Arc<dyn Fetch>,
    api_base: String,
    patterns: Vec<(String, Regex)>,
}

impl DatabaseDetector {
    pub fn new(api: Arc<dyn Fetch>, api_base: impl Into<String>, keywords: KeywordMap) -> Result<Self> {
        let patterns = keywords
            .0
            .into_iter()
            .filter(|(_, words)| !words.is_empty())
            .map(|(db, words)| {
                let alternation = words
                    .iter()
                    .map(|w| regex::escape(w))
                    .collect::<Vec<_>>()
                    .join("|");
                RegexBuilder::new(&format!(r"\b(?:{})\b", alternation))
                    .case_insensitive(true)
                    .build()
                    .map(|re| (db, re))
                    .map_err(|e| Error::ConfigError(format!("Invalid keywords: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            api,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            patterns,
        })
    }

    /// First database, in keyword-map order, mentioned in `text`
    pub fn search_text(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(db, _)| db.as_str())
    }

    pub async fn detect(&self, row: &EnrichedRepoRow) -> BTreeMap<String, String> {
        let mut found = BTreeMap::new();
        let repo = &row.repo;

        for (file, content) in self.root_files(row).await {
            if let Some(db) = self.search_text(&content) {
                found.insert(db.to_string(), file);
            }
        }

        for topic in repo.topic_list() {
            if let Some(db) = self.search_text(&topic) {
                found.insert(db.to_string(), SOURCE_TOPICS.to_string());
            }
        }

        if let Some(db) = repo
            .repo_description
            .as_deref()
            .and_then(|description| self.search_text(description))
        {
            found.insert(db.to_string(), SOURCE_DESCRIPTION.to_string());
        }

        if let Some(language) = repo
            .language
            .as_deref()
            .filter(|language| DB_LANGUAGES.contains(language))
        {
            found.insert(language.to_string(), language.to_string());
        }

        found
    }

    pub async fn collect<I, S>(&self, rows: I, sink: &mut S) -> Result<usize>
    where
        I: IntoIterator<Item = Result<EnrichedRepoRow>>,
        S: RecordSink<DatabaseRow> + ?Sized,
    {
        let mut written = 0;
        for row in rows {
            let row = row?;
            let database_type = self.detect(&row).await;
            info!(
                "{}/{}: {:?}",
                row.repo.login,
                row.repo.repo_name,
                database_type.keys().collect::<Vec<_>>()
            );

            let repo = row.repo;
            sink.write(DatabaseRow {
                login: repo.login,
                repo_name: repo.repo_name,
                repo_html_url: repo.repo_html_url,
                database_type,
            })
            .await?;
            written += 1;
        }
        Ok(written)
    }

    /// `(file name, decoded text)` for every known file at the repository root
    async fn root_files(&self, row: &EnrichedRepoRow) -> Vec<(String, String)> {
        let Some(filenames) = row.enrichment.filenames.as_deref() else {
            return Vec::new();
        };
        let (owner, name) = row.repo.owner_and_name();

        let mut files = Vec::new();
        for known in DB_FILES {
            let Some(path) = filenames.iter().find(|f| f.eq_ignore_ascii_case(known)) else {
                continue;
            };

            let url = format!(
                "{}/repos/{}/{}/contents/{}",
                self.api_base,
                owner,
                name,
                encode_path(path)
            );
            let content = self
                .api
                .execute(&ApiRequest::get(url))
                .await
                .into_payload()
                .and_then(|payload| serde_json::from_value::<FileContent>(payload).ok())
                .and_then(|file| decode_content(&file));

            match content {
                Some(text) => files.push((known.to_string(), text)),
                None => debug!(
                    "File content not available or not base64 encoded for {} in {}",
                    known, row.repo.repo_name
                ),
            }
        }
        files
    }
}

/// Text of a base64 `contents` payload; the API wraps the encoding at 60 columns
fn decode_content(file: &FileContent) -> Option<String> {
    if file.encoding.as_deref() != Some("base64") {
        return None;
    }
    // GitHub line-wraps the base64, and the decoder hates that
    let packed: String = file
        .content
        .as_deref()?
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = match base64::engine::general_purpose::STANDARD.decode(packed) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("Undecodable file content: {}", err);
            return None;
        }
    };
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Enrichment, RepoRow};
    use repominer_api::{ApiOutcome, MockFetch};
    use serde_json::json;

    const API: &str = "https://api.github.com";

    fn keywords() -> KeywordMap {
        KeywordMap::from_json(
            r#"{
                "PostgreSQL": ["postgres", "psycopg2"],
                "MySQL": ["mysql"],
                "Redis": ["redis"]
            }"#,
        )
        .unwrap()
    }

    fn row(filenames: Option<Vec<&str>>) -> EnrichedRepoRow {
        EnrichedRepoRow {
            repo: RepoRow {
                login: "octo".into(),
                repo_name: "shop".into(),
                repo_html_url: "https://github.com/octo/shop".into(),
                language: Some("PLSQL".into()),
                topics: "caching, redis".into(),
                repo_description: Some("A shop backed by MySQL".into()),
                open_issues_count: 0,
                forks_count: 0,
                stargazers_count: 0,
                last_repo_commit_date: None,
                license: None,
            },
            enrichment: Enrichment {
                filenames: filenames.map(|f| f.into_iter().map(String::from).collect()),
                ..Enrichment::default()
            },
        }
    }

    fn base64_file(text: &str) -> ApiOutcome {
        let encoded = base64::engine::general_purpose::STANDARD.encode(text);
        // wrapped like the real API
        let wrapped = encoded
            .as_bytes()
            .chunks(8)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        ApiOutcome::Success(json!({"content": wrapped, "encoding": "base64"}))
    }

    #[test]
    fn test_keyword_map_keeps_file_order() {
        let map = keywords();
        let names: Vec<&str> = map.0.iter().map(|(db, _)| db.as_str()).collect();
        assert_eq!(names, vec!["PostgreSQL", "MySQL", "Redis"]);
        assert!(KeywordMap::builtin().unwrap().len() > 10);
        assert!(KeywordMap::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_search_is_whole_word_and_case_insensitive() {
        let detector = DatabaseDetector::new(Arc::new(MockFetch::new()), API, keywords()).unwrap();

        assert_eq!(detector.search_text("uses PSYCOPG2 heavily"), Some("PostgreSQL"));
        assert_eq!(detector.search_text("redis-py==5.0"), Some("Redis"));
        assert_eq!(detector.search_text("postgresql"), None);
        assert_eq!(detector.search_text("mysqlish"), None);
        // first in map order wins
        assert_eq!(detector.search_text("mysql and postgres"), Some("PostgreSQL"));
    }

    #[tokio::test]
    async fn test_detect_combines_every_source() {
        let mut api = MockFetch::new();
        api.expect_execute()
            .withf(|r| r.url == "https://api.github.com/repos/octo/shop/contents/Requirements.txt")
            .times(1)
            .returning(|_| base64_file("flask==3.0\npsycopg2-binary==2.9\n"));
        api.expect_execute()
            .withf(|r| r.url == "https://api.github.com/repos/octo/shop/contents/.env")
            .times(1)
            .returning(|_| ApiOutcome::NotFound);

        let detector = DatabaseDetector::new(Arc::new(api), API, keywords()).unwrap();
        let found = detector
            .detect(&row(Some(vec!["Requirements.txt", ".env", "src/schema.sql", "README.md"])))
            .await;

        let expected: BTreeMap<String, String> = [
            ("PostgreSQL", "requirements.txt"),
            ("Redis", "repo_topics"),
            ("MySQL", "repo_description"),
            ("PLSQL", "PLSQL"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn test_missing_filenames_make_no_requests() {
        let detector = DatabaseDetector::new(Arc::new(MockFetch::new()), API, keywords()).unwrap();
        let mut rows: Vec<DatabaseRow> = Vec::new();

        let written = detector.collect(vec![Ok(row(None))], &mut rows).await.unwrap();

        assert_eq!(written, 1);
        assert_eq!(rows[0].repo_name, "shop");
        assert_eq!(rows[0].database_type.len(), 3);
    }

    #[test]
    fn test_decode_rejects_other_encodings() {
        let file = FileContent {
            content: Some("plain".into()),
            encoding: Some("none".into()),
        };
        assert_eq!(decode_content(&file), None);

        let file = FileContent {
            content: Some("aGVs\nbG8=\n".into()),
            encoding: Some("base64".into()),
        };
        assert_eq!(decode_content(&file).as_deref(), Some("hello"));
    }
}
