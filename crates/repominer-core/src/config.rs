use repominer_api::{Credential, RetryConfig, GITHUB_API_BASE, MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variables checked for the token, in order
pub const TOKEN_ENV_VARS: [&str; 2] = ["GITHUB_TOKEN", "YOUR_GITHUB_TOKEN"];

/// Main configuration structure
///
/// Loaded from a TOML file; anything missing falls back to defaults.
/// The token never lives here, it comes from the environment or the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub github: GitHubConfig,
    pub retry: RetryConfig,
    pub search: SearchConfig,
    pub filters: FilterConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from an explicit path, or the default location if there is one
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::config_path() {
                Ok(path) => path,
                // No config dir at all (containers, CI)? Defaults it is
                Err(_) => return Ok(Self::default()),
            },
        };

        let config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&contents)?
        } else if path.is_some() {
            return Err(crate::Error::ConfigError(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        toml::from_str(contents)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Reject settings the API or the retry loop cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if !(1..=100).contains(&self.search.per_page) {
            return Err(crate::Error::ConfigError(format!(
                "search.per_page must be between 1 and 100, got {}",
                self.search.per_page
            )));
        }
        if !(1..=MAX_ATTEMPTS).contains(&self.retry.max_attempts) {
            return Err(crate::Error::ConfigError(format!(
                "retry.max_attempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS, self.retry.max_attempts
            )));
        }
        Ok(())
    }

    /// Get the config file path
    /// Uses XDG on Linux/macOS, AppData on Windows
    fn config_path() -> crate::Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find config directory".into()))?
            .join("repominer");

        Ok(config_dir.join("config.toml"))
    }
}

/// Resolve the credential: explicit value first, then the environment
///
/// A missing token is the one thing that stops a run before it starts.
pub fn resolve_credential(explicit: Option<&str>) -> crate::Result<Credential> {
    resolve_credential_with(explicit, |name| std::env::var(name).ok())
}

/// Same as `resolve_credential`, with the environment lookup passed in
/// so tests don't have to mess with real process env vars
pub fn resolve_credential_with<F>(explicit: Option<&str>, lookup: F) -> crate::Result<Credential>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = explicit.and_then(Credential::new) {
        return Ok(token);
    }

    TOKEN_ENV_VARS
        .iter()
        .filter_map(|name| lookup(*name))
        .find_map(Credential::new)
        .ok_or(crate::Error::MissingCredential)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitHubConfig {
    /// API URL (for GitHub Enterprise)
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: GITHUB_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Items per page, GitHub caps this at 100
    pub per_page: u32,
    pub users_query: String,
    pub repos_query: String,
    pub sort: String,
    pub order: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            per_page: 100,
            users_query: "location:egypt".to_string(),
            repos_query: "stars:>=1000".to_string(),
            sort: "stars".to_string(),
            order: "desc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    /// Repositories need strictly more contributors than this to be enriched
    pub min_contributors: usize,
    /// Lowercase file suffixes never reported by the tree walk
    pub excluded_extensions: Vec<String>,
    /// Lowercase directory names the tree walk never enters
    pub excluded_dirs: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_contributors: 1,
            excluded_extensions: [".pyc", ".png", ".jpg", ".jpeg", ".gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            excluded_dirs: ["images", "imgs", "__pycache__"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// One log file per run lands here
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.search.per_page, 100);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.filters.min_contributors, 1);
        assert!(config.filters.excluded_dirs.contains(&"__pycache__".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [search]
            per_page = 50

            [retry]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.search.per_page, 50);
        assert_eq!(config.search.sort, "stars");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 200);
        assert_eq!(config.logging.dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_validation_rejects_bad_page_size() {
        let mut config = Config::default();
        config.search.per_page = 0;
        assert!(config.validate().is_err());

        config.search.per_page = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_caps_retry_attempts() {
        let config = Config::from_toml("[retry]\nmax_attempts = 50\n").unwrap();
        assert!(matches!(config.validate(), Err(crate::Error::ConfigError(_))));

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        config.retry.max_attempts = MAX_ATTEMPTS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        assert!(toml.contains("per_page"));
        assert!(toml.contains("excluded_extensions"));
    }

    #[test]
    fn test_explicit_token_wins() {
        let credential = resolve_credential(Some("ghp_explicit")).unwrap();
        assert_eq!(credential, Credential::new("ghp_explicit").unwrap());
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let no_env = |_: &str| None;
        let result = resolve_credential_with(Some("   "), no_env);
        assert!(matches!(result, Err(crate::Error::MissingCredential)));

        let result = resolve_credential_with(None, no_env);
        assert!(matches!(result, Err(crate::Error::MissingCredential)));

        // blank env values don't count either
        let blank_env = |_: &str| Some(String::new());
        let result = resolve_credential_with(None, blank_env);
        assert!(matches!(result, Err(crate::Error::MissingCredential)));
    }

    #[test]
    fn test_env_fallback_order() {
        let env = |name: &str| match name {
            "YOUR_GITHUB_TOKEN" => Some("ghp_fallback".to_string()),
            _ => None,
        };
        let credential = resolve_credential_with(None, env).unwrap();
        assert_eq!(credential, Credential::new("ghp_fallback").unwrap());

        let env = |name: &str| Some(format!("ghp_{}", name.to_lowercase()));
        let credential = resolve_credential_with(None, env).unwrap();
        assert_eq!(credential, Credential::new("ghp_github_token").unwrap());
    }

    #[test]
    fn test_missing_explicit_config_file_is_an_error() {
        let result = Config::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(crate::Error::ConfigError(_))));
    }
}
