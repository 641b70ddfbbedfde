// Pure helpers the aggregator runs over data it already fetched
use crate::models::CiTool;

impl CiTool {
    /// Does this repository-relative path belong to the tool's configuration?
    fn matches(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/').to_lowercase();
        match self {
            CiTool::Travis => path == ".travis.yml",
            CiTool::GitLabCi => path == ".gitlab-ci.yml",
            CiTool::Drone => path == ".drone.yml",
            CiTool::CircleCi => path == ".circleci/config.yml",
            // the walk only reports files, so look underneath the directory too
            CiTool::GitHubActions => {
                path == ".github/workflows" || path.starts_with(".github/workflows/")
            }
            CiTool::Jenkins => path == "jenkinsfile",
        }
    }
}

/// First CI tool, in precedence order, with a configuration file among `paths`
pub fn detect_ci_tool<S: AsRef<str>>(paths: &[S]) -> Option<CiTool> {
    CiTool::PRECEDENCE
        .into_iter()
        .find(|tool| paths.iter().any(|path| tool.matches(path.as_ref())))
}

/// Bare package name: whatever follows the last `:` or `/`
///
/// `pkg:pypi/requests` and `pypi:requests` both become `requests`.
pub fn normalize_package_name(name: &str) -> &str {
    name.rsplit(|c: char| c == ':' || c == '/').next().unwrap_or(name)
}

/// Package names from an SBOM, minus the first entry
///
/// The first package of a GitHub SBOM is the repository itself.
pub fn dependency_names<S: AsRef<str>>(packages: &[S]) -> Vec<String> {
    packages
        .iter()
        .skip(1)
        .map(|name| normalize_package_name(name.as_ref()).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_wins_over_file_order() {
        let paths = [
            "Jenkinsfile",
            ".github/workflows/ci.yml",
            ".circleci/config.yml",
            ".drone.yml",
        ];
        assert_eq!(detect_ci_tool(&paths), Some(CiTool::Drone));

        let paths = [".gitlab-ci.yml", ".travis.yml"];
        assert_eq!(detect_ci_tool(&paths), Some(CiTool::Travis));
    }

    #[test]
    fn test_each_tool_is_recognised() {
        assert_eq!(detect_ci_tool(&[".GitLab-CI.yml"]), Some(CiTool::GitLabCi));
        assert_eq!(detect_ci_tool(&[".circleci/config.yml"]), Some(CiTool::CircleCi));
        assert_eq!(
            detect_ci_tool(&[".github/workflows/release.yaml"]),
            Some(CiTool::GitHubActions)
        );
        assert_eq!(detect_ci_tool(&[".github/workflows"]), Some(CiTool::GitHubActions));
        assert_eq!(detect_ci_tool(&["Jenkinsfile"]), Some(CiTool::Jenkins));
    }

    #[test]
    fn test_nested_or_lookalike_files_do_not_count() {
        let paths = [
            "docs/.travis.yml",
            ".github/workflows-old/x.yml",
            "ci/Jenkinsfile",
            "src/main.rs",
        ];
        assert_eq!(detect_ci_tool(&paths), None);
        assert_eq!(detect_ci_tool::<&str>(&[]), None);
    }

    #[test]
    fn test_dependency_names_drop_root_and_normalise() {
        let packages = [
            "com.github.octo/demo",
            "pkg:pypi/foo",
            "npm:lodash",
            "actions:actions/checkout",
            "plain",
        ];
        assert_eq!(
            dependency_names(&packages),
            vec!["foo", "lodash", "checkout", "plain"]
        );
        assert!(dependency_names::<&str>(&[]).is_empty());
        assert!(dependency_names(&["only-root"]).is_empty());
    }
}
