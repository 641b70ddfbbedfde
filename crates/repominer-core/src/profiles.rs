//! Owner profiles and location-filtered contributors.
use repominer_api::types::{Contributor, UserProfile};
use repominer_api::{ApiRequest, Fetch};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{LocalContributorsRow, ProfileRow, RepoRow};
use crate::sink::RecordSink;
use crate::Result;

pub struct ProfileExtractor {
    api: Arc<dyn Fetch>,
    api_base: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileSummary {
    pub rows_read: usize,
    pub rows_written: usize,
    pub failed: usize,
}

impl ProfileExtractor {
    pub fn new(api: Arc<dyn Fetch>, api_base: impl Into<String>) -> Self {
        Self {
            api,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn profile(&self, login: &str) -> Option<UserProfile> {
        let url = format!("{}/users/{}", self.api_base, urlencoding::encode(login));
        let payload = self.api.execute(&ApiRequest::get(url)).await.into_payload()?;

        match serde_json::from_value(payload) {
            Ok(profile) => Some(profile),
            Err(err) => {
                warn!("Unexpected profile payload for {}: {}", login, err);
                None
            }
        }
    }

    /// Write the owner profile of every repository, once per owner
    pub async fn collect_profiles<I, S>(&self, repos: I, sink: &mut S) -> Result<ProfileSummary>
    where
        I: IntoIterator<Item = Result<RepoRow>>,
        S: RecordSink<ProfileRow> + ?Sized,
    {
        let mut summary = ProfileSummary::default();
        let mut seen = HashSet::new();

        for repo in repos {
            let repo = repo?;
            summary.rows_read += 1;

            let (owner, _) = repo.owner_and_name();
            if !seen.insert(owner.to_lowercase()) {
                continue;
            }

            match self.profile(&owner).await {
                Some(profile) => {
                    sink.write(ProfileRow::from(profile)).await?;
                    summary.rows_written += 1;
                    info!("Extracted profile of {}", owner);
                }
                None => {
                    warn!("Couldn't extract profile of {}", owner);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Contributors of `repo` whose profile location contains `needle`
    ///
    /// `None` when the contributor list itself can't be fetched. Contributors
    /// whose profile fails are left out.
    pub async fn local_contributors(&self, repo: &RepoRow, needle: &str) -> Option<Vec<String>> {
        let (owner, name) = repo.owner_and_name();
        let url = format!("{}/repos/{}/{}/contributors", self.api_base, owner, name);
        let payload = self.api.execute(&ApiRequest::get(url)).await.into_payload()?;

        let contributors: Vec<Contributor> = match serde_json::from_value(payload) {
            Ok(contributors) => contributors,
            Err(err) => {
                warn!("Unexpected contributors payload for {}/{}: {}", owner, name, err);
                return None;
            }
        };

        let needle = needle.to_lowercase();
        let mut locals = Vec::new();
        for login in contributors.into_iter().filter_map(|c| c.login) {
            let Some(profile) = self.profile(&login).await else {
                continue;
            };
            let is_local = profile
                .location
                .as_deref()
                .is_some_and(|location| location.to_lowercase().contains(&needle));
            if is_local {
                locals.push(login);
            }
        }

        Some(locals)
    }

    pub async fn collect_local_contributors<I, S>(
        &self,
        repos: I,
        needle: &str,
        sink: &mut S,
    ) -> Result<usize>
    where
        I: IntoIterator<Item = Result<RepoRow>>,
        S: RecordSink<LocalContributorsRow> + ?Sized,
    {
        let mut written = 0;
        for repo in repos {
            let repo = repo?;
            let local_contributors = self.local_contributors(&repo, needle).await;
            info!(
                "{}/{}: {} local contributors",
                repo.login,
                repo.repo_name,
                local_contributors.as_ref().map_or(0, Vec::len)
            );
            sink.write(LocalContributorsRow {
                repo,
                local_contributors,
            })
            .await?;
            written += 1;
        }
        Ok(written)
    }
}
