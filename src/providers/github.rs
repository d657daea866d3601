use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Datelike};
use serde::Deserialize;
use tracing::warn;

use crate::config::DEFAULT_RATE_LIMIT_COOLDOWN_SECS;
use crate::domain::{Candidate, SearchQuery};
use crate::error::FinderError;
use crate::http::HttpFetcher;
use crate::providers::DirectorySource;

const NAME: &str = "github";
const API_BASE: &str = "https://api.github.com";

/// Repository search ordered by stars. A token raises the rate limit but is optional.
pub struct GithubSource {
    fetcher: Arc<dyn HttpFetcher>,
    token: Option<String>,
    base_url: String,
    cooldown: Duration,
    max_rate_limit_retries: u32,
}

impl GithubSource {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, token: Option<String>) -> Self {
        Self {
            fetcher,
            token,
            base_url: API_BASE.to_string(),
            cooldown: Duration::from_secs(DEFAULT_RATE_LIMIT_COOLDOWN_SECS),
            max_rate_limit_retries: 5,
        }
    }

    pub fn with_rate_limit(mut self, cooldown: Duration, max_retries: u32) -> Self {
        self.cooldown = cooldown;
        self.max_rate_limit_retries = max_retries;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn search_once(&self, url: &str) -> Result<Vec<Candidate>, FinderError> {
        let auth = self.token.as_ref().map(|token| format!("Bearer {token}"));
        let mut headers = vec![
            ("Accept", "application/vnd.github+json"),
            ("X-GitHub-Api-Version", "2022-11-28"),
        ];
        if let Some(auth) = auth.as_deref() {
            headers.push(("Authorization", auth));
        }

        let response = self.fetcher.get(url, &headers)?;
        match response.status {
            200..=299 => parse_results(&response.text()),
            401 => Err(FinderError::AuthFailure {
                source_name: NAME.to_string(),
                status: 401,
            }),
            429 => Err(FinderError::RateLimited {
                source_name: NAME.to_string(),
            }),
            403 if is_rate_limited(&response.text()) => Err(FinderError::RateLimited {
                source_name: NAME.to_string(),
            }),
            status => Err(FinderError::HttpStatus {
                url: url.to_string(),
                status,
            }),
        }
    }
}

impl DirectorySource for GithubSource {
    fn name(&self) -> &str {
        NAME
    }

    fn candidates(&self, query: &SearchQuery) -> Result<Vec<Candidate>, FinderError> {
        let url = format!(
            "{}/search/repositories?q={}&sort=stars&order=desc",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&query.title)
        );
        let mut retries = 0u32;
        loop {
            match self.search_once(&url) {
                Err(FinderError::RateLimited { .. }) if retries < self.max_rate_limit_retries => {
                    retries += 1;
                    warn!(
                        retries,
                        cooldown = ?self.cooldown,
                        "GitHub rate limit exceeded, sleeping before retry"
                    );
                    thread::sleep(self.cooldown);
                }
                Err(err @ FinderError::AuthFailure { .. }) => {
                    warn!(title = %query.title, "GitHub bad credentials, check GITHUB_TOKEN");
                    return Err(err);
                }
                other => return other,
            }
        }
    }
}

fn is_rate_limited(body: &str) -> bool {
    body.to_ascii_lowercase().contains("rate limit")
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<RepositoryItem>,
}

#[derive(Debug, Deserialize)]
struct RepositoryItem {
    html_url: String,
    updated_at: Option<String>,
}

fn parse_results(body: &str) -> Result<Vec<Candidate>, FinderError> {
    let payload: SearchResponse =
        serde_json::from_str(body).map_err(|err| FinderError::parse(NAME, err.to_string()))?;
    Ok(payload
        .items
        .into_iter()
        .map(|item| {
            let updated_year = item
                .updated_at
                .as_deref()
                .and_then(|stamp| DateTime::parse_from_rfc3339(stamp).ok())
                .map(|stamp| stamp.year());
            Candidate::new(item.html_url, NAME).with_updated_year(updated_year)
        })
        .collect())
}
