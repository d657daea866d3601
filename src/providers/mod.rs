//! External directories queried for candidate repositories, in fixed priority order.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ResolvedConfig;
use crate::domain::{Candidate, SearchQuery};
use crate::error::FinderError;
use crate::http::HttpFetcher;
use crate::validator::Validator;

pub mod crossref;
pub mod github;
pub mod html_directory;
pub mod paperswithcode;

pub use crossref::{CrossrefClient, DoiLookup};
pub use github::GithubSource;
pub use html_directory::HtmlDirectory;
pub use paperswithcode::PapersWithCodeSource;

pub trait DirectorySource: Send + Sync {
    fn name(&self) -> &str;

    /// Candidate URLs in the directory's own result order. Must not block on anything
    /// but the network and rate-limit cooldowns.
    fn candidates(&self, query: &SearchQuery) -> Result<Vec<Candidate>, FinderError>;
}

/// Validates a directory's candidates in order and returns the first accepted one.
/// Any directory failure counts as "no match".
pub fn first_accepted(
    source: &dyn DirectorySource,
    query: &SearchQuery,
    validator: &Validator,
    check_author: bool,
) -> Option<Candidate> {
    let candidates = match source.candidates(query) {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(source = source.name(), title = %query.title, "directory search failed: {err}");
            return None;
        }
    };
    debug!(source = source.name(), count = candidates.len(), "candidates");
    candidates
        .into_iter()
        .find(|candidate| validator.validate(candidate, query, check_author).accepted)
}

/// The built-in directories, highest priority first.
pub fn default_sources(
    config: &ResolvedConfig,
    fetcher: Arc<dyn HttpFetcher>,
) -> Vec<Box<dyn DirectorySource>> {
    let mut sources: Vec<Box<dyn DirectorySource>> = vec![
        Box::new(PapersWithCodeSource::new(fetcher.clone())),
        Box::new(
            GithubSource::new(fetcher.clone(), config.github_token.clone()).with_rate_limit(
                config.rate_limit_cooldown,
                config.max_rate_limit_retries,
            ),
        ),
        Box::new(html_directory::huggingface(fetcher.clone())),
    ];
    sources.extend(
        html_directory::data_repositories(fetcher)
            .into_iter()
            .map(|source| Box::new(source) as Box<dyn DirectorySource>),
    );
    sources
}

/// Single GET, then classify the status for a directory. Transient failures are not
/// retried here; the caller treats them as "no match".
pub(crate) fn fetch_listing(
    fetcher: &dyn HttpFetcher,
    source_name: &str,
    url: &str,
    headers: &[(&str, &str)],
) -> Result<String, FinderError> {
    let response = fetcher.get(url, headers)?;
    match response.status {
        200..=299 => Ok(response.text()),
        404 => Err(FinderError::NotFound(format!("{source_name}: {url}"))),
        429 => Err(FinderError::RateLimited {
            source_name: source_name.to_string(),
        }),
        status => Err(FinderError::HttpStatus {
            url: url.to_string(),
            status,
        }),
    }
}

/// Resolves site-relative links (`/user/model`) against the directory's origin.
pub(crate) fn absolutize(origin: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else if href.starts_with('/') {
        format!("{}{}", origin.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", origin.trim_end_matches('/'), href)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolutize_handles_relative_and_absolute_links() {
        assert_eq!(
            absolutize("https://huggingface.co", "/facebook/bart-large"),
            "https://huggingface.co/facebook/bart-large"
        );
        assert_eq!(
            absolutize("https://zenodo.org/", "records/42"),
            "https://zenodo.org/records/42"
        );
        assert_eq!(
            absolutize("https://zenodo.org", "//doi.org/10.5281/zenodo.42"),
            "https://doi.org/10.5281/zenodo.42"
        );
        assert_eq!(
            absolutize("https://zenodo.org", "https://github.com/a/b"),
            "https://github.com/a/b"
        );
    }

    #[test]
    fn default_sources_keep_priority_order() {
        use crate::http::HttpResponse;

        struct Offline;
        impl HttpFetcher for Offline {
            fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<HttpResponse, FinderError> {
                Err(FinderError::NotFound(url.to_string()))
            }
        }

        let names = default_sources(&ResolvedConfig::default(), Arc::new(Offline))
            .iter()
            .map(|source| source.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "paperswithcode",
                "github",
                "huggingface",
                "zenodo",
                "figshare",
                "openreview",
                "codeocean",
                "mendeley-data"
            ]
        );
    }

    #[test]
    fn transient_failure_costs_one_request_per_directory() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        use crate::http::HttpResponse;

        #[derive(Default)]
        struct Unreachable(AtomicUsize);
        impl HttpFetcher for Unreachable {
            fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<HttpResponse, FinderError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(FinderError::NetworkTransient {
                    url: url.to_string(),
                    message: "connection reset".to_string(),
                })
            }
        }

        let fetcher = Arc::new(Unreachable::default());
        let sources = default_sources(&ResolvedConfig::default(), fetcher.clone());
        let query = SearchQuery::new("Graph Attention Networks", &[], Some(2018));
        let validator = Validator::new(fetcher.clone());

        for source in &sources {
            let before = fetcher.0.load(Ordering::SeqCst);
            let err = source.candidates(&query).unwrap_err();
            assert!(err.is_transient(), "{}: {err}", source.name());
            assert_eq!(fetcher.0.load(Ordering::SeqCst), before + 1, "{}", source.name());
            assert_eq!(first_accepted(source.as_ref(), &query, &validator, false), None);
        }
        assert_eq!(fetcher.0.load(Ordering::SeqCst), sources.len() * 2);
    }
}
