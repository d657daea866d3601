use std::sync::Arc;

use serde::Deserialize;

use crate::domain::{Candidate, SearchQuery};
use crate::error::FinderError;
use crate::http::HttpFetcher;
use crate::providers::{DirectorySource, fetch_listing};

const NAME: &str = "paperswithcode";
const SEARCH_BASE: &str = "https://paperswithcode.com/api/v1/search/";

/// Structured paper metadata search; each result may link the paper's official repository.
pub struct PapersWithCodeSource {
    fetcher: Arc<dyn HttpFetcher>,
    base_url: String,
}

impl PapersWithCodeSource {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            fetcher,
            base_url: SEARCH_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl DirectorySource for PapersWithCodeSource {
    fn name(&self) -> &str {
        NAME
    }

    fn candidates(&self, query: &SearchQuery) -> Result<Vec<Candidate>, FinderError> {
        let url = format!("{}?q={}", self.base_url, urlencoding::encode(&query.title));
        let body = fetch_listing(self.fetcher.as_ref(), NAME, &url, &[])?;
        parse_results(&body)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    url: Option<String>,
}

fn parse_results(body: &str) -> Result<Vec<Candidate>, FinderError> {
    let payload: SearchResponse =
        serde_json::from_str(body).map_err(|err| FinderError::parse(NAME, err.to_string()))?;
    Ok(payload
        .results
        .into_iter()
        .filter_map(|result| result.repository.and_then(|repo| repo.url))
        .filter(|url| !url.trim().is_empty())
        .map(|url| Candidate::new(url, NAME))
        .collect())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn results_without_repository_are_skipped() {
        let body = r#"{
            "count": 3,
            "results": [
                {"paper": {"title": "A"}, "repository": null},
                {"paper": {"title": "B"}, "repository": {"url": "https://github.com/tkipf/gcn", "stars": 6900}},
                {"paper": {"title": "C"}, "repository": {"url": ""}}
            ]
        }"#;
        let candidates = parse_results(body).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://github.com/tkipf/gcn");
        assert_eq!(candidates[0].source, "paperswithcode");
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        let err = parse_results("<html>maintenance</html>").unwrap_err();
        assert_matches!(err, FinderError::Parse { .. });
    }
}
