use std::sync::Arc;

use scraper::Html;

use crate::domain::{Candidate, SearchQuery};
use crate::error::FinderError;
use crate::http::{Backoff, HttpFetcher};
use crate::validator::parse_selector;

pub const WEB_RESULTS: usize = 5;
const SOURCE: &str = "web";
const DUCKDUCKGO_HTML: &str = "https://html.duckduckgo.com/html/";

pub trait WebSearch: Send + Sync {
    /// Result URLs for a free-text query, best first, at most `max_results`.
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, FinderError>;
}

/// Scrapes the JavaScript-free DuckDuckGo results page.
pub struct DuckDuckGoSearch {
    fetcher: Arc<dyn HttpFetcher>,
    endpoint: String,
}

impl DuckDuckGoSearch {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            fetcher,
            endpoint: DUCKDUCKGO_HTML.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl WebSearch for DuckDuckGoSearch {
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, FinderError> {
        let url = format!("{}?q={}", self.endpoint, urlencoding::encode(query));
        let response = Backoff::default()
            .get(self.fetcher.as_ref(), &url, &[])?
            .require_success(&url)?;
        parse_results(&response.text(), max_results)
    }
}

fn parse_results(html: &str, max_results: usize) -> Result<Vec<String>, FinderError> {
    let selector = parse_selector("a.result__a[href]")?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(unwrap_redirect)
        .take(max_results)
        .collect())
}

/// Result links go through `//duckduckgo.com/l/?uddg=<target>`; plain links pass through.
fn unwrap_redirect(href: &str) -> Option<String> {
    if let Some((_, query)) = href.split_once("?") {
        if href.contains("duckduckgo.com/l/") {
            let target = query
                .split('&')
                .find_map(|pair| pair.strip_prefix("uddg="))?;
            return urlencoding::decode(target).ok().map(|url| url.into_owned());
        }
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        Some(href.to_string())
    } else {
        None
    }
}

/// Top results for `"<title> code repository"`, as candidates to validate in order.
pub fn web_candidates(
    search: &dyn WebSearch,
    query: &SearchQuery,
) -> Result<Vec<Candidate>, FinderError> {
    if query.title.trim().is_empty() {
        return Ok(Vec::new());
    }
    let text = format!("{} code repository", query.title);
    Ok(search
        .search(&text, WEB_RESULTS)?
        .into_iter()
        .take(WEB_RESULTS)
        .map(|url| Candidate::new(url, SOURCE))
        .collect())
}
