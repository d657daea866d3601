use std::collections::HashSet;
use std::sync::Arc;

use scraper::Html;

use crate::domain::{Candidate, SearchQuery};
use crate::error::FinderError;
use crate::http::HttpFetcher;
use crate::providers::{DirectorySource, absolutize, fetch_listing};
use crate::validator::parse_selector;

/// A directory that only offers an HTML search page: fill the query into a URL template,
/// then collect the `href` of every element matching a CSS selector.
pub struct HtmlDirectory {
    name: &'static str,
    origin: String,
    /// Search URL with a `{query}` placeholder, relative to `origin`.
    search_path: &'static str,
    selector: &'static str,
    silent_not_found: bool,
    fetcher: Arc<dyn HttpFetcher>,
}

impl HtmlDirectory {
    pub fn new(
        name: &'static str,
        origin: impl Into<String>,
        search_path: &'static str,
        selector: &'static str,
        fetcher: Arc<dyn HttpFetcher>,
    ) -> Self {
        Self {
            name,
            origin: origin.into(),
            search_path,
            selector,
            silent_not_found: false,
            fetcher,
        }
    }

    /// Treat a 404 search page as an empty result instead of an error.
    pub fn silent_not_found(mut self) -> Self {
        self.silent_not_found = true;
        self
    }

    /// Points the directory at another host, keeping its path and selector.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    fn search_url(&self, title: &str) -> String {
        let query = urlencoding::encode(title).replace("%20", "+");
        format!(
            "{}{}",
            self.origin.trim_end_matches('/'),
            self.search_path.replace("{query}", &query)
        )
    }

    fn extract(&self, html: &str) -> Result<Vec<Candidate>, FinderError> {
        let selector = parse_selector(self.selector)?;
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        Ok(document
            .select(&selector)
            .filter_map(|el| el.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty() && !href.starts_with('#'))
            .map(|href| absolutize(&self.origin, href))
            .filter(|url| seen.insert(url.clone()))
            .map(|url| Candidate::new(url, self.name))
            .collect())
    }
}

impl DirectorySource for HtmlDirectory {
    fn name(&self) -> &str {
        self.name
    }

    fn candidates(&self, query: &SearchQuery) -> Result<Vec<Candidate>, FinderError> {
        let url = self.search_url(&query.title);
        match fetch_listing(self.fetcher.as_ref(), self.name, &url, &[]) {
            Ok(body) => self.extract(&body),
            Err(FinderError::NotFound(_)) if self.silent_not_found => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}

pub fn huggingface(fetcher: Arc<dyn HttpFetcher>) -> HtmlDirectory {
    HtmlDirectory::new(
        "huggingface",
        "https://huggingface.co",
        "/models?search={query}",
        "div.model-card a[href], article.overview-card-wrapper a[href]",
        fetcher,
    )
}

/// Open data and code repositories, in the order they are consulted.
pub fn data_repositories(fetcher: Arc<dyn HttpFetcher>) -> Vec<HtmlDirectory> {
    vec![
        HtmlDirectory::new(
            "zenodo",
            "https://zenodo.org",
            "/search?page=1&size=20&q={query}&type=software",
            "a.result-item-title",
            fetcher.clone(),
        ),
        HtmlDirectory::new(
            "figshare",
            "https://figshare.com",
            "/search?q={query}&searchMode=1",
            "a.search-result",
            fetcher.clone(),
        ),
        HtmlDirectory::new(
            "openreview",
            "https://openreview.net",
            "/search?q={query}",
            "a.note_content_title",
            fetcher.clone(),
        ),
        HtmlDirectory::new(
            "codeocean",
            "https://codeocean.com",
            "/explore?query={query}&scope=all&order=relevance",
            "a.paper-title",
            fetcher.clone(),
        ),
        HtmlDirectory::new(
            "mendeley-data",
            "https://data.mendeley.com",
            "/search?query={query}",
            "a.search-result-title",
            fetcher,
        )
        .silent_not_found(),
    ]
}
