use std::sync::Arc;

use serde::Deserialize;

use crate::domain::Doi;
use crate::error::FinderError;
use crate::http::{Backoff, HttpFetcher};

const CROSSREF_BASE: &str = "https://api.crossref.org";
const DOI_RESOLVER: &str = "https://doi.org";
const CSL_JSON: &str = "application/vnd.citationstyles.csl+json";

/// DOI metadata needed around the directory search: filling a missing DOI,
/// locating the publisher landing page and, for the `abstracts` command, the abstract.
pub trait DoiLookup: Send + Sync {
    /// Best bibliographic match for a title, if any.
    fn lookup_by_title(&self, title: &str) -> Result<Option<Doi>, FinderError>;

    /// Canonical landing URL registered for the DOI.
    fn landing_url(&self, doi: &Doi) -> Result<Option<String>, FinderError>;

    fn fetch_abstract(&self, doi: &Doi) -> Result<Option<String>, FinderError>;
}

pub struct CrossrefClient {
    fetcher: Arc<dyn HttpFetcher>,
    api_base: String,
    resolver_base: String,
}

impl CrossrefClient {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            fetcher,
            api_base: CROSSREF_BASE.to_string(),
            resolver_base: DOI_RESOLVER.to_string(),
        }
    }

    pub fn with_bases(mut self, api_base: impl Into<String>, resolver_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.resolver_base = resolver_base.into();
        self
    }

    fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Option<T>, FinderError> {
        let response = Backoff::default().get(self.fetcher.as_ref(), url, headers)?;
        if response.status == 404 {
            return Ok(None);
        }
        let response = response.require_success(url)?;
        serde_json::from_slice(&response.body)
            .map(Some)
            .map_err(|err| FinderError::parse("crossref", err.to_string()))
    }
}

impl DoiLookup for CrossrefClient {
    fn lookup_by_title(&self, title: &str) -> Result<Option<Doi>, FinderError> {
        if title.trim().is_empty() {
            return Ok(None);
        }
        let url = format!(
            "{}/works?query.title={}&rows=1",
            self.api_base,
            urlencoding::encode(title)
        );
        let Some(payload) = self.get_json::<CrossrefResponse<CrossrefWorks>>(&url, &[])? else {
            return Ok(None);
        };
        Ok(payload
            .message
            .items
            .into_iter()
            .next()
            .and_then(|item| item.doi)
            .and_then(|doi| doi.parse::<Doi>().ok()))
    }

    fn landing_url(&self, doi: &Doi) -> Result<Option<String>, FinderError> {
        let url = format!(
            "{}/works/{}",
            self.api_base,
            urlencoding::encode(doi.as_str())
        );
        Ok(self
            .get_json::<CrossrefResponse<CrossrefWork>>(&url, &[])?
            .and_then(|payload| payload.message.url))
    }

    fn fetch_abstract(&self, doi: &Doi) -> Result<Option<String>, FinderError> {
        let url = format!("{}/{}", self.resolver_base, doi.as_str());
        Ok(self
            .get_json::<CslItem>(&url, &[("Accept", CSL_JSON)])?
            .and_then(|item| item.abstract_text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()))
    }
}

#[derive(Debug, Deserialize)]
struct CrossrefResponse<T> {
    message: T,
}

#[derive(Debug, Deserialize)]
struct CrossrefWorks {
    #[serde(default)]
    items: Vec<CrossrefWork>,
}

#[derive(Debug, Deserialize)]
struct CrossrefWork {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CslItem {
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
}
