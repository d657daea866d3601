use std::sync::{Arc, LazyLock};

use lopdf::Document;
use regex::Regex;
use scraper::Html;
use tracing::{debug, warn};

use crate::domain::Doi;
use crate::error::FinderError;
use crate::http::{Backoff, HttpFetcher};
use crate::providers::DoiLookup;
use crate::validator::parse_selector;

const DOI_RESOLVER: &str = "https://doi.org";
/// Status some publishers answer automated clients with instead of the landing page.
const TEAPOT: u16 = 418;

static LINK_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"https?://\S+"));
static PDF_HREF_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"href="([^"]*\.pdf)""#));

/// Plain text of a document, one string per page.
pub trait DocumentText: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, FinderError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfText;

impl DocumentText for LopdfText {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, FinderError> {
        let document = Document::load_mem(bytes)
            .map_err(|err| FinderError::PdfExtraction(format!("lopdf failed to open PDF: {err}")))?;
        let mut pages = Vec::new();
        for page in document.get_pages().keys().copied() {
            match document.extract_text(&[page]) {
                Ok(text) => pages.push(text),
                Err(err) => {
                    debug!(page, "lopdf failed to extract page text: {err}");
                    pages.push(String::new());
                }
            }
        }
        Ok(pages)
    }
}

/// Every `http(s)://` token in page order. Duplicates are kept.
pub fn extract_links(pages: &[String]) -> Vec<String> {
    let Ok(pattern) = LINK_PATTERN.as_ref() else {
        return Vec::new();
    };
    pages
        .iter()
        .flat_map(|page| pattern.find_iter(page).map(|m| m.as_str().to_string()))
        .collect()
}

/// Downloads a paper's PDF through its DOI and lists the links printed in it.
pub struct PaperLinkExtractor {
    fetcher: Arc<dyn HttpFetcher>,
    lookup: Arc<dyn DoiLookup>,
    text: Arc<dyn DocumentText>,
    resolver_base: String,
    backoff: Backoff,
}

impl PaperLinkExtractor {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        lookup: Arc<dyn DoiLookup>,
        text: Arc<dyn DocumentText>,
    ) -> Self {
        Self {
            fetcher,
            lookup,
            text,
            resolver_base: DOI_RESOLVER.to_string(),
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn links_for(&self, doi: &Doi) -> Result<Vec<String>, FinderError> {
        let Some(bytes) = self.fetch_pdf(doi)? else {
            debug!(%doi, "no PDF located");
            return Ok(Vec::new());
        };
        let pages = self.text.extract_pages(&bytes)?;
        Ok(extract_links(&pages))
    }

    /// Landing page at the DOI resolver, then the first `.pdf` link on it.
    pub fn fetch_pdf(&self, doi: &Doi) -> Result<Option<Vec<u8>>, FinderError> {
        let url = format!("{}/{}", self.resolver_base, doi.as_str());
        let landing = self.backoff.get(self.fetcher.as_ref(), &url, &[])?;
        if landing.status == TEAPOT {
            return self.fetch_open_version(doi);
        }
        let landing = landing.require_success(&url)?;

        let Some(pdf_url) = first_pdf_href(&landing.text(), &landing.final_url) else {
            return Ok(None);
        };
        self.download(&pdf_url).map(Some)
    }

    /// Publisher page registered with Crossref, then its first arXiv link.
    fn fetch_open_version(&self, doi: &Doi) -> Result<Option<Vec<u8>>, FinderError> {
        let Some(landing_url) = self.lookup.landing_url(doi)? else {
            return Ok(None);
        };
        let page = self
            .backoff
            .get(self.fetcher.as_ref(), &landing_url, &[])?
            .require_success(&landing_url)?;
        let Some(arxiv) = first_arxiv_link(&page.text())? else {
            warn!(%doi, "no open version found");
            return Ok(None);
        };
        self.download(&arxiv_pdf_url(&arxiv)).map(Some)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, FinderError> {
        let response = self
            .backoff
            .get(self.fetcher.as_ref(), url, &[])?
            .require_success(url)?;
        Ok(response.body)
    }
}

fn first_pdf_href(html: &str, page_url: &str) -> Option<String> {
    let pattern = PDF_HREF_PATTERN.as_ref().ok()?;
    let href = pattern.captures(html)?.get(1)?.as_str();
    Some(if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("{}{}", origin_of(page_url), href)
    } else {
        format!("{}/{}", origin_of(page_url), href)
    })
}

fn origin_of(url: &str) -> &str {
    let after_scheme = url.find("://").map(|idx| idx + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(idx) => &url[..after_scheme + idx],
        None => url,
    }
}

fn first_arxiv_link(html: &str) -> Result<Option<String>, FinderError> {
    let selector = parse_selector("a[href]")?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .find(|href| href.contains("arxiv.org"))
        .map(|href| {
            if href.starts_with("http") {
                href.to_string()
            } else {
                format!("https://{}", href.trim_start_matches('/'))
            }
        }))
}

/// `arxiv.org/abs/<id>` serves HTML; the PDF lives under `arxiv.org/pdf/<id>`.
fn arxiv_pdf_url(link: &str) -> String {
    link.replacen("/abs/", "/pdf/", 1)
}
