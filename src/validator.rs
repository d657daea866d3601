use std::sync::Arc;

use chrono::{DateTime, Datelike};
use scraper::{Html, Selector};
use tracing::debug;

use crate::domain::{Candidate, SearchQuery, ValidationVerdict};
use crate::error::FinderError;
use crate::http::HttpFetcher;

/// Share of title words that must appear in the page, as a ratio of integers (9/10).
const THRESHOLD_NUMERATOR: usize = 9;
const THRESHOLD_DENOMINATOR: usize = 10;

/// Tried in order; the first one present is the page's primary content.
const CONTENT_SELECTORS: &[&str] = &[
    "article.markdown-body",
    "#readme article",
    ".model-card-content",
    "main",
];
const CONTRIBUTOR_SELECTORS: &str = ".commit-author, a[rel='author'], [itemprop='author']";
const UPDATED_SELECTOR: &str = "relative-time[datetime]";

#[derive(Clone)]
pub struct Validator {
    fetcher: Arc<dyn HttpFetcher>,
    recency_check: bool,
}

impl Validator {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            fetcher,
            recency_check: true,
        }
    }

    pub fn with_recency_check(mut self, enabled: bool) -> Self {
        self.recency_check = enabled;
        self
    }

    pub fn validate(
        &self,
        candidate: &Candidate,
        query: &SearchQuery,
        check_author: bool,
    ) -> ValidationVerdict {
        let verdict = match self.fetcher.get(&candidate.url, &[]) {
            Ok(response) if response.is_success() => evaluate_page(
                &response.text(),
                query,
                candidate.updated_year,
                check_author,
                self.recency_check,
            ),
            Ok(response) => {
                ValidationVerdict::reject(format!("fetch failed, status code {}", response.status))
            }
            Err(err) => ValidationVerdict::reject(format!("fetch failed: {err}")),
        };
        debug!(
            url = %candidate.url,
            title = %query.title,
            accepted = verdict.accepted,
            reason = %verdict.reason,
            "repository validation"
        );
        verdict
    }
}

/// Decides on an already fetched page. `updated_year` is the directory's own
/// last-updated hint; without it the page's `relative-time` stamps are used.
pub fn evaluate_page(
    html: &str,
    query: &SearchQuery,
    updated_year: Option<i32>,
    check_author: bool,
    recency_check: bool,
) -> ValidationVerdict {
    match evaluate_document(
        &Html::parse_document(html),
        query,
        updated_year,
        check_author,
        recency_check,
    ) {
        Ok(verdict) => verdict,
        Err(err) => ValidationVerdict::reject(err.to_string()),
    }
}

fn evaluate_document(
    document: &Html,
    query: &SearchQuery,
    updated_year: Option<i32>,
    check_author: bool,
    recency_check: bool,
) -> Result<ValidationVerdict, FinderError> {
    let Some(content) = primary_content(document)? else {
        return Ok(ValidationVerdict::reject("no content block found on page"));
    };

    let (matched, total) = title_word_matches(&query.title, &content);
    if !passes_threshold(matched, total) {
        return Ok(ValidationVerdict::reject(format!(
            "title not found in repository content with sufficient similarity (ratio: {:.2})",
            ratio(matched, total)
        )));
    }

    if recency_check {
        let updated = updated_year.or(latest_update_year(document)?);
        if let (Some(paper_year), Some(updated)) = (query.year, updated) {
            if updated > paper_year {
                return Ok(ValidationVerdict::reject(format!(
                    "updated in {updated}, later than paper's publication year {paper_year}"
                )));
            }
        }
    }

    if check_author && !query.authors.is_empty() {
        let contributors = contributor_names(document)?;
        if !query
            .authors
            .iter()
            .any(|author| contributors.iter().any(|name| name == author))
        {
            return Ok(ValidationVerdict::reject("authors do not match"));
        }
    }

    Ok(ValidationVerdict::accept())
}

/// Fraction of lower-cased title words found as substrings of the lower-cased content.
/// An empty title scores 0.
pub fn title_similarity(title: &str, content: &str) -> f64 {
    let (matched, total) = title_word_matches(title, &content.to_lowercase());
    ratio(matched, total)
}

fn title_word_matches(title: &str, content_lower: &str) -> (usize, usize) {
    let words = title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>();
    let matched = words
        .iter()
        .filter(|word| content_lower.contains(word.as_str()))
        .count();
    (matched, words.len())
}

fn passes_threshold(matched: usize, total: usize) -> bool {
    total > 0 && matched * THRESHOLD_DENOMINATOR >= total * THRESHOLD_NUMERATOR
}

fn ratio(matched: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        matched as f64 / total as f64
    }
}

fn primary_content(document: &Html) -> Result<Option<String>, FinderError> {
    for css in CONTENT_SELECTORS {
        let selector = parse_selector(css)?;
        if let Some(element) = document.select(&selector).next() {
            let text = element.text().collect::<Vec<_>>().join(" ");
            return Ok(Some(text.to_lowercase()));
        }
    }
    Ok(None)
}

fn latest_update_year(document: &Html) -> Result<Option<i32>, FinderError> {
    let selector = parse_selector(UPDATED_SELECTOR)?;
    Ok(document
        .select(&selector)
        .filter_map(|el| el.value().attr("datetime"))
        .filter_map(|stamp| DateTime::parse_from_rfc3339(stamp).ok())
        .map(|stamp| stamp.year())
        .max())
}

fn contributor_names(document: &Html) -> Result<Vec<String>, FinderError> {
    let selector = parse_selector(CONTRIBUTOR_SELECTORS)?;
    Ok(document
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

pub(crate) fn parse_selector(css: &str) -> Result<Selector, FinderError> {
    Selector::parse(css).map_err(|err| FinderError::parse("html", format!("selector {css}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readme(body: &str) -> String {
        format!(
            "<html><body><article class=\"markdown-body entry-content container-lg\">{body}</article></body></html>"
        )
    }

    #[test]
    fn similarity_counts_substring_matches() {
        assert_eq!(
            title_similarity("Deep Learning For Graphs", "deep learning for trees"),
            0.75
        );
        assert_eq!(title_similarity("Deep Learning", "DEEPLEARNING"), 1.0);
        assert_eq!(title_similarity("", "anything"), 0.0);
    }

    #[test]
    fn threshold_is_inclusive_at_ninety_percent() {
        assert!(passes_threshold(9, 10));
        assert!(!passes_threshold(8, 9));
        assert!(!passes_threshold(0, 0));
    }

    #[test]
    fn page_without_readme_is_rejected() {
        let query = SearchQuery::new("Graph Networks", &[], None);
        let verdict = evaluate_page("<html><body><p>graph networks</p></body></html>", &query, None, false, true);
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("no content"));
    }

    #[test]
    fn page_stamp_used_when_no_hint() {
        let html = readme(
            "graph networks <relative-time datetime=\"2019-04-01T10:00:00Z\"></relative-time>\
             <relative-time datetime=\"2023-02-11T08:30:00Z\"></relative-time>",
        );
        let query = SearchQuery::new("Graph Networks", &[], Some(2020));
        assert!(!evaluate_page(&html, &query, None, false, true).accepted);
        assert!(evaluate_page(&html, &query, None, false, false).accepted);
    }

    #[test]
    fn author_check_is_exact() {
        let html = format!(
            "{}<a class=\"commit-author\">Max Welling</a>",
            readme("graph convolutional networks")
        );
        let hit = SearchQuery::new("Graph Convolutional Networks", &["Thomas Kipf", "Max Welling"], None);
        let miss = SearchQuery::new("Graph Convolutional Networks", &["max welling"], None);
        assert!(evaluate_page(&html, &hit, None, true, true).accepted);
        assert!(!evaluate_page(&html, &miss, None, true, true).accepted);
        assert!(evaluate_page(&html, &miss, None, false, true).accepted);
    }
}
