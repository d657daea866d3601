use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::FinderError;

/// Field this tool writes; a publisher `url` says nothing about code.
pub const CODEBASE_FIELD: &str = "codebase_url";

/// One bibliography entry. Field order is kept as read so rewritten files diff cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BibRecord {
    pub entry_type: String,
    pub key: String,
    fields: Vec<(String, String)>,
}

impl BibRecord {
    pub fn new(entry_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            entry_type: entry_type.into(),
            key: key.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replaces an existing field (matched case-insensitively) or appends a new one.
    pub fn set_field(&mut self, name: &str, value: &str) {
        match self
            .fields
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn title(&self) -> &str {
        self.field("title").unwrap_or("")
    }

    pub fn authors(&self) -> Vec<String> {
        self.field("author")
            .map(split_authors)
            .unwrap_or_default()
    }

    pub fn year(&self) -> Option<i32> {
        self.field("year")
            .and_then(|value| value.trim().parse::<i32>().ok())
    }

    pub fn doi(&self) -> Option<&str> {
        self.field("doi")
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn codebase_url(&self) -> Option<&str> {
        self.field(CODEBASE_FIELD)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn query(&self) -> SearchQuery {
        SearchQuery {
            title: clean_title(self.title()),
            authors: self.authors(),
            year: self.year(),
        }
    }

    /// Label used in progress lines and logs.
    pub fn display_title(&self) -> String {
        let title = clean_title(self.title());
        if title.is_empty() {
            "No Title".to_string()
        } else {
            title
        }
    }
}

fn split_authors(value: &str) -> Vec<String> {
    value
        .split(" and ")
        .map(|name| name.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|name| !name.is_empty())
        .collect()
}

/// Drops BibTeX protective braces and collapses whitespace.
pub fn clean_title(raw: &str) -> String {
    raw.chars()
        .filter(|ch| *ch != '{' && *ch != '}')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Doi(String);

impl Doi {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Doi {
    type Err = FinderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let lowered = trimmed.to_ascii_lowercase();
        let stripped = ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "doi:"]
            .iter()
            .find(|prefix| lowered.starts_with(*prefix))
            .map(|prefix| &trimmed[prefix.len()..])
            .unwrap_or(trimmed)
            .trim();
        let is_valid = stripped.starts_with("10.")
            && stripped
                .split_once('/')
                .map(|(_, suffix)| !suffix.is_empty())
                .unwrap_or(false);
        if !is_valid {
            return Err(FinderError::InvalidDoi(value.to_string()));
        }
        Ok(Self(stripped.to_string()))
    }
}

/// Read-only projection of a record handed to every directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
}

impl SearchQuery {
    pub fn new(title: &str, authors: &[&str], year: Option<i32>) -> Self {
        Self {
            title: title.to_string(),
            authors: authors.iter().map(|name| name.to_string()).collect(),
            year,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub url: String,
    pub source: String,
    /// Last-updated year as reported by the directory itself, when it exposes one.
    pub updated_year: Option<i32>,
}

impl Candidate {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
            updated_year: None,
        }
    }

    pub fn with_updated_year(mut self, year: Option<i32>) -> Self {
        self.updated_year = year;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub accepted: bool,
    pub reason: String,
}

impl ValidationVerdict {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: "accepted".to_string(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(Candidate),
    NoneFound,
}

impl Resolution {
    pub fn url(&self) -> Option<&str> {
        match self {
            Resolution::Found(candidate) => Some(candidate.url.as_str()),
            Resolution::NoneFound => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Found(candidate) => write!(f, "{} (via {})", candidate.url, candidate.source),
            Resolution::NoneFound => write!(f, "No codebase found"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    WithCode,
    WithoutCode,
}

impl Partition {
    pub fn file_name(&self) -> &'static str {
        match self {
            Partition::WithCode => "with_code.bib",
            Partition::WithoutCode => "without_code.bib",
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_doi_strips_resolver_prefix() {
        let doi: Doi = "https://doi.org/10.1145/3292500.3330701".parse().unwrap();
        assert_eq!(doi.as_str(), "10.1145/3292500.3330701");
    }

    #[test]
    fn parse_doi_invalid() {
        let err = "arXiv:1706.03762".parse::<Doi>().unwrap_err();
        assert_matches!(err, FinderError::InvalidDoi(_));
    }

    #[test]
    fn record_accessors() {
        let record = BibRecord::new("article", "kipf2017")
            .with_field("title", "Semi-Supervised Classification with {Graph} Convolutional Networks")
            .with_field("author", "Thomas N. Kipf and Max Welling")
            .with_field("year", "2017");

        let query = record.query();
        assert_eq!(
            query.title,
            "Semi-Supervised Classification with Graph Convolutional Networks"
        );
        assert_eq!(query.authors, vec!["Thomas N. Kipf", "Max Welling"]);
        assert_eq!(query.year, Some(2017));
        assert_eq!(record.doi(), None);
    }

    #[test]
    fn set_field_replaces_case_insensitively() {
        let mut record = BibRecord::new("misc", "x").with_field("DOI", "10.1/a");
        record.set_field("doi", "10.1/b");
        assert_eq!(record.fields().count(), 1);
        assert_eq!(record.doi(), Some("10.1/b"));
    }

    #[test]
    fn missing_year_is_none() {
        let record = BibRecord::new("misc", "x").with_field("year", "forthcoming");
        assert_eq!(record.year(), None);
    }
}
