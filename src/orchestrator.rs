use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::ResolvedConfig;
use crate::domain::{BibRecord, CODEBASE_FIELD, Candidate, Doi, Resolution, SearchQuery};
use crate::fallback::{DuckDuckGoSearch, LopdfText, PaperLinkExtractor, WebSearch, web_candidates};
use crate::http::HttpFetcher;
use crate::providers::{CrossrefClient, DirectorySource, DoiLookup, default_sources, first_accepted};
use crate::validator::Validator;

/// Source label for a codebase URL the record already carried.
pub const EXISTING_SOURCE: &str = "existing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    NotStarted,
    DoiResolved,
    DirectorySearch,
    PdfFallback,
    WebFallback,
    Done,
}

impl fmt::Display for ResolveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResolveState::NotStarted => "not-started",
            ResolveState::DoiResolved => "doi-resolved",
            ResolveState::DirectorySearch => "directory-search",
            ResolveState::PdfFallback => "pdf-fallback",
            ResolveState::WebFallback => "web-fallback",
            ResolveState::Done => "done",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub check_paper: bool,
    pub search_web: bool,
    pub check_author: bool,
}

impl From<&ResolvedConfig> for ResolveOptions {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            check_paper: config.check_paper,
            search_web: config.search_web,
            check_author: config.check_author,
        }
    }
}

/// One step of the fallback chain. Stages run in order, each at most once.
pub struct Stage<'a, T> {
    pub state: ResolveState,
    run: Box<dyn FnOnce() -> Option<T> + 'a>,
}

impl<'a, T> Stage<'a, T> {
    pub fn new(state: ResolveState, run: impl FnOnce() -> Option<T> + 'a) -> Self {
        Self {
            state,
            run: Box::new(run),
        }
    }
}

/// Runs stages in order and stops at the first one that yields a value.
pub fn first_some<'a, T>(stages: impl IntoIterator<Item = Stage<'a, T>>) -> Option<T> {
    for stage in stages {
        trace!(state = %stage.state, "entering stage");
        if let Some(found) = (stage.run)() {
            trace!(state = %ResolveState::Done, from = %stage.state, "stage succeeded");
            return Some(found);
        }
    }
    trace!(state = %ResolveState::Done, "all stages exhausted");
    None
}

/// Per-record control flow: DOI fill, directories in priority order, then the
/// optional PDF and web fallbacks.
pub struct Resolver {
    sources: Vec<Box<dyn DirectorySource>>,
    validator: Validator,
    options: ResolveOptions,
    doi_lookup: Option<Arc<dyn DoiLookup>>,
    paper_links: Option<PaperLinkExtractor>,
    web_search: Option<Arc<dyn WebSearch>>,
}

impl Resolver {
    pub fn new(
        sources: Vec<Box<dyn DirectorySource>>,
        validator: Validator,
        options: ResolveOptions,
    ) -> Self {
        Self {
            sources,
            validator,
            options,
            doi_lookup: None,
            paper_links: None,
            web_search: None,
        }
    }

    /// Production wiring: every built-in directory plus Crossref, lopdf and DuckDuckGo.
    pub fn from_config(config: &ResolvedConfig, fetcher: Arc<dyn HttpFetcher>) -> Self {
        let crossref: Arc<dyn DoiLookup> = Arc::new(CrossrefClient::new(fetcher.clone()));
        let validator = Validator::new(fetcher.clone()).with_recency_check(config.recency_check);
        let mut resolver = Self::new(
            default_sources(config, fetcher.clone()),
            validator,
            ResolveOptions::from(config),
        )
        .with_doi_lookup(crossref.clone());
        if config.check_paper {
            resolver = resolver.with_paper_links(PaperLinkExtractor::new(
                fetcher.clone(),
                crossref,
                Arc::new(LopdfText),
            ));
        }
        if config.search_web {
            resolver = resolver.with_web_search(Arc::new(DuckDuckGoSearch::new(fetcher)));
        }
        resolver
    }

    pub fn with_doi_lookup(mut self, lookup: Arc<dyn DoiLookup>) -> Self {
        self.doi_lookup = Some(lookup);
        self
    }

    pub fn with_paper_links(mut self, extractor: PaperLinkExtractor) -> Self {
        self.paper_links = Some(extractor);
        self
    }

    pub fn with_web_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.web_search = Some(search);
        self
    }

    /// Resolves one record in place: a found codebase is written to its `codebase_url` field,
    /// a missing DOI may be filled. Nothing is written when no codebase is found.
    pub fn resolve(&self, record: &mut BibRecord) -> Resolution {
        trace!(key = %record.key, state = %ResolveState::NotStarted, "resolving");
        if let Some(existing) = record.codebase_url() {
            debug!(key = %record.key, url = existing, "record already has a codebase");
            return Resolution::Found(Candidate::new(existing, EXISTING_SOURCE));
        }

        self.fill_doi(record);
        trace!(key = %record.key, state = %ResolveState::DoiResolved, "doi step finished");

        let resolution = self.find_codebase(record);
        if let Resolution::Found(candidate) = &resolution {
            record.set_field(CODEBASE_FIELD, &candidate.url);
        }
        resolution
    }

    /// Adds a Crossref DOI when the record has none. Lookup failures are logged and ignored.
    pub fn fill_doi(&self, record: &mut BibRecord) {
        if record.doi().is_some() {
            return;
        }
        let Some(lookup) = &self.doi_lookup else {
            return;
        };
        let title = record.query().title;
        match lookup.lookup_by_title(&title) {
            Ok(Some(doi)) => {
                debug!(key = %record.key, %doi, "filled DOI from title");
                record.set_field("doi", doi.as_str());
            }
            Ok(None) => debug!(key = %record.key, "no DOI match for title"),
            Err(err) => warn!(key = %record.key, "DOI lookup failed: {err}"),
        }
    }

    /// The fallback chain without touching the record.
    pub fn find_codebase(&self, record: &BibRecord) -> Resolution {
        let query = record.query();
        let doi = record.doi().and_then(|value| value.parse::<Doi>().ok());

        let stages = vec![
            Stage::new(ResolveState::DirectorySearch, || self.search_directories(&query)),
            Stage::new(ResolveState::PdfFallback, || {
                self.search_paper(&query, doi.as_ref())
            }),
            Stage::new(ResolveState::WebFallback, || self.search_web(&query)),
        ];

        match first_some(stages) {
            Some(candidate) => Resolution::Found(candidate),
            None => Resolution::NoneFound,
        }
    }

    fn search_directories(&self, query: &SearchQuery) -> Option<Candidate> {
        self.sources.iter().find_map(|source| {
            first_accepted(source.as_ref(), query, &self.validator, self.options.check_author)
        })
    }

    fn search_paper(&self, query: &SearchQuery, doi: Option<&Doi>) -> Option<Candidate> {
        if !self.options.check_paper {
            return None;
        }
        let (extractor, doi) = (self.paper_links.as_ref()?, doi?);
        let links = match extractor.links_for(doi) {
            Ok(links) => links,
            Err(err) => {
                warn!(%doi, "PDF link extraction failed: {err}");
                return None;
            }
        };
        debug!(%doi, count = links.len(), "links found in paper");
        self.first_valid(
            links.into_iter().map(|url| Candidate::new(url, "paper")),
            query,
        )
    }

    fn search_web(&self, query: &SearchQuery) -> Option<Candidate> {
        if !self.options.search_web {
            return None;
        }
        let search = self.web_search.as_ref()?;
        match web_candidates(search.as_ref(), query) {
            Ok(candidates) => self.first_valid(candidates, query),
            Err(err) => {
                warn!(title = %query.title, "web search failed: {err}");
                None
            }
        }
    }

    fn first_valid(
        &self,
        candidates: impl IntoIterator<Item = Candidate>,
        query: &SearchQuery,
    ) -> Option<Candidate> {
        candidates.into_iter().find(|candidate| {
            self.validator
                .validate(candidate, query, self.options.check_author)
                .accepted
        })
    }
}
