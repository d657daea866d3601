//! Candidate sources used once every directory has come up empty.

pub mod pdf;
pub mod web;

pub use pdf::{DocumentText, LopdfText, PaperLinkExtractor, extract_links};
pub use web::{DuckDuckGoSearch, WEB_RESULTS, WebSearch, web_candidates};
