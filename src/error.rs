use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FinderError {
    #[error("invalid DOI: {0}")]
    InvalidDoi(String),

    #[error("network request to {url} failed: {message}")]
    NetworkTransient { url: String, message: String },

    #[error("{url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("{source_name} rate limit exceeded")]
    RateLimited { source_name: String },

    #[error("{source_name} rejected credentials (status {status})")]
    #[diagnostic(help("check GITHUB_TOKEN or the github_token config value"))]
    AuthFailure { source_name: String, status: u16 },

    #[error("failed to parse response from {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to read bibliography at {0}")]
    BibliographyRead(PathBuf),

    #[error("failed to parse bibliography: {0}")]
    BibliographyParse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("PDF text extraction failed: {0}")]
    PdfExtraction(String),

    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),
}

impl FinderError {
    pub fn parse(source_name: &str, message: impl Into<String>) -> Self {
        FinderError::Parse {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FinderError::NetworkTransient { .. })
    }
}
