use serde::Serialize;
use tracing::{debug, warn};

use crate::batch::{ProgressEvent, ProgressSink};
use crate::domain::{BibRecord, Doi};
use crate::providers::DoiLookup;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AbstractsSummary {
    pub total: usize,
    pub added: usize,
    pub already_present: usize,
    pub without_doi: usize,
    pub unavailable: usize,
    pub output_path: Option<String>,
}

/// Fills a missing or empty `abstract` field from the DOI's CSL-JSON metadata.
/// Records are processed in order and never dropped.
pub fn add_abstracts(
    records: &mut [BibRecord],
    lookup: &dyn DoiLookup,
    progress: &dyn ProgressSink,
) -> AbstractsSummary {
    let total = records.len();
    let mut summary = AbstractsSummary {
        total,
        ..AbstractsSummary::default()
    };

    for (idx, record) in records.iter_mut().enumerate() {
        let position = idx + 1;
        emit(progress, format!("Processing entry {position} of {total}..."));

        let has_abstract = record
            .field("abstract")
            .is_some_and(|text| !text.trim().is_empty());
        if has_abstract {
            summary.already_present += 1;
        } else {
            match record.doi().map(str::parse::<Doi>) {
                None => summary.without_doi += 1,
                Some(Err(err)) => {
                    debug!(key = %record.key, "skipping record: {err}");
                    summary.without_doi += 1;
                }
                Some(Ok(doi)) => match lookup.fetch_abstract(&doi) {
                    Ok(Some(text)) => {
                        record.set_field("abstract", &text);
                        summary.added += 1;
                        emit(progress, format!("Added abstract to entry {position}"));
                    }
                    Ok(None) => {
                        warn!(%doi, "could not fetch abstract");
                        summary.unavailable += 1;
                    }
                    Err(err) => {
                        warn!(%doi, "could not fetch abstract: {err}");
                        summary.unavailable += 1;
                    }
                },
            }
        }

        emit(progress, format!("Finished processing entry {position} of {total}"));
    }

    summary
}

fn emit(progress: &dyn ProgressSink, message: String) {
    progress.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FinderError;

    struct Abstracts;

    impl DoiLookup for Abstracts {
        fn lookup_by_title(&self, _title: &str) -> Result<Option<Doi>, FinderError> {
            Ok(None)
        }
        fn landing_url(&self, _doi: &Doi) -> Result<Option<String>, FinderError> {
            Ok(None)
        }
        fn fetch_abstract(&self, doi: &Doi) -> Result<Option<String>, FinderError> {
            match doi.as_str() {
                "10.1000/known" => Ok(Some("We propose a method.".to_string())),
                "10.1000/broken" => Err(FinderError::HttpStatus {
                    url: "https://doi.org/10.1000/broken".to_string(),
                    status: 500,
                }),
                _ => Ok(None),
            }
        }
    }

    struct Quiet;

    impl ProgressSink for Quiet {
        fn event(&self, _event: ProgressEvent) {}
    }

    #[test]
    fn fills_only_missing_abstracts() {
        let mut records = vec![
            BibRecord::new("article", "a").with_field("doi", "10.1000/known"),
            BibRecord::new("article", "b")
                .with_field("doi", "10.1000/known")
                .with_field("abstract", "Kept as is."),
            BibRecord::new("article", "c"),
            BibRecord::new("article", "d").with_field("doi", "10.1000/broken"),
            BibRecord::new("article", "e")
                .with_field("doi", "10.1000/unknown")
                .with_field("abstract", " "),
        ];

        let summary = add_abstracts(&mut records, &Abstracts, &Quiet);

        assert_eq!(records[0].field("abstract"), Some("We propose a method."));
        assert_eq!(records[1].field("abstract"), Some("Kept as is."));
        assert_eq!(records[2].field("abstract"), None);
        assert_eq!(records[4].field("abstract"), Some(" "));
        assert_eq!(summary.total, 5);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.already_present, 1);
        assert_eq!(summary.without_doi, 1);
        assert_eq!(summary.unavailable, 2);
    }
}
