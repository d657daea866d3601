use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::{BibRecord, Partition, Resolution};
use crate::error::FinderError;
use crate::orchestrator::Resolver;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

/// Receives a full snapshot of both partitions after every completed record.
pub trait PartitionSink: Send + Sync {
    fn persist(&self, with_code: &[BibRecord], without_code: &[BibRecord]) -> Result<(), FinderError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partitions {
    pub with_code: Vec<BibRecord>,
    pub without_code: Vec<BibRecord>,
}

impl Partitions {
    pub fn len(&self) -> usize {
        self.with_code.len() + self.without_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The two output lists behind one lock. Appending and persisting happen in the same
/// critical section, so every persisted pair of files is a consistent snapshot.
pub struct ResultAccumulator<'s> {
    partitions: Mutex<Partitions>,
    sink: &'s dyn PartitionSink,
}

impl<'s> ResultAccumulator<'s> {
    pub fn new(sink: &'s dyn PartitionSink) -> Self {
        Self {
            partitions: Mutex::new(Partitions::default()),
            sink,
        }
    }

    /// Writes the current (possibly empty) snapshot.
    pub fn flush(&self) -> Result<(), FinderError> {
        let partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        self.sink
            .persist(&partitions.with_code, &partitions.without_code)
    }

    /// Adds a finished record and persists. Returns how many records are now complete.
    /// A failed write is logged; the record stays in memory and lands on the next write.
    pub fn append(&self, record: BibRecord, partition: Partition) -> usize {
        let mut partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        match partition {
            Partition::WithCode => partitions.with_code.push(record),
            Partition::WithoutCode => partitions.without_code.push(record),
        }
        if let Err(err) = self
            .sink
            .persist(&partitions.with_code, &partitions.without_code)
        {
            warn!("failed to persist partitions: {err}");
        }
        partitions.len()
    }

    pub fn snapshot(&self) -> Partitions {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn into_partitions(self) -> Partitions {
        self.partitions
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub index: usize,
    pub key: String,
    pub title: String,
    pub partition: Partition,
    pub url: Option<String>,
    pub source: Option<String>,
    /// Set when processing the record panicked; the record went to `without_code` untouched.
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub with_code: usize,
    pub without_code: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub records: Vec<RecordOutcome>,
}

pub struct BatchReport {
    pub summary: RunSummary,
    pub partitions: Partitions,
}

/// Runs the resolver over every record on a fixed pool of worker threads.
pub struct BatchRunner<'r> {
    resolver: &'r Resolver,
    workers: usize,
}

impl<'r> BatchRunner<'r> {
    pub fn new(resolver: &'r Resolver, workers: usize) -> Self {
        Self {
            resolver,
            workers: workers.max(1),
        }
    }

    pub fn run(
        &self,
        records: Vec<BibRecord>,
        sink: &dyn PartitionSink,
        progress: &dyn ProgressSink,
    ) -> Result<BatchReport, FinderError> {
        let started = Instant::now();
        let total = records.len();
        let accumulator = ResultAccumulator::new(sink);
        accumulator.flush()?;

        let queue = Mutex::new(records.into_iter().enumerate().collect::<VecDeque<_>>());
        let outcomes = Mutex::new(Vec::with_capacity(total));
        let workers = self.workers.min(total.max(1));
        info!(total, workers, "starting batch");

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let next = queue
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .pop_front();
                        let Some((index, record)) = next else {
                            break;
                        };
                        progress.event(ProgressEvent {
                            message: format!(
                                "Processing entry {}/{}: {}",
                                index + 1,
                                total,
                                record.display_title()
                            ),
                            elapsed: Some(started.elapsed()),
                        });

                        let (record, outcome) = self.process(index, record);
                        let partition = outcome.partition;
                        outcomes
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(outcome);
                        let completed = accumulator.append(record, partition);

                        progress.event(ProgressEvent {
                            message: format!("Completed entry {completed}/{total}"),
                            elapsed: Some(started.elapsed()),
                        });
                    }
                });
            }
        });

        let mut records = outcomes.into_inner().unwrap_or_else(PoisonError::into_inner);
        records.sort_by_key(|outcome| outcome.index);
        let partitions = accumulator.into_partitions();
        let summary = RunSummary {
            total,
            with_code: partitions.with_code.len(),
            without_code: partitions.without_code.len(),
            failed: records.iter().filter(|outcome| outcome.failed).count(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            records,
        };
        info!(
            with_code = summary.with_code,
            without_code = summary.without_code,
            failed = summary.failed,
            "batch finished"
        );
        Ok(BatchReport {
            summary,
            partitions,
        })
    }

    /// One record start to finish. A panic is contained here and the unchanged
    /// record is routed to `without_code`.
    fn process(&self, index: usize, record: BibRecord) -> (BibRecord, RecordOutcome) {
        let title = record.display_title();
        let key = record.key.clone();
        let original = record.clone();

        let result = panic::catch_unwind(AssertUnwindSafe(move || {
            let mut record = record;
            let resolution = self.resolver.resolve(&mut record);
            (record, resolution)
        }));

        match result {
            Ok((record, Resolution::Found(candidate))) => {
                info!(key = %key, url = %candidate.url, source = %candidate.source, "codebase found");
                let outcome = RecordOutcome {
                    index,
                    key,
                    title,
                    partition: Partition::WithCode,
                    url: Some(candidate.url),
                    source: Some(candidate.source),
                    failed: false,
                };
                (record, outcome)
            }
            Ok((record, Resolution::NoneFound)) => {
                info!(key = %key, "{}", Resolution::NoneFound);
                let outcome = RecordOutcome {
                    index,
                    key,
                    title,
                    partition: Partition::WithoutCode,
                    url: None,
                    source: None,
                    failed: false,
                };
                (record, outcome)
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(key = %key, title = %title, "error processing entry: {message}");
                let outcome = RecordOutcome {
                    index,
                    key,
                    title,
                    partition: Partition::WithoutCode,
                    url: None,
                    source: None,
                    failed: true,
                };
                (original, outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        snapshots: Mutex<Vec<(usize, usize)>>,
    }

    impl PartitionSink for Recording {
        fn persist(&self, with_code: &[BibRecord], without_code: &[BibRecord]) -> Result<(), FinderError> {
            self.snapshots
                .lock()
                .unwrap()
                .push((with_code.len(), without_code.len()));
            Ok(())
        }
    }

    struct Failing;

    impl PartitionSink for Failing {
        fn persist(&self, _: &[BibRecord], _: &[BibRecord]) -> Result<(), FinderError> {
            Err(FinderError::Filesystem("disk full".to_string()))
        }
    }

    #[test]
    fn accumulator_persists_after_every_append() {
        let sink = Recording::default();
        let accumulator = ResultAccumulator::new(&sink);
        accumulator.flush().unwrap();
        assert_eq!(accumulator.append(BibRecord::new("misc", "a"), Partition::WithCode), 1);
        assert_eq!(accumulator.append(BibRecord::new("misc", "b"), Partition::WithoutCode), 2);

        assert_eq!(*sink.snapshots.lock().unwrap(), vec![(0, 0), (1, 0), (1, 1)]);
        let partitions = accumulator.snapshot();
        assert_eq!(partitions.with_code[0].key, "a");
        assert_eq!(partitions.without_code[0].key, "b");
    }

    #[test]
    fn accumulator_keeps_records_when_persist_fails() {
        let accumulator = ResultAccumulator::new(&Failing);
        assert!(accumulator.flush().is_err());
        accumulator.append(BibRecord::new("misc", "a"), Partition::WithoutCode);
        assert_eq!(accumulator.into_partitions().len(), 1);
    }
}
