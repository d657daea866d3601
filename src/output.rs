use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::abstracts::AbstractsSummary;
use crate::batch::{ProgressEvent, ProgressSink, RunSummary};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Machine-readable results on stdout; progress is suppressed.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_abstracts(summary: &AbstractsSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stdout, one per event. Progress is best-effort: a closed or
/// failing stdout drops the line (logged at debug) and never stops the run.
pub struct ConsoleProgress;

impl ConsoleProgress {
    fn write_line(out: &mut impl Write, message: &str) -> io::Result<()> {
        writeln!(out, "{message}")?;
        out.flush()
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        if let Err(err) = Self::write_line(&mut io::stdout().lock(), &event.message) {
            debug!("progress line dropped: {err}");
        }
    }
}

pub fn progress_sink(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Interactive => &ConsoleProgress,
        OutputMode::NonInteractive => &JsonOutput,
    }
}
