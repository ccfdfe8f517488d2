use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::app::{ListingResult, ProgressEvent, ProgressSink, RunReport, VenuesResult};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_venues(result: &VenuesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_listing(result: &ListingResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
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

pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => debug!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => debug!("{}", event.message),
        }
    }
}
