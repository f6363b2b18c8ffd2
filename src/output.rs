use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::scratch::SweepReport;

#[derive(Debug, Clone, Serialize)]
pub struct MergeSummary {
    pub output: String,
    pub documents: usize,
    pub page_breaks: usize,
    pub bytes: usize,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_merge(summary: &MergeSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_sweep(report: &SweepReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
