use std::fs;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::assemble::assemble;
use crate::domain::{MergeRequest, MergedDocument};
use crate::error::MergeError;
use crate::fetch::{SourceClient, fetch_sources};
use crate::scratch::{ScratchSession, ScratchSpace};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress events to the `tracing` subscriber.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!("{} elapsed_ms={}", event.message, elapsed.as_millis()),
            None => info!("{}", event.message),
        }
    }
}

pub struct MergeService<C: SourceClient> {
    client: C,
    scratch: ScratchSpace,
}

impl<C: SourceClient> MergeService<C> {
    pub fn new(client: C, scratch: ScratchSpace) -> Self {
        Self { client, scratch }
    }

    pub fn scratch(&self) -> &ScratchSpace {
        &self.scratch
    }

    /// Fetches, validates and merges `urls` into one document.
    ///
    /// Either every source is merged or an error names the first source that
    /// could not be. Scratch files created along the way are removed before
    /// this returns, whatever the outcome.
    pub fn merge_documents<S: AsRef<str>>(
        &self,
        urls: &[S],
        sink: &dyn ProgressSink,
    ) -> Result<MergedDocument, MergeError> {
        let request = MergeRequest::parse(urls)?;
        let start = Instant::now();
        let mut session = self.scratch.session();
        let result = self.run(&request, &mut session, sink);

        let cleanup = session.close();
        if cleanup.failed > 0 {
            warn!(
                "{} scratch files could not be removed; the sweep will retry",
                cleanup.failed
            );
        }
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; ok={} sources={} removed={}",
                result.is_ok(),
                request.len(),
                cleanup.removed
            ),
            elapsed: Some(start.elapsed()),
        });
        result
    }

    fn run(
        &self,
        request: &MergeRequest,
        session: &mut ScratchSession,
        sink: &dyn ProgressSink,
    ) -> Result<MergedDocument, MergeError> {
        let inputs = fetch_sources(&self.client, session, request, sink)?;
        if inputs.is_empty() {
            return Err(MergeError::NoSources);
        }

        let output = session.reserve_path(".docx")?;
        sink.event(ProgressEvent {
            message: format!("phase=Assemble; {} documents", inputs.len()),
            elapsed: None,
        });
        let report = assemble(&inputs, &output)?;

        let bytes = fs::read(output.as_std_path())
            .map_err(|err| MergeError::Filesystem(format!("read {output}: {err}")))?;
        Ok(MergedDocument {
            bytes,
            source_count: report.documents,
            page_breaks: report.page_breaks,
        })
    }
}
