use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{MergeRequest, SourceUrl};
use crate::error::MergeError;
use crate::scratch::ScratchSession;
use crate::validate::ensure_document;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_RETRIES: usize = 3;

const BASE_DELAY_MS: u64 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Status(u16),
    Transport(String),
}

pub trait SourceClient: Send + Sync {
    /// Downloads the full body of `url`.
    fn fetch(&self, url: &SourceUrl) -> Result<Vec<u8>, FetchFailure>;
}

#[derive(Clone)]
pub struct HttpSourceClient {
    client: Client,
    max_retries: usize,
}

impl HttpSourceClient {
    pub fn new(timeout: Duration, max_retries: usize) -> Result<Self, MergeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("docmerge/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MergeError::Server(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| MergeError::Server(err.to_string()))?;
        Ok(Self {
            client,
            max_retries,
        })
    }

    fn send_with_retries(
        &self,
        url: &SourceUrl,
    ) -> Result<reqwest::blocking::Response, FetchFailure> {
        let mut attempt = 0usize;
        loop {
            match self.client.get(url.as_url().clone()).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.max_retries && is_retryable_status(status) {
                        backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.max_retries && is_retryable_error(&err) {
                        backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchFailure::Transport(err.to_string()));
                }
            }
        }
    }
}

impl SourceClient for HttpSourceClient {
    fn fetch(&self, url: &SourceUrl) -> Result<Vec<u8>, FetchFailure> {
        let response = self.send_with_retries(url)?;
        if !response.status().is_success() {
            return Err(FetchFailure::Status(response.status().as_u16()));
        }
        response
            .bytes()
            .map(|body| body.to_vec())
            .map_err(|err| FetchFailure::Transport(err.to_string()))
    }
}

/// Downloads every source of `request` in order, validating each payload as
/// it arrives and writing it to its own scratch file. Stops at the first
/// failure; nothing is written for the failing entry.
pub fn fetch_sources<C: SourceClient + ?Sized>(
    client: &C,
    session: &mut ScratchSession,
    request: &MergeRequest,
    sink: &dyn ProgressSink,
) -> Result<Vec<Utf8PathBuf>, MergeError> {
    let total = request.len();
    let mut paths = Vec::with_capacity(total);
    for (index, url) in request.sources().iter().enumerate() {
        let position = index + 1;
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; document {position}/{total} {url}"),
            elapsed: None,
        });
        let start = std::time::Instant::now();
        let bytes = client.fetch(url).map_err(|failure| match failure {
            FetchFailure::Status(status) => MergeError::FetchStatus {
                position,
                url: url.to_string(),
                status,
            },
            FetchFailure::Transport(message) => MergeError::FetchTransport {
                position,
                url: url.to_string(),
                message,
            },
        })?;
        sink.event(ProgressEvent {
            message: format!("fetch.response bytes={}", bytes.len()),
            elapsed: Some(start.elapsed()),
        });

        ensure_document(position, url.as_str(), &bytes)?;
        paths.push(session.write_file(".docx", &bytes)?);
    }
    Ok(paths)
}

fn backoff(attempt: usize) {
    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(403));
    }
}
