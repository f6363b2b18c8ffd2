use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::Url;

use crate::error::MergeError;

pub const DOCX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// An absolute http(s) location of one source document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceUrl(Url);

impl SourceUrl {
    /// Parses `value` as the source at 1-based `position` of a request.
    pub fn parse_at(position: usize, value: &str) -> Result<Self, MergeError> {
        let invalid = || MergeError::InvalidUrl {
            position,
            value: value.to_string(),
        };
        let url = Url::parse(value.trim()).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(invalid());
        }
        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    sources: Vec<SourceUrl>,
}

impl MergeRequest {
    pub fn parse<S: AsRef<str>>(urls: &[S]) -> Result<Self, MergeError> {
        if urls.is_empty() {
            return Err(MergeError::EmptyRequest);
        }
        let sources = urls
            .iter()
            .enumerate()
            .map(|(index, url)| SourceUrl::parse_at(index + 1, url.as_ref()))
            .collect::<Result<Vec<_>, MergeError>>()?;
        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[SourceUrl] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MergedDocument {
    pub bytes: Vec<u8>,
    pub source_count: usize,
    pub page_breaks: usize,
}

impl MergedDocument {
    pub fn file_name(now: DateTime<Utc>) -> String {
        format!("merged_document_{}.docx", now.format("%Y%m%d%H%M%S"))
    }
}
