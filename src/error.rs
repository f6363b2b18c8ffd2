use std::path::PathBuf;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::docx::DocxError;

#[derive(Debug, Error, Diagnostic)]
pub enum MergeError {
    #[error("at least one file URL is required")]
    EmptyRequest,

    #[error("file URL {position} is not a valid absolute http(s) URL: {value}")]
    InvalidUrl { position: usize, value: String },

    #[error("failed to fetch document {position} ({url}): HTTP status {status}")]
    FetchStatus {
        position: usize,
        url: String,
        status: u16,
    },

    #[error("failed to fetch document {position} ({url}): {message}")]
    FetchTransport {
        position: usize,
        url: String,
        message: String,
    },

    #[error("document {position} ({url}) is not a Word document: {reason}")]
    UnrecognizedFormat {
        position: usize,
        url: String,
        reason: String,
    },

    #[error("could not merge document {position} ({path})")]
    Assembly {
        position: usize,
        path: Utf8PathBuf,
        #[source]
        source: DocxError,
    },

    #[error("no documents were downloaded")]
    NoSources,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("server error: {0}")]
    Server(String),
}

impl MergeError {
    /// Whether the failure is attributable to the caller's input or to one of
    /// the documents it pointed at, as opposed to a fault in this service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MergeError::EmptyRequest
                | MergeError::InvalidUrl { .. }
                | MergeError::FetchStatus { .. }
                | MergeError::FetchTransport { .. }
                | MergeError::UnrecognizedFormat { .. }
                | MergeError::Assembly { .. }
                | MergeError::NoSources
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembly_error_keeps_cause() {
        let err = MergeError::Assembly {
            position: 3,
            path: Utf8PathBuf::from("/tmp/c.docx"),
            source: DocxError::MissingPart("word/document.xml".to_string()),
        };
        assert_eq!(err.to_string(), "could not merge document 3 (/tmp/c.docx)");
        let cause = std::error::Error::source(&err).map(|cause| cause.to_string());
        assert_eq!(
            cause.as_deref(),
            Some("package is missing part word/document.xml")
        );
    }

    #[test]
    fn client_error_split() {
        assert!(MergeError::EmptyRequest.is_client_error());
        assert!(MergeError::NoSources.is_client_error());
        assert!(!MergeError::Filesystem("disk full".to_string()).is_client_error());
        assert!(!MergeError::Server("bind".to_string()).is_client_error());
    }
}
