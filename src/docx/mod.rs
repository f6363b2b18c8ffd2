//! Just enough of the WordprocessingML package format to splice the body of
//! one `.docx` into another.
//!
//! A package is a zip of named parts. The main document part (normally
//! `word/document.xml`) holds the body; its relationships part maps the
//! `r:id`/`r:embed` references in the body to other parts (images, headers)
//! or to external targets (hyperlinks); `[Content_Types].xml` maps part names
//! to media types. Splicing has to keep all three consistent.

mod compose;
mod definitions;
mod package;
mod parts;
mod xml;

use thiserror::Error;

pub use compose::Composer;
pub use package::DocxPackage;
pub use parts::{ContentTypes, Relationship, Relationships};
pub use xml::PAGE_BREAK_PARAGRAPH;

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const PACKAGE_RELS_PART: &str = "_rels/.rels";
pub const DEFAULT_MAIN_PART: &str = "word/document.xml";

pub const OFFICE_DOCUMENT_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub const RELATIONSHIPS_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
pub const WORDPROCESSING_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
pub const STYLES_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";
pub const NUMBERING_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/numbering";
pub const NUMBERING_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml";
pub const RELS_CONTENT_TYPE: &str = "application/vnd.openxmlformats-package.relationships+xml";

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid package: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("package is missing part {0}")]
    MissingPart(String),

    #[error("part {part} is malformed: {message}")]
    Malformed { part: String, message: String },

    #[error("relationship {0} referenced by the document body is not defined")]
    DanglingRelationship(String),

    #[error("unsupported content: {0}")]
    Unsupported(String),
}

impl DocxError {
    pub(crate) fn malformed(part: &str, message: impl Into<String>) -> Self {
        DocxError::Malformed {
            part: part.to_string(),
            message: message.into(),
        }
    }
}

/// Directory component of a part name, without trailing slash.
pub(crate) fn part_dir(part: &str) -> &str {
    part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Relationships part that belongs to `part`, e.g.
/// `word/document.xml` -> `word/_rels/document.xml.rels`.
pub fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/_rels/{name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolves a relationship target against the part that owns the
/// relationship. Leading `/` means package-absolute.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => {
            let dir = part_dir(source_part);
            if dir.is_empty() {
                target.to_string()
            } else {
                format!("{dir}/{target}")
            }
        }
    };
    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rels_part_naming() {
        assert_eq!(
            rels_part_for("word/document.xml"),
            "word/_rels/document.xml.rels"
        );
        assert_eq!(rels_part_for("document.xml"), "_rels/document.xml.rels");
    }

    #[test]
    fn target_resolution() {
        assert_eq!(
            resolve_target("word/document.xml", "media/image1.png"),
            "word/media/image1.png"
        );
        assert_eq!(
            resolve_target("word/document.xml", "../customXml/item1.xml"),
            "customXml/item1.xml"
        );
        assert_eq!(
            resolve_target("word/document.xml", "/word/media/a.png"),
            "word/media/a.png"
        );
    }
}
