use std::io::{Cursor, Read, Seek, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::parts::Relationships;
use super::{DEFAULT_MAIN_PART, DocxError, OFFICE_DOCUMENT_REL, PACKAGE_RELS_PART, resolve_target};

/// Upper bound on the unpacked size of one package.
pub const MAX_UNPACKED_BYTES: u64 = 256 * 1024 * 1024;

/// All parts of a package, kept in archive order.
#[derive(Debug, Clone, Default)]
pub struct DocxPackage {
    parts: Vec<(String, Vec<u8>)>,
}

impl DocxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocxError> {
        Self::read_from(Cursor::new(bytes), MAX_UNPACKED_BYTES)
    }

    /// Reads every part, refusing packages that unpack to more than `limit`
    /// bytes in total. Declared entry sizes are only trusted for that check,
    /// never for allocation.
    fn read_from<R: Read + Seek>(reader: R, limit: u64) -> Result<Self, DocxError> {
        let mut archive = ZipArchive::new(reader)?;
        let mut parts = Vec::new();
        let mut remaining = limit;
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            if entry.size() > remaining {
                return Err(too_large(&name, limit));
            }
            let mut content = Vec::new();
            entry.take(remaining.saturating_add(1)).read_to_end(&mut content)?;
            let read = content.len() as u64;
            if read > remaining {
                return Err(too_large(&name, limit));
            }
            remaining -= read;
            parts.push((name, content));
        }
        Ok(Self { parts })
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(name, _)| name.as_str())
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.parts.iter().any(|(part, _)| part == name)
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(part, _)| part == name)
            .map(|(_, content)| content.as_slice())
    }

    pub fn require_part(&self, name: &str) -> Result<&[u8], DocxError> {
        self.part(name)
            .ok_or_else(|| DocxError::MissingPart(name.to_string()))
    }

    pub fn part_str(&self, name: &str) -> Result<&str, DocxError> {
        let bytes = self.require_part(name)?;
        std::str::from_utf8(bytes).map_err(|_| DocxError::malformed(name, "not valid UTF-8"))
    }

    /// Replaces the content of `name`, or appends a new part.
    pub fn set_part(&mut self, name: &str, content: Vec<u8>) {
        match self.parts.iter_mut().find(|(part, _)| part == name) {
            Some((_, existing)) => *existing = content,
            None => self.parts.push((name.to_string(), content)),
        }
    }

    /// Name of the main document part, taken from the package relationships
    /// and falling back to `word/document.xml`.
    pub fn main_part(&self) -> Result<String, DocxError> {
        if let Ok(xml) = self.part_str(PACKAGE_RELS_PART) {
            let rels = Relationships::parse(PACKAGE_RELS_PART, xml)?;
            if let Some(rel) = rels
                .iter()
                .find(|rel| rel.rel_type == OFFICE_DOCUMENT_REL && !rel.external)
            {
                return Ok(resolve_target("", &rel.target));
            }
        }
        if self.has_part(DEFAULT_MAIN_PART) {
            Ok(DEFAULT_MAIN_PART.to_string())
        } else {
            Err(DocxError::MissingPart(DEFAULT_MAIN_PART.to_string()))
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DocxError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, content) in &self.parts {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(content)?;
        }
        Ok(writer.finish()?.into_inner())
    }
}

fn too_large(part: &str, limit: u64) -> DocxError {
    DocxError::Unsupported(format!(
        "package unpacks to more than {limit} bytes (at {part})"
    ))
}
