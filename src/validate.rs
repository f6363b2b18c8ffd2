use crate::error::MergeError;

const ZIP_SIGNATURES: [[u8; 4]; 3] = [
    [0x50, 0x4B, 0x03, 0x04],
    [0x50, 0x4B, 0x05, 0x06],
    [0x50, 0x4B, 0x07, 0x08],
];

const COMPOUND_FILE_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerSignature {
    /// OOXML packages (.docx) and anything else stored as a zip archive.
    Zip,
    /// OLE2 compound file, used by legacy .doc.
    CompoundFile,
}

pub fn detect_signature(bytes: &[u8]) -> Option<ContainerSignature> {
    if bytes.len() < 4 {
        return None;
    }
    if ZIP_SIGNATURES.iter().any(|sig| bytes.starts_with(sig)) {
        return Some(ContainerSignature::Zip);
    }
    if bytes.starts_with(&COMPOUND_FILE_SIGNATURE) {
        return Some(ContainerSignature::CompoundFile);
    }
    None
}

pub fn is_document(bytes: &[u8]) -> bool {
    detect_signature(bytes).is_some()
}

pub fn ensure_document(
    position: usize,
    url: &str,
    bytes: &[u8],
) -> Result<ContainerSignature, MergeError> {
    detect_signature(bytes).ok_or_else(|| MergeError::UnrecognizedFormat {
        position,
        url: url.to_string(),
        reason: describe_payload(bytes),
    })
}

fn describe_payload(bytes: &[u8]) -> String {
    if bytes.len() < 4 {
        return format!("payload too short ({} bytes)", bytes.len());
    }
    if bytes.starts_with(b"%PDF") {
        return "payload is a PDF".to_string();
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(64)]).to_ascii_lowercase();
    let head = head.trim_start_matches('\u{feff}').trim_start();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return "payload is an HTML page".to_string();
    }
    let leading = bytes
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("unknown leading bytes {leading}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn accepts_zip_family() {
        assert_eq!(
            detect_signature(b"PK\x03\x04rest"),
            Some(ContainerSignature::Zip)
        );
        assert_eq!(detect_signature(b"PK\x05\x06"), Some(ContainerSignature::Zip));
        assert_eq!(detect_signature(b"PK\x07\x08"), Some(ContainerSignature::Zip));
    }

    #[test]
    fn accepts_compound_file() {
        let mut bytes = COMPOUND_FILE_SIGNATURE.to_vec();
        bytes.extend_from_slice(&[0; 16]);
        assert_eq!(
            detect_signature(&bytes),
            Some(ContainerSignature::CompoundFile)
        );
    }

    #[test]
    fn rejects_short_and_foreign_payloads() {
        assert!(!is_document(b"PK\x03"));
        assert!(!is_document(b""));
        assert!(!is_document(b"%PDF-1.4"));
        assert!(!is_document(b"<html><body>404</body></html>"));
        // truncated compound-file header
        assert!(!is_document(&COMPOUND_FILE_SIGNATURE[..6]));
    }

    #[test]
    fn rejection_names_position_and_kind() {
        let err = ensure_document(2, "https://host/b.docx", b"<!DOCTYPE html><html>").unwrap_err();
        assert_matches!(
            &err,
            MergeError::UnrecognizedFormat { position: 2, reason, .. } if reason.contains("HTML")
        );
        let err = ensure_document(1, "https://host/a.pdf", b"%PDF-1.4").unwrap_err();
        assert_matches!(err, MergeError::UnrecognizedFormat { position: 1, .. });
    }
}
