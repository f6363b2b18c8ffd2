#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use docmerge::docx::DocxPackage;
use docmerge::domain::SourceUrl;
use docmerge::fetch::{FetchFailure, SourceClient};
use docmerge::scratch::{DEFAULT_RETENTION, ScratchSpace};

pub const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
pub const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
pub const PAGE_BREAK: &str = r#"<w:br w:type="page"/>"#;

const IMAGE_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const HYPERLINK_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink";
const CHART_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/chart";
pub const NUMBERING_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/numbering";
const FOOTNOTES_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/footnotes";
const EXTRA_CONTENT_TYPES: [(&str, &str); 2] = [
    (
        "word/numbering.xml",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml",
    ),
    (
        "word/footnotes.xml",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.footnotes+xml",
    ),
];
const STYLES_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";

pub fn paragraph(text: &str) -> String {
    format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
}

pub fn document_xml(body: &str) -> String {
    document_xml_with_ns(body, "")
}

pub fn document_xml_with_ns(body: &str, extra_ns: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="{W_NS}" xmlns:r="{R_NS}"{extra_ns}><w:body>{body}<w:sectPr><w:pgSz w:w="11906" w:h="16838"/></w:sectPr></w:body></w:document>"#
    )
}

pub fn rels_xml(rels: &[(&str, &str, &str, bool)]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for (id, rel_type, target, external) in rels {
        let mode = if *external { r#" TargetMode="External""# } else { "" };
        xml.push_str(&format!(
            r#"<Relationship Id="{id}" Type="{rel_type}" Target="{target}"{mode}/>"#
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

/// Builds a minimal .docx package around `document`.
pub fn package(document: &str, doc_rels: &[(&str, &str, &str, bool)], extra: &[(&str, &[u8])]) -> Vec<u8> {
    let content_types = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="png" ContentType="image/png"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/word/charts/chart1.xml" ContentType="application/vnd.openxmlformats-officedocument.drawingml.chart+xml"/>"#;
    let mut content_types = content_types.to_string();
    for (name, content_type) in EXTRA_CONTENT_TYPES {
        if extra.iter().any(|(part, _)| *part == name) {
            content_types.push_str(&format!(
                r#"<Override PartName="/{name}" ContentType="{content_type}"/>"#
            ));
        }
    }
    content_types.push_str("</Types>");
    let package_rels = rels_xml(&[(
        "rId1",
        "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument",
        "word/document.xml",
        false,
    )]);
    let mut rels = vec![("rId1", STYLES_REL, "styles.xml", false)];
    rels.extend_from_slice(doc_rels);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let mut parts: Vec<(&str, Vec<u8>)> = vec![
        ("[Content_Types].xml", content_types.as_bytes().to_vec()),
        ("_rels/.rels", package_rels.into_bytes()),
        ("word/document.xml", document.as_bytes().to_vec()),
        ("word/_rels/document.xml.rels", rels_xml(&rels).into_bytes()),
    ];
    if !extra.iter().any(|(name, _)| *name == "word/styles.xml") {
        parts.push((
            "word/styles.xml",
            format!(r#"<w:styles xmlns:w="{W_NS}"/>"#).into_bytes(),
        ));
    }
    for (name, bytes) in extra {
        parts.push((*name, bytes.to_vec()));
    }
    for (name, bytes) in parts {
        writer.start_file(name, options).unwrap();
        writer.write_all(&bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body = paragraphs.iter().map(|text| paragraph(text)).collect::<String>();
    package(&document_xml(&body), &[], &[])
}

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake image";

pub fn docx_with_image(text: &str) -> Vec<u8> {
    let body = format!(
        r#"{}<w:p><w:r><w:drawing><a:blip xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" r:embed="rId5"/></w:drawing></w:r></w:p>"#,
        paragraph(text)
    );
    package(
        &document_xml(&body),
        &[("rId5", IMAGE_REL, "media/image1.png", false)],
        &[("word/media/image1.png", PNG_BYTES)],
    )
}

pub fn docx_with_hyperlink(text: &str, url: &str) -> Vec<u8> {
    let body = format!(
        r#"<w:p><w:hyperlink r:id="rId9"><w:r><w:t>{text}</w:t></w:r></w:hyperlink></w:p>"#
    );
    package(
        &document_xml(&body),
        &[("rId9", HYPERLINK_REL, url, true)],
        &[],
    )
}

pub fn docx_with_chart() -> Vec<u8> {
    let body = r#"<w:p><w:r><w:drawing><c:chart xmlns:c="http://schemas.openxmlformats.org/drawingml/2006/chart" r:id="rId7"/></w:drawing></w:r></w:p>"#;
    let chart_rels = rels_xml(&[(
        "rId1",
        "http://schemas.openxmlformats.org/officeDocument/2006/relationships/package",
        "../embeddings/Sheet1.xlsx",
        false,
    )]);
    package(
        &document_xml(body),
        &[("rId7", CHART_REL, "charts/chart1.xml", false)],
        &[
            ("word/charts/chart1.xml", &b"<c:chartSpace/>"[..]),
            ("word/charts/_rels/chart1.xml.rels", chart_rels.as_bytes()),
        ],
    )
}

pub fn styles_xml(styles: &str) -> String {
    format!(r#"<w:styles xmlns:w="{W_NS}">{styles}</w:styles>"#)
}

pub fn numbering_xml(definitions: &str) -> String {
    format!(r#"<w:numbering xmlns:w="{W_NS}">{definitions}</w:numbering>"#)
}

pub fn numbered(text: &str, num_id: u32) -> String {
    format!(
        r#"<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/><w:numId w:val="{num_id}"/></w:numPr></w:pPr><w:r><w:t>{text}</w:t></w:r></w:p>"#
    )
}

/// A one-level decimal list with `w:numId` 1 on `w:abstractNumId` 0.
pub fn simple_list(format: &str) -> String {
    numbering_xml(&format!(
        r#"<w:abstractNum w:abstractNumId="0"><w:lvl w:ilvl="0"><w:start w:val="1"/><w:numFmt w:val="{format}"/><w:lvlText w:val="%1."/></w:lvl></w:abstractNum><w:num w:numId="1"><w:abstractNumId w:val="0"/></w:num>"#
    ))
}

/// Document whose body uses list 1 from its own numbering part.
pub fn docx_with_list(items: &[&str], format: &str) -> Vec<u8> {
    let body = items.iter().map(|item| numbered(item, 1)).collect::<String>();
    let numbering = simple_list(format);
    package(
        &document_xml(&body),
        &[("rId3", NUMBERING_REL, "numbering.xml", false)],
        &[("word/numbering.xml", numbering.as_bytes())],
    )
}

pub fn docx_with_footnote(text: &str) -> Vec<u8> {
    let body = format!(
        r#"<w:p><w:r><w:t>{text}</w:t></w:r><w:r><w:footnoteReference w:id="2"/></w:r></w:p>"#
    );
    let footnotes = format!(
        r#"<w:footnotes xmlns:w="{W_NS}"><w:footnote w:id="2"><w:p><w:r><w:t>Source: exam board</w:t></w:r></w:p></w:footnote></w:footnotes>"#
    );
    package(
        &document_xml(&body),
        &[("rId4", FOOTNOTES_REL, "footnotes.xml", false)],
        &[("word/footnotes.xml", footnotes.as_bytes())],
    )
}

pub fn part_of(bytes: &[u8], name: &str) -> Option<String> {
    let package = DocxPackage::from_bytes(bytes).unwrap();
    package.part_str(name).ok().map(str::to_string)
}

pub fn document_of(bytes: &[u8]) -> String {
    let package = DocxPackage::from_bytes(bytes).unwrap();
    package.part_str("word/document.xml").unwrap().to_string()
}

pub fn scratch_space(temp: &tempfile::TempDir) -> ScratchSpace {
    let root = Utf8PathBuf::from_path_buf(temp.path().join("scratch")).unwrap();
    ScratchSpace::new(root, DEFAULT_RETENTION).unwrap()
}

pub fn scratch_listing(space: &ScratchSpace) -> Vec<String> {
    std::fs::read_dir(space.root().as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

/// Serves canned responses by URL and records the order of requests.
/// Clones share state, so a test can keep a handle on a client it moved
/// into a service.
#[derive(Default, Clone)]
pub struct MockClient {
    responses: Arc<Mutex<HashMap<String, Result<Vec<u8>, FetchFailure>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockClient {
    pub fn with(responses: Vec<(&str, Result<Vec<u8>, FetchFailure>)>) -> Self {
        let client = Self::default();
        for (url, response) in responses {
            client.respond(url, response);
        }
        client
    }

    pub fn respond(&self, url: &str, response: Result<Vec<u8>, FetchFailure>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl SourceClient for MockClient {
    fn fetch(&self, url: &SourceUrl) -> Result<Vec<u8>, FetchFailure> {
        self.calls.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .unwrap_or(Err(FetchFailure::Status(404)))
    }
}
