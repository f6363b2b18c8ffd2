use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::DocxError;

/// Paragraph holding a single page break run, placed between spliced
/// documents.
pub const PAGE_BREAK_PARAGRAPH: &str = r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#;

static BODY_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<w:body(?:\s[^>]*)?>").unwrap());
static DOCUMENT_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<w:document\b[^>]*>").unwrap());
static NAMESPACE_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\sxmlns:([\w.-]+)\s*=\s*"([^"]*)""#).unwrap());

/// Location of the pieces of a main document part that splicing touches.
#[derive(Debug, Clone)]
pub(crate) struct BodyLayout {
    /// Body children that carry content.
    pub content: Range<usize>,
    /// Offset at which new content goes: before the body-level `w:sectPr`,
    /// or before `</w:body>` when there is none.
    pub insert_at: usize,
}

pub(crate) fn body_layout(part: &str, xml: &str) -> Result<BodyLayout, DocxError> {
    let open = BODY_OPEN
        .find(xml)
        .ok_or_else(|| DocxError::malformed(part, "no w:body element"))?;
    let close = xml
        .rfind("</w:body>")
        .filter(|close| *close >= open.end())
        .ok_or_else(|| DocxError::malformed(part, "w:body is not closed"))?;
    let inner = &xml[open.end()..close];

    let children = top_level_elements(part, inner)?;
    let section = children
        .last()
        .cloned()
        .filter(|range| is_element(&inner[range.clone()], "w:sectPr"));
    let content_end = match section {
        Some(range) => open.end() + range.start,
        None => close,
    };
    Ok(BodyLayout {
        content: open.end()..content_end,
        insert_at: content_end,
    })
}

pub(crate) fn is_element(text: &str, name: &str) -> bool {
    text.strip_prefix('<')
        .and_then(|rest| rest.strip_prefix(name))
        .and_then(|rest| rest.chars().next())
        .is_some_and(|next| next.is_whitespace() || next == '>' || next == '/')
}

/// Byte ranges of the top-level elements of an XML fragment. Text, comments
/// and processing instructions between them are skipped.
pub(crate) fn top_level_elements(part: &str, fragment: &str) -> Result<Vec<Range<usize>>, DocxError> {
    let bytes = fragment.as_bytes();
    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut pos = 0usize;

    while let Some(offset) = fragment[pos..].find('<') {
        let tag_start = pos + offset;
        let rest = &fragment[tag_start..];
        if rest.starts_with("<!--") {
            pos = skip_past(part, fragment, tag_start, "-->")?;
            continue;
        }
        if rest.starts_with("<![CDATA[") {
            pos = skip_past(part, fragment, tag_start, "]]>")?;
            continue;
        }
        if rest.starts_with("<?") {
            pos = skip_past(part, fragment, tag_start, "?>")?;
            continue;
        }

        let tag_end = tag_end(bytes, tag_start)
            .ok_or_else(|| DocxError::malformed(part, "unterminated tag"))?;
        if rest.starts_with("</") {
            depth = depth
                .checked_sub(1)
                .ok_or_else(|| DocxError::malformed(part, "unbalanced closing tag"))?;
            if depth == 0 {
                elements.push(start..tag_end);
            }
        } else if bytes[tag_end - 2] == b'/' {
            if depth == 0 {
                elements.push(tag_start..tag_end);
            }
        } else {
            if depth == 0 {
                start = tag_start;
            }
            depth += 1;
        }
        pos = tag_end;
    }

    if depth != 0 {
        return Err(DocxError::malformed(part, "unclosed element"));
    }
    Ok(elements)
}

pub(crate) fn skip_past(part: &str, fragment: &str, from: usize, terminator: &str) -> Result<usize, DocxError> {
    fragment[from..]
        .find(terminator)
        .map(|offset| from + offset + terminator.len())
        .ok_or_else(|| DocxError::malformed(part, format!("missing {terminator}")))
}

/// Offset just past the `>` closing the tag at `start`, honouring quoted
/// attribute values.
pub(crate) fn tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (index, &byte) in bytes.iter().enumerate().skip(start + 1) {
        match (quote, byte) {
            (Some(open), _) if byte == open => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(byte),
            (None, b'>') => return Some(index + 1),
            (None, _) => {}
        }
    }
    None
}

/// `xmlns:prefix="uri"` declarations on the `w:document` root element.
pub(crate) fn root_namespaces(part: &str, xml: &str) -> Result<Vec<(String, String)>, DocxError> {
    let root = DOCUMENT_OPEN
        .find(xml)
        .ok_or_else(|| DocxError::malformed(part, "no w:document root element"))?;
    Ok(declared_namespaces(root.as_str()))
}

/// `xmlns:prefix="uri"` declarations on a single start tag.
pub(crate) fn declared_namespaces(tag: &str) -> Vec<(String, String)> {
    NAMESPACE_DECL
        .captures_iter(tag)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// Declarations in `theirs` that `ours` lacks. A prefix bound to a different
/// URI on each side cannot be reconciled.
pub(crate) fn missing_namespaces(
    ours: &[(String, String)],
    theirs: &[(String, String)],
) -> Result<Vec<(String, String)>, DocxError> {
    let mut missing = Vec::new();
    for (prefix, uri) in theirs {
        match ours.iter().find(|(known, _)| known == prefix) {
            Some((_, known_uri)) if known_uri == uri => {}
            Some((_, known_uri)) => {
                return Err(DocxError::Unsupported(format!(
                    "namespace prefix {prefix} is bound to {uri}, base document binds it to {known_uri}"
                )));
            }
            None => missing.push((prefix.clone(), uri.clone())),
        }
    }
    Ok(missing)
}

pub(crate) fn namespace_prefix(namespaces: &[(String, String)], uri: &str) -> Option<String> {
    namespaces
        .iter()
        .find(|(_, known)| known == uri)
        .map(|(prefix, _)| prefix.clone())
}

/// Adds namespace declarations to the `w:document` root element.
pub(crate) fn declare_namespaces(
    part: &str,
    xml: &mut String,
    decls: &[(String, String)],
) -> Result<(), DocxError> {
    if decls.is_empty() {
        return Ok(());
    }
    let root_end = DOCUMENT_OPEN
        .find(xml.as_str())
        .map(|root| root.end())
        .ok_or_else(|| DocxError::malformed(part, "no w:document root element"))?;
    insert_declarations(xml, root_end, decls);
    Ok(())
}

/// Inserts `decls` into the start tag that ends just before `tag_end`.
pub(crate) fn insert_declarations(xml: &mut String, tag_end: usize, decls: &[(String, String)]) {
    let mut at = tag_end - 1;
    if xml[..at].ends_with('/') {
        at -= 1;
    }
    let added = decls
        .iter()
        .map(|(prefix, uri)| format!(" xmlns:{prefix}=\"{uri}\""))
        .collect::<String>();
    xml.insert_str(at, &added);
}

static NOTE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([\w.-]+):(footnoteReference|endnoteReference|commentReference)\b").unwrap()
});

/// First footnote, endnote or comment reference in `content` made with the
/// WordprocessingML `prefix`. Those point into parts that are not carried
/// over.
pub(crate) fn note_reference<'a>(content: &'a str, prefix: &str) -> Option<&'a str> {
    NOTE_REFERENCE
        .captures_iter(content)
        .find(|caps| &caps[1] == prefix)
        .and_then(|caps| caps.get(2))
        .map(|name| name.as_str())
}

fn reference_pattern(prefix: &str) -> Regex {
    Regex::new(&format!(
        r#"(\s{}:[A-Za-z]+\s*=\s*")([^"]*)(")"#,
        regex::escape(prefix)
    ))
    .unwrap()
}

/// Relationship ids referenced by attributes in the relationships namespace,
/// in first-use order.
pub(crate) fn relationship_refs(content: &str, prefix: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in reference_pattern(prefix).captures_iter(content) {
        let id = &caps[2];
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

pub(crate) fn rewrite_relationship_refs(
    content: &str,
    prefix: &str,
    renamed: &HashMap<String, String>,
) -> String {
    reference_pattern(prefix)
        .replace_all(content, |caps: &Captures| {
            let id = &caps[2];
            let id = renamed.get(id).map(String::as_str).unwrap_or(id);
            format!("{}{}{}", &caps[1], id, &caps[3])
        })
        .into_owned()
}
