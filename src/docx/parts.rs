use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::DocxError;

pub(crate) const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const RELATIONSHIPS_PACKAGE_NS: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships";
const CONTENT_TYPES_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

static RELATIONSHIP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Relationship\b([^>]*?)/?>").unwrap());
static DEFAULT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Default\b([^>]*?)/?>").unwrap());
static OVERRIDE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Override\b([^>]*?)/?>").unwrap());
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});
static NUMBERED_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^rId(\d+)$").unwrap());

/// Attribute values are kept in their escaped form; they are written back
/// verbatim.
pub(crate) fn attributes(raw: &str) -> HashMap<&str, &str> {
    ATTRIBUTE
        .captures_iter(raw)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str();
            Some((name, value))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Relationships {
    items: Vec<Relationship>,
}

impl Relationships {
    pub fn parse(part: &str, xml: &str) -> Result<Self, DocxError> {
        let mut items = Vec::new();
        for caps in RELATIONSHIP_TAG.captures_iter(xml) {
            let attrs = attributes(&caps[1]);
            let field = |name: &str| {
                attrs
                    .get(name)
                    .map(|value| value.to_string())
                    .ok_or_else(|| DocxError::malformed(part, format!("relationship without {name}")))
            };
            items.push(Relationship {
                id: field("Id")?,
                rel_type: field("Type")?,
                target: field("Target")?,
                external: attrs
                    .get("TargetMode")
                    .is_some_and(|mode| mode.eq_ignore_ascii_case("External")),
            });
        }
        Ok(Self { items })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.items.iter().find(|rel| rel.id == id)
    }

    pub fn push(&mut self, rel: Relationship) {
        self.items.push(rel);
    }

    /// Next `rIdN` not used by any relationship in this set.
    pub fn allocate_id(&self) -> String {
        let mut next = self
            .items
            .iter()
            .filter_map(|rel| NUMBERED_ID.captures(&rel.id))
            .filter_map(|caps| caps[1].parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        loop {
            let candidate = format!("rId{next}");
            if self.get(&candidate).is_none() {
                return candidate;
            }
            next += 1;
        }
    }

    pub fn to_xml(&self) -> String {
        let mut xml = format!("{XML_DECLARATION}\n<Relationships xmlns=\"{RELATIONSHIPS_PACKAGE_NS}\">");
        for rel in &self.items {
            xml.push_str(&format!(
                "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\"",
                rel.id, rel.rel_type, rel.target
            ));
            if rel.external {
                xml.push_str(" TargetMode=\"External\"");
            }
            xml.push_str("/>");
        }
        xml.push_str("</Relationships>");
        xml
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentTypes {
    defaults: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
}

impl ContentTypes {
    pub fn parse(part: &str, xml: &str) -> Result<Self, DocxError> {
        let mut types = Self::default();
        for caps in DEFAULT_TAG.captures_iter(xml) {
            let attrs = attributes(&caps[1]);
            match (attrs.get("Extension"), attrs.get("ContentType")) {
                (Some(ext), Some(ct)) => types
                    .defaults
                    .push((ext.to_ascii_lowercase(), ct.to_string())),
                _ => return Err(DocxError::malformed(part, "incomplete Default entry")),
            }
        }
        for caps in OVERRIDE_TAG.captures_iter(xml) {
            let attrs = attributes(&caps[1]);
            match (attrs.get("PartName"), attrs.get("ContentType")) {
                (Some(name), Some(ct)) => types.overrides.push((name.to_string(), ct.to_string())),
                _ => return Err(DocxError::malformed(part, "incomplete Override entry")),
            }
        }
        Ok(types)
    }

    pub fn override_for(&self, part: &str) -> Option<&str> {
        let part_name = format!("/{part}");
        self.overrides
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&part_name))
            .map(|(_, ct)| ct.as_str())
    }

    pub fn default_for(&self, ext: &str) -> Option<&str> {
        self.defaults
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(ext))
            .map(|(_, ct)| ct.as_str())
    }

    pub fn content_type_for(&self, part: &str) -> Option<&str> {
        self.override_for(part)
            .or_else(|| extension(part).and_then(|ext| self.default_for(ext)))
    }

    /// Registers `part` so that it resolves to `content_type`, preferring a
    /// shared Default entry over a per-part Override.
    pub fn register(&mut self, part: &str, content_type: &str) {
        if self.content_type_for(part) == Some(content_type) {
            return;
        }
        if let Some(ext) = extension(part)
            && self.default_for(ext).is_none()
            && self.override_for(part).is_none()
        {
            self.defaults
                .push((ext.to_ascii_lowercase(), content_type.to_string()));
            return;
        }
        let part_name = format!("/{part}");
        self.overrides
            .retain(|(name, _)| !name.eq_ignore_ascii_case(&part_name));
        self.overrides.push((part_name, content_type.to_string()));
    }

    pub fn to_xml(&self) -> String {
        let mut xml = format!("{XML_DECLARATION}\n<Types xmlns=\"{CONTENT_TYPES_NS}\">");
        for (ext, ct) in &self.defaults {
            xml.push_str(&format!("<Default Extension=\"{ext}\" ContentType=\"{ct}\"/>"));
        }
        for (name, ct) in &self.overrides {
            xml.push_str(&format!("<Override PartName=\"{name}\" ContentType=\"{ct}\"/>"));
        }
        xml.push_str("</Types>");
        xml
    }
}

fn extension(part: &str) -> Option<&str> {
    let name = part.rsplit('/').next().unwrap_or(part);
    name.rsplit_once('.').map(|(_, ext)| ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
  <Relationship Id="rId7" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.org/?a=1&amp;b=2" TargetMode="External"/>
</Relationships>"#;

    #[test]
    fn parse_relationships() {
        let rels = Relationships::parse("word/_rels/document.xml.rels", RELS).unwrap();
        assert_eq!(rels.len(), 2);
        let link = rels.get("rId7").unwrap();
        assert!(link.external);
        assert_eq!(link.target, "https://example.org/?a=1&amp;b=2");
        assert_eq!(rels.allocate_id(), "rId8");
    }

    #[test]
    fn relationships_survive_rewrite() {
        let rels = Relationships::parse("r", RELS).unwrap();
        let again = Relationships::parse("r", &rels.to_xml()).unwrap();
        assert_eq!(again.iter().collect::<Vec<_>>(), rels.iter().collect::<Vec<_>>());
    }

    #[test]
    fn content_type_lookup_and_register() {
        let xml = r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Default Extension="PNG" ContentType="image/png"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;
        let mut types = ContentTypes::parse("[Content_Types].xml", xml).unwrap();
        assert_eq!(
            types.content_type_for("word/media/image1.png"),
            Some("image/png")
        );
        assert!(
            types
                .content_type_for("word/document.xml")
                .unwrap()
                .ends_with("main+xml")
        );

        types.register("word/media/m2_photo.jpeg", "image/jpeg");
        assert_eq!(types.default_for("jpeg"), Some("image/jpeg"));

        types.register("word/header9.xml", "application/header+xml");
        assert_eq!(
            types.override_for("word/header9.xml"),
            Some("application/header+xml")
        );
        assert!(types.to_xml().contains(r#"PartName="/word/header9.xml""#));
    }
}
