//! Style and list definitions that spliced body content points at.
//!
//! Paragraphs refer to styles by `w:styleId` and to lists by `w:numId`; both
//! are resolved against the package-wide `styles.xml` and `numbering.xml`.
//! When a body moves into another package, the styles it needs that the base
//! lacks are copied over, and every list it uses gets a fresh `w:num` and
//! `w:abstractNum` pair so it cannot bind to an unrelated list of the base.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use regex::{Captures, Regex};

use super::parts::{XML_DECLARATION, attributes};
use super::xml::{
    declared_namespaces, insert_declarations, is_element, missing_namespaces, skip_past,
    tag_end, top_level_elements,
};
use super::{DocxError, WORDPROCESSING_NS};

/// A `w:styles` or `w:numbering` part split into its top-level children.
#[derive(Debug, Clone)]
pub(crate) struct Definitions {
    part: String,
    xml: String,
    prefix: String,
    namespaces: Vec<(String, String)>,
    children: Vec<Range<usize>>,
    close: usize,
}

impl Definitions {
    pub(crate) fn parse(part: &str, xml: &str, root: &str) -> Result<Self, DocxError> {
        let (start, end) = root_start_tag(part, xml)?;
        let tag = &xml[start..end];
        let namespaces = declared_namespaces(tag);
        let prefix = namespaces
            .iter()
            .find(|(_, uri)| uri == WORDPROCESSING_NS)
            .map(|(prefix, _)| prefix.clone())
            .ok_or_else(|| {
                DocxError::malformed(part, "root element is not in the WordprocessingML namespace")
            })?;
        let qname = format!("{prefix}:{root}");
        if !is_element(tag, &qname) {
            return Err(DocxError::malformed(part, format!("root element is not {qname}")));
        }

        // `<w:styles .../>` is rewritten as an open/close pair so definitions
        // can be inserted.
        let xml = match tag.strip_suffix("/>") {
            Some(head) => format!("{}{}></{qname}>{}", &xml[..start], head.trim_end(), &xml[end..]),
            None => xml.to_string(),
        };
        let (_, end) = root_start_tag(part, &xml)?;
        let close = xml
            .rfind(&format!("</{qname}>"))
            .filter(|close| *close >= end)
            .ok_or_else(|| DocxError::malformed(part, format!("{qname} is not closed")))?;
        let children = top_level_elements(part, &xml[end..close])?
            .into_iter()
            .map(|range| range.start + end..range.end + end)
            .collect();

        Ok(Self {
            part: part.to_string(),
            xml,
            prefix,
            namespaces,
            children,
            close,
        })
    }

    /// An empty part named `part` with root `prefix:root`.
    pub(crate) fn empty(part: &str, root: &str, prefix: &str) -> Result<Self, DocxError> {
        let xml = format!(
            "{XML_DECLARATION}\n<{prefix}:{root} xmlns:{prefix}=\"{WORDPROCESSING_NS}\"></{prefix}:{root}>"
        );
        Self::parse(part, &xml, root)
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    fn text(&self, range: &Range<usize>) -> &str {
        &self.xml[range.clone()]
    }

    fn start_tag(&self, range: &Range<usize>) -> &str {
        let end = tag_end(self.xml.as_bytes(), range.start).unwrap_or(range.end);
        &self.xml[range.start..end.min(range.end)]
    }

    fn is(&self, range: &Range<usize>, local: &str) -> bool {
        is_element(self.text(range), &format!("{}:{local}", self.prefix))
    }

    fn attr(&self, range: &Range<usize>, local: &str) -> Option<&str> {
        let name = format!("{}:{local}", self.prefix);
        attributes(self.start_tag(range)).get(name.as_str()).copied()
    }

    fn elements<'a>(&'a self, local: &str) -> impl Iterator<Item = &'a Range<usize>> + use<'a> {
        let qname = format!("{}:{local}", self.prefix);
        self.children
            .iter()
            .filter(move |range| is_element(&self.xml[(*range).clone()], &qname))
    }

    fn find(&self, local: &str, id_attr: &str, id: &str) -> Option<&Range<usize>> {
        self.elements(local)
            .find(|range| self.attr(range, id_attr) == Some(id))
    }

    fn max_id(&self, local: &str, id_attr: &str) -> u64 {
        self.elements(local)
            .filter_map(|range| self.attr(range, id_attr)?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
    }

    /// The element at `range` with attribute `local` on its start tag set to
    /// `value`.
    fn with_attribute(&self, range: &Range<usize>, local: &str, value: &str) -> String {
        let tag = self.start_tag(range);
        let pattern = Regex::new(&format!(
            r#"(\s{}:{local}\s*=\s*")[^"]*(")"#,
            regex::escape(&self.prefix)
        ))
        .unwrap();
        let rewritten = pattern.replacen(tag, 1, |caps: &Captures| {
            format!("{}{value}{}", &caps[1], &caps[2])
        });
        format!("{rewritten}{}", &self.xml[range.start + tag.len()..range.end])
    }

    /// Declares on this part's root element the namespaces `other` binds
    /// that this part lacks.
    fn adopt_namespaces(&self, other: &Definitions, xml: &mut String) -> Result<(), DocxError> {
        let missing = missing_namespaces(&self.namespaces, &other.namespaces)?;
        if !missing.is_empty() {
            let (_, end) = root_start_tag(&self.part, xml)?;
            insert_declarations(xml, end, &missing);
        }
        Ok(())
    }
}

fn root_start_tag(part: &str, xml: &str) -> Result<(usize, usize), DocxError> {
    let mut pos = 0;
    loop {
        let offset = xml[pos..]
            .find('<')
            .ok_or_else(|| DocxError::malformed(part, "no root element"))?;
        let start = pos + offset;
        let rest = &xml[start..];
        if rest.starts_with("<?") {
            pos = skip_past(part, xml, start, "?>")?;
        } else if rest.starts_with("<!--") {
            pos = skip_past(part, xml, start, "-->")?;
        } else if rest.starts_with("<!") {
            pos = skip_past(part, xml, start, ">")?;
        } else {
            let end = tag_end(xml.as_bytes(), start)
                .ok_or_else(|| DocxError::malformed(part, "unterminated root tag"))?;
            return Ok((start, end));
        }
    }
}

fn value_pattern(prefix: &str, elements: &str) -> Regex {
    let prefix = regex::escape(prefix);
    Regex::new(&format!(
        r#"(<{prefix}:(?:{elements})\b[^>]*?\s{prefix}:val\s*=\s*")([^"]*)(")"#
    ))
    .unwrap()
}

fn distinct_values(pattern: &Regex, text: &str) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for caps in pattern.captures_iter(text) {
        if !values.iter().any(|known| *known == caps[2]) {
            values.push(caps[2].to_string());
        }
    }
    values
}

/// Style ids used by paragraph, run and table properties in `content`.
pub(crate) fn style_refs(content: &str, prefix: &str) -> Vec<String> {
    distinct_values(&value_pattern(prefix, "pStyle|rStyle|tblStyle"), content)
}

/// List instance ids used by numbering properties in `content`. `0` means
/// "no list" and is skipped.
pub(crate) fn num_refs(content: &str, prefix: &str) -> Vec<String> {
    distinct_values(&value_pattern(prefix, "numId"), content)
        .into_iter()
        .filter(|id| id != "0")
        .collect()
}

pub(crate) fn rewrite_num_refs(
    content: &str,
    prefix: &str,
    renamed: &HashMap<String, String>,
) -> String {
    value_pattern(prefix, "numId")
        .replace_all(content, |caps: &Captures| {
            let id = renamed.get(&caps[2]).map(String::as_str).unwrap_or(&caps[2]);
            format!("{}{id}{}", &caps[1], &caps[3])
        })
        .into_owned()
}

/// Style definitions of `other` reachable from `refs` through `basedOn`,
/// `next` and `link` that `base` does not define, in `other`'s order. Ids
/// the base already defines keep the base definition.
pub(crate) fn missing_styles(
    base: &Definitions,
    other: &Definitions,
    refs: &[String],
) -> Result<Vec<String>, DocxError> {
    if base.prefix != other.prefix {
        return Err(DocxError::Unsupported(format!(
            "{} uses prefix {} for WordprocessingML, base styles use {}",
            other.part, other.prefix, base.prefix
        )));
    }
    let known = base
        .elements("style")
        .filter_map(|range| base.attr(range, "styleId"))
        .collect::<HashSet<_>>();
    let linked = value_pattern(&other.prefix, "basedOn|next|link");

    let mut picked: HashSet<&str> = HashSet::new();
    let mut wanted = refs.to_vec();
    while let Some(id) = wanted.pop() {
        if known.contains(id.as_str()) || picked.contains(id.as_str()) {
            continue;
        }
        let Some(range) = other.find("style", "styleId", &id) else {
            continue;
        };
        if let Some(found) = other.attr(range, "styleId") {
            picked.insert(found);
        }
        wanted.extend(distinct_values(&linked, other.text(range)));
    }

    Ok(other
        .elements("style")
        .filter(|range| {
            other
                .attr(range, "styleId")
                .is_some_and(|id| picked.contains(id))
        })
        .map(|range| other.text(range).to_string())
        .collect())
}

/// `base` with `styles` appended and any namespaces they need declared.
pub(crate) fn append_styles(
    base: &Definitions,
    other: &Definitions,
    styles: &[String],
) -> Result<String, DocxError> {
    let mut xml = format!(
        "{}{}{}",
        &base.xml[..base.close],
        styles.concat(),
        &base.xml[base.close..]
    );
    base.adopt_namespaces(other, &mut xml)?;
    Ok(xml)
}

#[derive(Debug)]
pub(crate) struct NumberingMerge {
    pub xml: String,
    /// Old `w:numId` of the appended document to its id in the merged one.
    pub renamed: HashMap<String, String>,
}

/// Copies the lists `refs` names from `other` into `base` under fresh
/// `w:numId` and `w:abstractNumId` values.
pub(crate) fn merge_numbering(
    base: &Definitions,
    other: &Definitions,
    refs: &[String],
) -> Result<NumberingMerge, DocxError> {
    if base.prefix != other.prefix {
        return Err(DocxError::Unsupported(format!(
            "{} uses prefix {} for WordprocessingML, base numbering uses {}",
            other.part, other.prefix, base.prefix
        )));
    }
    let abstract_ref = value_pattern(&other.prefix, "abstractNumId");
    let mut next_num = base.max_id("num", "numId") + 1;
    let mut next_abstract = base.max_id("abstractNum", "abstractNumId") + 1;

    let mut renamed = HashMap::new();
    let mut abstract_renamed: HashMap<String, String> = HashMap::new();
    let mut abstracts = String::new();
    let mut nums = String::new();
    for id in refs {
        if renamed.contains_key(id) {
            continue;
        }
        let num = other.find("num", "numId", id).ok_or_else(|| {
            DocxError::Unsupported(format!("list {id} has no numbering definition"))
        })?;
        let num_text = other.text(num);
        let abstract_id = abstract_ref
            .captures(num_text)
            .map(|caps| caps[2].to_string())
            .ok_or_else(|| {
                DocxError::malformed(&other.part, format!("list {id} names no abstract definition"))
            })?;

        let new_abstract = match abstract_renamed.get(&abstract_id) {
            Some(existing) => existing.clone(),
            None => {
                let definition = other
                    .find("abstractNum", "abstractNumId", &abstract_id)
                    .ok_or_else(|| {
                        DocxError::malformed(
                            &other.part,
                            format!("abstract list {abstract_id} is not defined"),
                        )
                    })?;
                let new_id = next_abstract.to_string();
                next_abstract += 1;
                abstracts.push_str(&other.with_attribute(definition, "abstractNumId", &new_id));
                abstract_renamed.insert(abstract_id, new_id.clone());
                new_id
            }
        };

        let new_num = next_num.to_string();
        next_num += 1;
        let text = other.with_attribute(num, "numId", &new_num);
        let text = abstract_ref.replacen(&text, 1, |caps: &Captures| {
            format!("{}{new_abstract}{}", &caps[1], &caps[3])
        });
        nums.push_str(&text);
        renamed.insert(id.clone(), new_num);
    }

    // abstractNum*, num*, numIdMacAtCleanup?
    let abstract_at = base
        .children
        .iter()
        .find(|range| base.is(range, "num") || base.is(range, "numIdMacAtCleanup"))
        .map(|range| range.start)
        .unwrap_or(base.close);
    let num_at = base
        .elements("num")
        .last()
        .map(|range| range.end)
        .unwrap_or(abstract_at)
        .max(abstract_at);
    let mut xml = format!(
        "{}{abstracts}{}{nums}{}",
        &base.xml[..abstract_at],
        &base.xml[abstract_at..num_at],
        &base.xml[num_at..]
    );
    base.adopt_namespaces(other, &mut xml)?;
    Ok(NumberingMerge { xml, renamed })
}
