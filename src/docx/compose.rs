use std::collections::HashMap;

use tracing::debug;

use super::definitions::{
    Definitions, append_styles, merge_numbering, missing_styles, num_refs, rewrite_num_refs,
    style_refs,
};
use super::package::DocxPackage;
use super::parts::{ContentTypes, Relationship, Relationships};
use super::xml::{
    PAGE_BREAK_PARAGRAPH, body_layout, declare_namespaces, missing_namespaces, namespace_prefix,
    note_reference, relationship_refs, rewrite_relationship_refs, root_namespaces,
};
use super::{
    CONTENT_TYPES_PART, DocxError, NUMBERING_CONTENT_TYPE, NUMBERING_REL, RELATIONSHIPS_NS,
    RELS_CONTENT_TYPE, STYLES_REL, WORDPROCESSING_NS, part_dir, rels_part_for, resolve_target,
};

/// Accumulates documents into a base package.
///
/// The base keeps its styles, numbering, settings and final section
/// properties. Each appended document contributes its body, the parts its
/// body references, the style definitions the base lacks and its own copy of
/// every list it uses.
#[derive(Debug)]
pub struct Composer {
    package: DocxPackage,
    main_part: String,
    document: String,
    rels: Relationships,
    content_types: ContentTypes,
    appended: usize,
    page_breaks: usize,
}

impl Composer {
    pub fn new(base: DocxPackage) -> Result<Self, DocxError> {
        let main_part = base.main_part()?;
        let document = base.part_str(&main_part)?.to_string();
        body_layout(&main_part, &document)?;
        let rels = read_rels(&base, &main_part)?;
        let content_types =
            ContentTypes::parse(CONTENT_TYPES_PART, base.part_str(CONTENT_TYPES_PART)?)?;
        Ok(Self {
            package: base,
            main_part,
            document,
            rels,
            content_types,
            appended: 0,
            page_breaks: 0,
        })
    }

    pub fn page_breaks(&self) -> usize {
        self.page_breaks
    }

    /// Appends a page break followed by the body of `other`. On error the
    /// composer is left unchanged.
    pub fn append(&mut self, other: &DocxPackage) -> Result<(), DocxError> {
        let other_main = other.main_part()?;
        let other_document = other.part_str(&other_main)?;
        let other_layout = body_layout(&other_main, other_document)?;
        let content = &other_document[other_layout.content.clone()];

        let other_namespaces = root_namespaces(&other_main, other_document)?;
        let missing_namespaces = missing_namespaces(
            &root_namespaces(&self.main_part, &self.document)?,
            &other_namespaces,
        )?;
        let w_prefix = namespace_prefix(&other_namespaces, WORDPROCESSING_NS);
        if let Some(w) = w_prefix.as_deref()
            && let Some(element) = note_reference(content, w)
        {
            return Err(DocxError::Unsupported(format!(
                "{w}:{element} points into notes or comments that cannot be merged"
            )));
        }
        let prefix = namespace_prefix(&other_namespaces, RELATIONSHIPS_NS);
        let refs = match prefix.as_deref() {
            Some(prefix) => relationship_refs(content, prefix),
            None => Vec::new(),
        };

        let ordinal = self.appended + 1;
        let other_rels = read_rels(other, &other_main)?;
        let mut staged = Staged {
            rels: self.rels.clone(),
            content_types: self.content_types.clone(),
            new_parts: Vec::new(),
            renamed: HashMap::new(),
        };
        if !refs.is_empty() {
            let other_types =
                ContentTypes::parse(CONTENT_TYPES_PART, other.part_str(CONTENT_TYPES_PART)?)?;
            let mut copied: HashMap<String, String> = HashMap::new();
            for id in &refs {
                let rel = other_rels
                    .get(id)
                    .ok_or_else(|| DocxError::DanglingRelationship(id.clone()))?;
                let target = if rel.external {
                    rel.target.clone()
                } else {
                    let source = resolve_target(&other_main, &rel.target);
                    let new_part = match copied.get(&source) {
                        Some(existing) => existing.clone(),
                        None => {
                            let new_part = self.copy_part(
                                other,
                                &other_types,
                                &source,
                                ordinal,
                                &mut staged,
                            )?;
                            copied.insert(source, new_part.clone());
                            new_part
                        }
                    };
                    self.relative_target(&new_part)
                };
                let new_id = staged.rels.allocate_id();
                staged.rels.push(Relationship {
                    id: new_id.clone(),
                    rel_type: rel.rel_type.clone(),
                    target,
                    external: rel.external,
                });
                staged.renamed.insert(id.clone(), new_id);
            }
        }

        let mut spliced = match prefix.as_deref() {
            Some(prefix) if !staged.renamed.is_empty() => {
                rewrite_relationship_refs(content, prefix, &staged.renamed)
            }
            _ => content.to_string(),
        };
        if let Some(w) = w_prefix.as_deref() {
            spliced = self.carry_definitions(other, &other_main, &other_rels, w, spliced, &mut staged)?;
        }

        let mut document = self.document.clone();
        declare_namespaces(&self.main_part, &mut document, &missing_namespaces)?;
        let insert_at = body_layout(&self.main_part, &document)?.insert_at;
        document.insert_str(insert_at, &format!("{PAGE_BREAK_PARAGRAPH}{spliced}"));

        debug!(
            "spliced document {} into {}: {} relationships, {} new or updated parts",
            ordinal + 1,
            self.main_part,
            staged.renamed.len(),
            staged.new_parts.len()
        );
        self.document = document;
        self.rels = staged.rels;
        self.content_types = staged.content_types;
        for (name, bytes) in staged.new_parts {
            self.package.set_part(&name, bytes);
        }
        self.appended = ordinal;
        self.page_breaks += 1;
        Ok(())
    }

    pub fn finish(mut self) -> DocxPackage {
        let rels_part = rels_part_for(&self.main_part);
        if !self.rels.is_empty() || self.package.has_part(&rels_part) {
            self.content_types.register(&rels_part, RELS_CONTENT_TYPE);
            self.package
                .set_part(&rels_part, self.rels.to_xml().into_bytes());
        }
        self.package
            .set_part(&self.main_part, self.document.into_bytes());
        self.package.set_part(
            CONTENT_TYPES_PART,
            self.content_types.to_xml().into_bytes(),
        );
        self.package
    }

    /// Brings over the styles and lists `content` uses and returns `content`
    /// with its list ids renamed to the merged ones.
    fn carry_definitions(
        &self,
        other: &DocxPackage,
        other_main: &str,
        other_rels: &Relationships,
        w: &str,
        content: String,
        staged: &mut Staged,
    ) -> Result<String, DocxError> {
        let mut num_ids = num_refs(&content, w);
        let mut copied_styles = Vec::new();
        let mut styles_target = None;

        let used_styles = style_refs(&content, w);
        if !used_styles.is_empty()
            && let Some((_, other_styles)) =
                definitions_part(other, other_main, other_rels, STYLES_REL, "styles")?
        {
            let base_styles =
                definitions_part(&self.package, &self.main_part, &self.rels, STYLES_REL, "styles")?;
            let candidates = match &base_styles {
                Some((_, base)) => missing_styles(base, &other_styles, &used_styles)?,
                None => missing_styles(
                    &Definitions::empty("word/styles.xml", "styles", other_styles.prefix())?,
                    &other_styles,
                    &used_styles,
                )?,
            };
            if !candidates.is_empty() {
                let Some(base_styles) = base_styles else {
                    return Err(DocxError::Unsupported(
                        "custom styles cannot be merged into a document without a styles part"
                            .to_string(),
                    ));
                };
                for style in &candidates {
                    for id in num_refs(style, other_styles.prefix()) {
                        if !num_ids.contains(&id) {
                            num_ids.push(id);
                        }
                    }
                }
                copied_styles = candidates;
                styles_target = Some((base_styles, other_styles));
            }
        }

        let mut content = content;
        if !num_ids.is_empty() {
            let (_, other_numbering) =
                definitions_part(other, other_main, other_rels, NUMBERING_REL, "numbering")?
                    .ok_or_else(|| {
                        DocxError::Unsupported(
                            "lists are used but the document has no numbering part".to_string(),
                        )
                    })?;
            let (numbering_part, base_numbering) = match definitions_part(
                &self.package,
                &self.main_part,
                &self.rels,
                NUMBERING_REL,
                "numbering",
            )? {
                Some(found) => found,
                None => self.new_numbering_part(other_numbering.prefix(), staged)?,
            };
            let merged = merge_numbering(&base_numbering, &other_numbering, &num_ids)?;
            content = rewrite_num_refs(&content, w, &merged.renamed);
            copied_styles = copied_styles
                .iter()
                .map(|style| rewrite_num_refs(style, other_numbering.prefix(), &merged.renamed))
                .collect();
            staged.new_parts.push((numbering_part, merged.xml.into_bytes()));
        }

        if let Some(((styles_part, base_styles), other_styles)) = styles_target {
            let xml = append_styles(&base_styles, &other_styles, &copied_styles)?;
            staged.new_parts.push((styles_part, xml.into_bytes()));
        }
        Ok(content)
    }

    /// Registers an empty numbering part for a base that has none.
    fn new_numbering_part(
        &self,
        prefix: &str,
        staged: &mut Staged,
    ) -> Result<(String, Definitions), DocxError> {
        let dir = part_dir(&self.main_part);
        let mut part = join_part(dir, "numbering.xml");
        let mut counter = 1;
        while self.package.has_part(&part) {
            counter += 1;
            part = join_part(dir, &format!("numbering{counter}.xml"));
        }
        let id = staged.rels.allocate_id();
        staged.rels.push(Relationship {
            id,
            rel_type: NUMBERING_REL.to_string(),
            target: self.relative_target(&part),
            external: false,
        });
        staged.content_types.register(&part, NUMBERING_CONTENT_TYPE);
        let definitions = Definitions::empty(&part, "numbering", prefix)?;
        Ok((part, definitions))
    }

    fn copy_part(
        &self,
        other: &DocxPackage,
        other_types: &ContentTypes,
        source: &str,
        ordinal: usize,
        staged: &mut Staged,
    ) -> Result<String, DocxError> {
        if other.has_part(&rels_part_for(source)) {
            return Err(DocxError::Unsupported(format!(
                "{source} carries its own relationships"
            )));
        }
        let bytes = other.require_part(source)?.to_vec();
        let content_type = other_types.content_type_for(source).ok_or_else(|| {
            DocxError::Unsupported(format!("no content type declared for {source}"))
        })?;

        let dir = part_dir(source);
        let file_name = source.rsplit('/').next().unwrap_or(source);
        let mut candidate = join_part(dir, &format!("d{ordinal}_{file_name}"));
        let mut counter = 1;
        while self.package.has_part(&candidate)
            || staged.new_parts.iter().any(|(name, _)| *name == candidate)
        {
            counter += 1;
            candidate = join_part(dir, &format!("d{ordinal}_{counter}_{file_name}"));
        }

        staged.content_types.register(&candidate, content_type);
        staged.new_parts.push((candidate.clone(), bytes));
        Ok(candidate)
    }

    fn relative_target(&self, part: &str) -> String {
        let dir = part_dir(&self.main_part);
        if dir.is_empty() {
            return part.to_string();
        }
        match part.strip_prefix(dir).and_then(|rest| rest.strip_prefix('/')) {
            Some(relative) => relative.to_string(),
            None => format!("/{part}"),
        }
    }
}

struct Staged {
    rels: Relationships,
    content_types: ContentTypes,
    new_parts: Vec<(String, Vec<u8>)>,
    renamed: HashMap<String, String>,
}

fn read_rels(package: &DocxPackage, main_part: &str) -> Result<Relationships, DocxError> {
    let rels_part = rels_part_for(main_part);
    if !package.has_part(&rels_part) {
        return Ok(Relationships::default());
    }
    Relationships::parse(&rels_part, package.part_str(&rels_part)?)
}

/// The package-wide definitions part reached from `main_part` through a
/// relationship of `rel_type`, if there is one.
fn definitions_part(
    package: &DocxPackage,
    main_part: &str,
    rels: &Relationships,
    rel_type: &str,
    root: &str,
) -> Result<Option<(String, Definitions)>, DocxError> {
    let Some(rel) = rels
        .iter()
        .find(|rel| rel.rel_type == rel_type && !rel.external)
    else {
        return Ok(None);
    };
    let part = resolve_target(main_part, &rel.target);
    let definitions = Definitions::parse(&part, package.part_str(&part)?, root)?;
    Ok(Some((part, definitions)))
}

fn join_part(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
