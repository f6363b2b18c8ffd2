use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info};

use crate::docx::{Composer, DocxError, DocxPackage};
use crate::error::MergeError;
use crate::validate::{ContainerSignature, detect_signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssemblyReport {
    pub documents: usize,
    pub page_breaks: usize,
}

/// Merges `inputs` in order into one document at `output`.
///
/// A single input is copied byte for byte. Otherwise the first input is the
/// base and every following input is appended after a page break, so N
/// inputs yield N-1 breaks. The first input that cannot be merged aborts the
/// whole run and `output` is left untouched.
pub fn assemble(inputs: &[Utf8PathBuf], output: &Utf8Path) -> Result<AssemblyReport, MergeError> {
    let Some(first) = inputs.first() else {
        return Err(MergeError::NoSources);
    };

    if inputs.len() == 1 {
        fs::copy(first.as_std_path(), output.as_std_path())
            .map_err(|err| MergeError::Filesystem(format!("copy {first} to {output}: {err}")))?;
        debug!("single document, copied {first} to {output}");
        return Ok(AssemblyReport {
            documents: 1,
            page_breaks: 0,
        });
    }

    let base = load(1, first)?;
    let mut composer = Composer::new(base).map_err(failed_at(1, first))?;
    for (index, path) in inputs.iter().enumerate().skip(1) {
        let position = index + 1;
        let document = load(position, path)?;
        composer.append(&document).map_err(failed_at(position, path))?;
    }

    let page_breaks = composer.page_breaks();
    let bytes = composer
        .finish()
        .to_bytes()
        .map_err(|err| MergeError::Filesystem(format!("serialize merged document: {err}")))?;
    fs::write(output.as_std_path(), &bytes)
        .map_err(|err| MergeError::Filesystem(format!("write {output}: {err}")))?;

    info!(
        "assembled {} documents into {output} ({} bytes)",
        inputs.len(),
        bytes.len()
    );
    Ok(AssemblyReport {
        documents: inputs.len(),
        page_breaks,
    })
}

fn load(position: usize, path: &Utf8PathBuf) -> Result<DocxPackage, MergeError> {
    let bytes = fs::read(path.as_std_path()).map_err(|err| failed_at(position, path)(err.into()))?;
    if detect_signature(&bytes) == Some(ContainerSignature::CompoundFile) {
        return Err(failed_at(position, path)(DocxError::Unsupported(
            "legacy binary .doc files can only be passed through on their own".to_string(),
        )));
    }
    DocxPackage::from_bytes(&bytes).map_err(failed_at(position, path))
}

fn failed_at(position: usize, path: &Utf8Path) -> impl Fn(DocxError) -> MergeError + '_ {
    move |source| MergeError::Assembly {
        position,
        path: path.to_path_buf(),
        source,
    }
}
