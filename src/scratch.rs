//! Request-scoped scratch files and the age-based sweep that catches files
//! abandoned by crashed requests.
//!
//! Every file a merge writes to disk is created through a [`ScratchSession`],
//! which removes all of them when it is closed or dropped. Names are random,
//! so concurrent sessions share the directory without coordination.

use std::fs;
use std::io;
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::MergeError;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

const NAME_PREFIX: &str = "docmerge-";

#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: Utf8PathBuf,
    retention: Duration,
}

impl ScratchSpace {
    pub fn new(root: Utf8PathBuf, retention: Duration) -> Result<Self, MergeError> {
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| MergeError::Filesystem(format!("create scratch dir {root}: {err}")))?;
        Ok(Self { root, retention })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn session(&self) -> ScratchSession {
        ScratchSession {
            root: self.root.clone(),
            paths: Vec::new(),
        }
    }

    /// Removes files this crate created in the scratch root that are older
    /// than the retention window, measured against `now`. Anything else in
    /// the directory is left alone.
    pub fn sweep(&self, now: SystemTime) -> Result<SweepReport, MergeError> {
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| MergeError::Filesystem(format!("read {}: {err}", self.root)))?;

        let mut report = SweepReport::default();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("scratch sweep: unreadable entry in {}: {err}", self.root);
                    report.failed += 1;
                    continue;
                }
            };
            if !entry.file_name().to_string_lossy().starts_with(NAME_PREFIX) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) => {
                    warn!("scratch sweep: stat {}: {err}", entry.path().display());
                    report.failed += 1;
                    continue;
                }
            };
            let born = metadata.created().or_else(|_| metadata.modified());
            let age = born
                .ok()
                .and_then(|born| now.duration_since(born).ok())
                .unwrap_or_default();
            if age <= self.retention {
                report.retained += 1;
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!("scratch sweep: removed {}", entry.path().display());
                    report.removed += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!("scratch sweep: remove {}: {err}", entry.path().display());
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
    pub retained: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub failed: usize,
}

/// Owns the scratch files of one merge request.
#[derive(Debug)]
pub struct ScratchSession {
    root: Utf8PathBuf,
    paths: Vec<Utf8PathBuf>,
}

impl ScratchSession {
    /// Creates an empty, uniquely named file and records it for cleanup.
    pub fn reserve_path(&mut self, suffix: &str) -> Result<Utf8PathBuf, MergeError> {
        let temp = tempfile::Builder::new()
            .prefix(NAME_PREFIX)
            .suffix(suffix)
            .rand_bytes(12)
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| MergeError::Filesystem(format!("create scratch file: {err}")))?;
        let (_file, path) = temp
            .keep()
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        let path = match Utf8PathBuf::from_path_buf(path) {
            Ok(path) => path,
            Err(path) => {
                let _ = fs::remove_file(&path);
                return Err(MergeError::Filesystem(
                    "non-utf8 scratch file path".to_string(),
                ));
            }
        };
        self.paths.push(path.clone());
        Ok(path)
    }

    pub fn write_file(&mut self, suffix: &str, bytes: &[u8]) -> Result<Utf8PathBuf, MergeError> {
        let path = self.reserve_path(suffix)?;
        fs::write(path.as_std_path(), bytes)
            .map_err(|err| MergeError::Filesystem(format!("write {path}: {err}")))?;
        Ok(path)
    }

    pub fn close(mut self) -> CleanupReport {
        self.cleanup()
    }

    fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for path in self.paths.drain(..) {
            match fs::remove_file(path.as_std_path()) {
                Ok(()) => report.removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => report.removed += 1,
                Err(err) => {
                    warn!("failed to remove scratch file {path}: {err}");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

impl Drop for ScratchSession {
    fn drop(&mut self) {
        if !self.paths.is_empty() {
            self.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(temp: &tempfile::TempDir) -> ScratchSpace {
        let root = Utf8PathBuf::from_path_buf(temp.path().join("scratch")).unwrap();
        ScratchSpace::new(root, DEFAULT_RETENTION).unwrap()
    }

    fn listing(space: &ScratchSpace) -> usize {
        fs::read_dir(space.root().as_std_path()).unwrap().count()
    }

    #[test]
    fn drop_removes_every_file() {
        let temp = tempfile::tempdir().unwrap();
        let space = space(&temp);
        {
            let mut session = space.session();
            session.write_file(".docx", b"PK\x03\x04").unwrap();
            session.write_file(".docx", b"PK\x03\x04").unwrap();
            session.reserve_path(".docx").unwrap();
            assert_eq!(listing(&space), 3);
        }
        assert_eq!(listing(&space), 0);
    }

    #[test]
    fn names_are_unique() {
        let temp = tempfile::tempdir().unwrap();
        let space = space(&temp);
        let mut session = space.session();
        let a = session.reserve_path(".docx").unwrap();
        let b = session.reserve_path(".docx").unwrap();
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().starts_with(NAME_PREFIX));
    }

    #[test]
    fn failed_removal_does_not_stop_cleanup() {
        let temp = tempfile::tempdir().unwrap();
        let space = space(&temp);
        let mut session = space.session();
        let first = session.reserve_path(".docx").unwrap();
        session.reserve_path(".docx").unwrap();
        // a directory where a file is expected makes remove_file fail
        fs::remove_file(first.as_std_path()).unwrap();
        fs::create_dir(first.as_std_path()).unwrap();

        let report = session.close();
        assert_eq!(report, CleanupReport { removed: 1, failed: 1 });
        assert_eq!(listing(&space), 1);
    }

    #[test]
    fn sweep_respects_retention() {
        let temp = tempfile::tempdir().unwrap();
        let space = space(&temp);
        let mut session = space.session();
        session.write_file(".docx", b"old").unwrap();
        std::mem::forget(session);

        let report = space.sweep(SystemTime::now()).unwrap();
        assert_eq!(report.retained, 1);
        assert_eq!(report.removed, 0);

        let later = SystemTime::now() + DEFAULT_RETENTION + Duration::from_secs(60);
        let report = space.sweep(later).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(listing(&space), 0);
    }

    #[test]
    fn sweep_leaves_foreign_files() {
        let temp = tempfile::tempdir().unwrap();
        let space = space(&temp);
        fs::write(space.root().join("notes.txt").as_std_path(), b"keep").unwrap();
        let mut session = space.session();
        session.write_file(".docx", b"old").unwrap();
        std::mem::forget(session);

        let later = SystemTime::now() + DEFAULT_RETENTION * 2;
        let report = space.sweep(later).unwrap();
        assert_eq!(report.removed, 1);
        assert!(space.root().join("notes.txt").as_std_path().exists());
        assert_eq!(listing(&space), 1);
    }

    #[test]
    fn sweep_skips_directories() {
        let temp = tempfile::tempdir().unwrap();
        let space = space(&temp);
        fs::create_dir(space.root().join("docmerge-nested").as_std_path()).unwrap();
        let later = SystemTime::now() + DEFAULT_RETENTION * 2;
        let report = space.sweep(later).unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
