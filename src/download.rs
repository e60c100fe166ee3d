//! Hand the finished artifact to the user.
//!
//! [`DirectoryDownloads`] mirrors the browser's object-URL dance: the bytes are
//! staged in a uniquely named temporary file, which is persisted to its final
//! name on success and removed on every other exit path.

use crate::compositor::ExportArtifact;
use crate::{Error, Result};
use log::debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// `dashboard-<file_name>.<ext>`; path separators become `_`.
pub fn artifact_file_name(file_name: &str, extension: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    format!("dashboard-{}.{}", safe, extension.trim_start_matches('.'))
}

pub trait DownloadSink: Send + Sync {
    /// Deliver the artifact under `file_name`, returning where it went.
    fn deliver(&self, artifact: &ExportArtifact, file_name: &str) -> Result<PathBuf>;
}

/// Saves downloads into a directory.
#[derive(Debug, Clone)]
pub struct DirectoryDownloads {
    dir: PathBuf,
}

impl DirectoryDownloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DownloadSink for DirectoryDownloads {
    fn deliver(&self, artifact: &ExportArtifact, file_name: &str) -> Result<PathBuf> {
        let lost = |e: std::io::Error| {
            Error::DownloadTriggerError(format!(
                "{} ({} artifact bytes not saved to {})",
                e,
                artifact.len(),
                self.dir.display()
            ))
        };
        let target = self.dir.join(file_name);
        // The staged file gets a unique name and is removed on drop unless persisted.
        let mut staged = NamedTempFile::new_in(&self.dir).map_err(lost)?;
        staged.write_all(&artifact.bytes).map_err(lost)?;
        staged.as_file().sync_all().map_err(lost)?;
        staged.persist(&target).map_err(|e| lost(e.error))?;
        debug!("saved {} bytes to {}", artifact.len(), target.display());
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn artifact() -> ExportArtifact {
        ExportArtifact { bytes: b"%PDF-1.4 test".to_vec(), content_type: "application/pdf".into() }
    }

    fn entries(dir: &Path) -> Vec<std::ffi::OsString> {
        fs::read_dir(dir).unwrap().map(|e| e.unwrap().file_name()).collect()
    }

    #[test]
    fn names_are_deterministic() {
        assert_eq!(artifact_file_name("sales.csv", "pdf"), "dashboard-sales.csv.pdf");
        assert_eq!(artifact_file_name("sales.csv", ".pdf"), artifact_file_name("sales.csv", "pdf"));
        assert_eq!(artifact_file_name("../etc/passwd", "pdf"), "dashboard-.._etc_passwd.pdf");
    }

    #[test]
    fn delivers_and_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectoryDownloads::new(dir.path());
        let path = sink.deliver(&artifact(), "dashboard-a.pdf").unwrap();
        assert_eq!(fs::read(&path).unwrap(), artifact().bytes);
        assert_eq!(entries(dir.path()), vec![std::ffi::OsString::from("dashboard-a.pdf")]);
    }

    #[test]
    fn failed_trigger_removes_the_staged_bytes() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory squatting on the target name makes the persist fail.
        fs::create_dir_all(dir.path().join("dashboard-b.pdf").join("occupied")).unwrap();
        let sink = DirectoryDownloads::new(dir.path());
        let err = sink.deliver(&artifact(), "dashboard-b.pdf").unwrap_err();
        assert!(err.artifact_lost());
        assert_eq!(entries(dir.path()), vec![std::ffi::OsString::from("dashboard-b.pdf")]);
    }

    #[test]
    fn missing_directory_is_a_trigger_error() {
        let sink = DirectoryDownloads::new("/definitely/not/here/dashsnap");
        assert!(matches!(sink.deliver(&artifact(), "x.pdf"), Err(Error::DownloadTriggerError(_))));
    }

    #[test]
    fn concurrent_sinks_saving_the_same_name_both_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let sink = DirectoryDownloads::new(dir.path());
                std::thread::spawn(move || {
                    let a = ExportArtifact { bytes: vec![i; 64 * 1024], content_type: "application/pdf".into() };
                    sink.deliver(&a, "dashboard-same.pdf")
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        let saved = fs::read(dir.path().join("dashboard-same.pdf")).unwrap();
        assert_eq!(saved.len(), 64 * 1024);
        // One writer's bytes, never a mix.
        assert!(saved.iter().all(|b| *b == saved[0]));
        assert_eq!(entries(dir.path()).len(), 1);
    }
}
