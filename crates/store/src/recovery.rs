//! Loading the current document, falling back through backup and temp files.
//!
//! A corrupted cache never fails a load. The chain is:
//!
//! 1. missing or blank primary: empty document
//! 2. primary parses: that document
//! 3. recovery enabled: first of backup, temp that parses, written back to
//!    the primary
//! 4. otherwise: empty document
//!
//! Only I/O failures while reading an existing primary are returned as errors.

use crate::document::{self, CacheDocument};
use crate::layout::FileLayout;
use crate::writer::AtomicWriter;
use crate::{Error, Result};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

/// Where a loaded document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// No primary file exists
    Missing,
    /// The primary file is empty or whitespace only
    Blank,
    /// The primary file parsed successfully
    Primary,
    /// The primary was corrupt and the backup was restored
    Backup,
    /// The primary was corrupt and the temp file was restored
    Temp,
    /// The primary was corrupt and nothing could be recovered
    Empty,
}

/// Loads the document for a [`FileLayout`] with optional recovery
#[derive(Debug, Clone)]
pub struct RecoveryLoader {
    writer: AtomicWriter,
    recovery: bool,
}

impl RecoveryLoader {
    /// Create a loader; `recovery` enables the backup/temp fallback chain
    #[must_use]
    pub fn new(layout: FileLayout, recovery: bool) -> Self {
        Self {
            writer: AtomicWriter::new(layout),
            recovery,
        }
    }

    /// Whether the fallback chain is enabled
    #[must_use]
    pub fn recovery_enabled(&self) -> bool {
        self.recovery
    }

    /// Load the current document
    pub async fn load(&self) -> Result<CacheDocument> {
        self.load_with_source().await.map(|(document, _)| document)
    }

    /// Load the current document and report which file produced it
    pub async fn load_with_source(&self) -> Result<(CacheDocument, LoadSource)> {
        let layout = self.writer.layout();
        let primary = layout.primary();

        let Some(bytes) = read_optional(primary).await? else {
            return Ok((CacheDocument::new(), LoadSource::Missing));
        };

        // Bytes that are not UTF-8 are corruption like any other decode failure.
        let reason = match String::from_utf8(bytes) {
            Ok(contents) if document::is_blank(&contents) => {
                return Ok((CacheDocument::new(), LoadSource::Blank));
            }
            Ok(contents) => match document::decode(&contents) {
                Ok(document) => return Ok((document, LoadSource::Primary)),
                Err(e) => e.to_string(),
            },
            Err(e) => e.to_string(),
        };

        if !self.recovery {
            warn!(
                path = %primary.display(),
                error = %reason,
                "Cache file is corrupt and recovery is disabled; starting empty"
            );
            return Ok((CacheDocument::new(), LoadSource::Empty));
        }

        warn!(
            path = %primary.display(),
            error = %reason,
            "Cache file is corrupt; attempting recovery"
        );

        let candidates = [
            (layout.backup(), LoadSource::Backup),
            (layout.temp(), LoadSource::Temp),
        ];
        for (path, source) in candidates {
            let Some(document) = read_candidate(path).await else {
                continue;
            };

            info!(
                path = %primary.display(),
                from = %path.display(),
                entries = document.len(),
                "Recovered cache document"
            );
            if let Err(e) = self.writer.persist_without_backup(&document).await {
                warn!(
                    path = %primary.display(),
                    error = %e,
                    "Failed to restore recovered document to primary"
                );
            }
            return Ok((document, source));
        }

        warn!(
            path = %primary.display(),
            "No recoverable cache generation found; starting empty"
        );
        Ok((CacheDocument::new(), LoadSource::Empty))
    }
}

/// Read a file, mapping a missing file to `None`
async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(e, path, "read")),
    }
}

/// Read and decode a recovery candidate; any failure disqualifies it
async fn read_candidate(path: &Path) -> Option<CacheDocument> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Recovery candidate unreadable");
            return None;
        }
    };
    let contents = match String::from_utf8(bytes) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Recovery candidate is not UTF-8");
            return None;
        }
    };
    if document::is_blank(&contents) {
        debug!(path = %path.display(), "Recovery candidate is blank");
        return None;
    }
    match document::decode(&contents) {
        Ok(document) => Some(document),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Recovery candidate is corrupt");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CacheEntry;
    use serde_json::json;
    use tempfile::TempDir;

    fn document_with(keys: &[&str]) -> CacheDocument {
        let mut document = CacheDocument::new();
        for key in keys {
            document.upsert(CacheEntry::new(*key, "test/v1", json!(key), 1).with_tags(["t"]));
        }
        document
    }

    fn write_document(path: &Path, document: &CacheDocument) {
        std::fs::write(path, document::encode(document).unwrap()).unwrap();
    }

    struct Fixture {
        _dir: TempDir,
        layout: FileLayout,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let layout = FileLayout::new(dir.path().join("cache.json"));
        Fixture { _dir: dir, layout }
    }

    #[tokio::test]
    async fn test_missing_primary_is_empty() {
        let f = fixture();
        let loader = RecoveryLoader::new(f.layout.clone(), true);

        let (document, source) = loader.load_with_source().await.unwrap();
        assert!(document.is_empty());
        assert_eq!(source, LoadSource::Missing);
        assert!(!f.layout.primary().exists());
    }

    #[tokio::test]
    async fn test_blank_primary_is_empty_without_recovery() {
        let f = fixture();
        std::fs::write(f.layout.primary(), "  \n ").unwrap();
        write_document(f.layout.backup(), &document_with(&["old"]));

        let loader = RecoveryLoader::new(f.layout.clone(), true);
        let (document, source) = loader.load_with_source().await.unwrap();
        assert!(document.is_empty());
        assert_eq!(source, LoadSource::Blank);
    }

    #[tokio::test]
    async fn test_corrupt_primary_restores_from_backup() {
        let f = fixture();
        let expected = document_with(&["a", "b"]);
        std::fs::write(f.layout.primary(), "{not json").unwrap();
        write_document(f.layout.backup(), &expected);
        write_document(f.layout.temp(), &document_with(&["temp"]));

        let loader = RecoveryLoader::new(f.layout.clone(), true);
        let (document, source) = loader.load_with_source().await.unwrap();

        assert_eq!(source, LoadSource::Backup);
        assert_eq!(document, expected);

        let restored = std::fs::read_to_string(f.layout.primary()).unwrap();
        assert_eq!(document::decode(&restored).unwrap(), expected);
        let backup = std::fs::read_to_string(f.layout.backup()).unwrap();
        assert_eq!(document::decode(&backup).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_falls_back_to_temp_when_backup_corrupt() {
        let f = fixture();
        let expected = document_with(&["staged"]);
        std::fs::write(f.layout.primary(), "[1, 2").unwrap();
        std::fs::write(f.layout.backup(), "garbage").unwrap();
        write_document(f.layout.temp(), &expected);

        let loader = RecoveryLoader::new(f.layout.clone(), true);
        let (document, source) = loader.load_with_source().await.unwrap();

        assert_eq!(source, LoadSource::Temp);
        assert_eq!(document, expected);
        let restored = std::fs::read_to_string(f.layout.primary()).unwrap();
        assert_eq!(document::decode(&restored).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_wrong_shape_candidates_are_skipped() {
        let f = fixture();
        std::fs::write(f.layout.primary(), "\"just a string\"").unwrap();
        std::fs::write(f.layout.backup(), "[]").unwrap();
        std::fs::write(f.layout.temp(), "").unwrap();

        let loader = RecoveryLoader::new(f.layout.clone(), true);
        let (document, source) = loader.load_with_source().await.unwrap();
        assert!(document.is_empty());
        assert_eq!(source, LoadSource::Empty);
    }

    #[tokio::test]
    async fn test_recovery_disabled_returns_empty_and_leaves_files() {
        let f = fixture();
        std::fs::write(f.layout.primary(), "{broken").unwrap();
        write_document(f.layout.backup(), &document_with(&["a"]));

        let loader = RecoveryLoader::new(f.layout.clone(), false);
        let (document, source) = loader.load_with_source().await.unwrap();

        assert!(document.is_empty());
        assert_eq!(source, LoadSource::Empty);
        assert_eq!(std::fs::read_to_string(f.layout.primary()).unwrap(), "{broken");
    }

    #[tokio::test]
    async fn test_non_utf8_primary_restores_from_backup() {
        let f = fixture();
        let expected = document_with(&["a"]);
        std::fs::write(f.layout.primary(), [0xff, 0xfe, 0x00, 0x7b]).unwrap();
        write_document(f.layout.backup(), &expected);

        let loader = RecoveryLoader::new(f.layout.clone(), true);
        let (document, source) = loader.load_with_source().await.unwrap();

        assert_eq!(source, LoadSource::Backup);
        assert_eq!(document, expected);
        let restored = std::fs::read_to_string(f.layout.primary()).unwrap();
        assert_eq!(document::decode(&restored).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_non_utf8_primary_without_recovery_is_empty() {
        let f = fixture();
        std::fs::write(f.layout.primary(), [0xff, 0xfe, 0x00, 0x7b]).unwrap();
        write_document(f.layout.backup(), &document_with(&["a"]));

        let loader = RecoveryLoader::new(f.layout.clone(), false);
        let (document, source) = loader.load_with_source().await.unwrap();

        assert!(document.is_empty());
        assert_eq!(source, LoadSource::Empty);
    }

    #[tokio::test]
    async fn test_non_utf8_backup_is_skipped() {
        let f = fixture();
        let expected = document_with(&["staged"]);
        std::fs::write(f.layout.primary(), "{broken").unwrap();
        std::fs::write(f.layout.backup(), [0xc3, 0x28]).unwrap();
        write_document(f.layout.temp(), &expected);

        let loader = RecoveryLoader::new(f.layout.clone(), true);
        let (document, source) = loader.load_with_source().await.unwrap();

        assert_eq!(source, LoadSource::Temp);
        assert_eq!(document, expected);
    }

    #[tokio::test]
    async fn test_unreadable_primary_is_an_error() {
        let f = fixture();
        // Reading a directory fails with something other than NotFound.
        std::fs::create_dir(f.layout.primary()).unwrap();

        let loader = RecoveryLoader::new(f.layout.clone(), true);
        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
