//! Crash-safe replacement of the primary cache file.
//!
//! Every persist runs the same protocol regardless of document size:
//!
//! 1. create the parent directory if missing
//! 2. encode the document
//! 3. write it to `<name>.tmp` and `sync_all` before closing
//! 4. copy the current primary to `<name>.bak` (best effort)
//! 5. rename the temp file onto the primary, removing the primary and
//!    retrying once if the platform refuses to rename over it
//!
//! Until step 5 completes the primary holds the previous generation; after it,
//! the new one. Readers never observe a partially written primary.

use crate::document::{self, CacheDocument};
use crate::layout::FileLayout;
use crate::{Error, Result};
use std::io::ErrorKind;
use tokio::fs;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// What happened to the backup copy during a persist.
///
/// The backup is a safety net rather than part of the write's correctness, so
/// a failure is reported here instead of as an error.
#[derive(Debug)]
pub enum BackupOutcome {
    /// The previous primary was copied to the backup path
    Written,
    /// There was no primary to back up
    NoPrimary,
    /// Backup was not attempted for this write
    Skipped,
    /// Copying failed; the write still went ahead
    Failed(std::io::Error),
}

impl BackupOutcome {
    /// Whether a backup copy now reflects the previous primary
    #[must_use]
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written)
    }
}

/// Writes documents to a [`FileLayout`] using temp-write, backup, rename
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    layout: FileLayout,
}

impl AtomicWriter {
    /// Create a writer for the given file triplet
    #[must_use]
    pub fn new(layout: FileLayout) -> Self {
        Self { layout }
    }

    /// The file triplet this writer replaces
    #[must_use]
    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    /// Persist `document`, backing up the current primary first
    pub async fn persist(&self, document: &CacheDocument) -> Result<BackupOutcome> {
        self.replace(document, true).await
    }

    /// Persist `document` without touching the backup.
    ///
    /// Used when restoring a corrupted primary, whose bytes must not replace
    /// the known-good backup.
    pub async fn persist_without_backup(&self, document: &CacheDocument) -> Result<()> {
        self.replace(document, false).await.map(|_| ())
    }

    async fn replace(&self, document: &CacheDocument, backup: bool) -> Result<BackupOutcome> {
        self.ensure_parent().await?;

        let contents = document::encode(document)?;
        self.stage(contents.as_bytes()).await?;

        let outcome = if backup {
            self.backup_primary().await
        } else {
            BackupOutcome::Skipped
        };
        if let BackupOutcome::Failed(e) = &outcome {
            warn!(
                backup = %self.layout.backup().display(),
                error = %e,
                "Failed to back up cache file; continuing without backup"
            );
        }

        self.promote().await?;

        debug!(
            path = %self.layout.primary().display(),
            entries = document.len(),
            bytes = contents.len(),
            "Persisted cache document"
        );
        Ok(outcome)
    }

    async fn ensure_parent(&self) -> Result<()> {
        let Some(parent) = self.layout.parent() else {
            return Ok(());
        };
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(e, parent, "create_dir_all"))
    }

    async fn stage(&self, contents: &[u8]) -> Result<()> {
        let temp = self.layout.temp();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp)
            .await
            .map_err(|e| Error::io(e, temp, "open"))?;

        file.write_all(contents)
            .await
            .map_err(|e| Error::io(e, temp, "write_all"))?;

        file.sync_all()
            .await
            .map_err(|e| Error::io(e, temp, "sync_all"))?;

        drop(file);
        Ok(())
    }

    async fn backup_primary(&self) -> BackupOutcome {
        match fs::copy(self.layout.primary(), self.layout.backup()).await {
            Ok(_) => BackupOutcome::Written,
            Err(e) if e.kind() == ErrorKind::NotFound => BackupOutcome::NoPrimary,
            Err(e) => BackupOutcome::Failed(e),
        }
    }

    async fn promote(&self) -> Result<()> {
        let temp = self.layout.temp();
        let primary = self.layout.primary();

        let Err(first) = fs::rename(temp, primary).await else {
            return Ok(());
        };
        debug!(
            path = %primary.display(),
            error = %first,
            "Rename over primary failed; removing primary and retrying once"
        );

        match fs::remove_file(primary).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(e, primary, "remove_file")),
        }
        fs::rename(temp, primary)
            .await
            .map_err(|e| Error::io(e, primary, "rename"))
    }
}
