//! Persisting repaired manifests.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::FetchResult;
use crate::manifest::MANIFEST_FILE;

/// Destination for a repaired manifest.
pub trait ManifestWriter: fmt::Debug + Send + Sync {
    /// Persist canonical manifest bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be stored.
    fn write_manifest(&self, contents: &[u8]) -> FetchResult<()>;
}

/// Writes `snap.manifest.json` into a package directory.
#[derive(Debug, Clone)]
pub struct FsManifestWriter {
    path: PathBuf,
}

impl FsManifestWriter {
    /// Writer targeting `<root>/snap.manifest.json`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: root.as_ref().join(MANIFEST_FILE),
        }
    }

    /// File the manifest is written to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ManifestWriter for FsManifestWriter {
    fn write_manifest(&self, contents: &[u8]) -> FetchResult<()> {
        std::fs::write(&self.path, contents)?;
        info!(path = %self.path.display(), "wrote repaired manifest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_into_root() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FsManifestWriter::new(dir.path());
        writer.write_manifest(b"{}\n").unwrap();

        assert_eq!(writer.path(), dir.path().join("snap.manifest.json"));
        assert_eq!(std::fs::read(writer.path()).unwrap(), b"{}\n");
    }

    #[test]
    fn missing_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FsManifestWriter::new(dir.path().join("absent"));
        let err = writer.write_manifest(b"{}").unwrap_err();
        assert!(matches!(err, crate::FetchError::Io(_)));
    }
}
