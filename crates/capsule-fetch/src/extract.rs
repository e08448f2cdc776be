//! Selective extraction of gzip-compressed package tarballs.
//!
//! Entries are pulled one at a time from the decompressed tar stream. Each
//! entry is either captured into memory or discarded, and every entry is
//! wrapped in a [`DrainOnDrop`] guard so its remaining bytes are consumed
//! before the next entry is requested, whichever way the loop body exits.
//!
//! Which `.js`/`.svg` file is the source bundle or icon is only known once
//! the manifest has been read, and the manifest may arrive after them. All
//! candidates are therefore buffered by path, and the declared files are
//! picked out after the stream ends.
//!
//! Nothing touches the filesystem, so unsafe entries (links, devices, `..`
//! paths) are skipped rather than rejected outright. Entry count and
//! cumulative size are capped against archive bombs.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use serde_json::Value;
use tar::{Archive, EntryType};
use tracing::{debug, info, warn};

use crate::bundle::{FileBundle, FileRole, PackageFile};
use crate::error::{Artifact, FetchError, FetchResult};
use crate::manifest::{DESCRIPTOR_FILE, DeclaredPaths, MANIFEST_FILE};

/// Maximum number of entries allowed in a tarball.
pub const MAX_ENTRY_COUNT: usize = 10_000;

/// Maximum total declared entry size (500 MB).
pub const MAX_EXTRACTED_SIZE: u64 = 500_000_000;

/// Largest buffer reserved up front from an entry's declared size.
const MAX_PREALLOCATION: u64 = 1_048_576;

/// Extract a tarball with the default file names and limits.
///
/// # Errors
///
/// See [`ArchiveExtractor::extract`].
pub fn extract_tarball<R: Read>(reader: R) -> FetchResult<FileBundle> {
    ArchiveExtractor::default().extract(reader)
}

/// Streaming tarball demultiplexer.
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    manifest_name: String,
    max_entries: usize,
    max_total_size: u64,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self {
            manifest_name: MANIFEST_FILE.to_string(),
            max_entries: MAX_ENTRY_COUNT,
            max_total_size: MAX_EXTRACTED_SIZE,
        }
    }
}

impl ArchiveExtractor {
    /// Override the manifest file name matched at the package root.
    #[must_use]
    pub fn with_manifest_name(mut self, name: impl Into<String>) -> Self {
        self.manifest_name = name.into();
        self
    }

    /// Override the entry count and cumulative size limits.
    #[must_use]
    pub fn with_limits(mut self, max_entries: usize, max_total_size: u64) -> Self {
        self.max_entries = max_entries;
        self.max_total_size = max_total_size;
        self
    }

    /// Consume a gzip-compressed tar stream and harvest the package files.
    ///
    /// Roles whose file was not found are left empty; the verifier reports
    /// them as missing files.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Extraction`] when decompression or the archive
    /// framing fails, when an entry/size limit is exceeded, when the archive
    /// has no entries, or when the descriptor or manifest is not valid JSON.
    pub fn extract<R: Read>(&self, reader: R) -> FetchResult<FileBundle> {
        let mut archive = Archive::new(GzDecoder::new(reader));
        let mut harvest = Harvest::default();
        let mut entry_count = 0usize;
        let mut total_size: u64 = 0;

        let entries = archive
            .entries()
            .map_err(|e| tarball_error(format!("failed to read archive entries: {e}")))?;

        for entry_result in entries {
            let entry = entry_result
                .map_err(|e| tarball_error(format!("failed to read archive entry: {e}")))?;
            let mut entry = DrainOnDrop::new(entry);

            entry_count = entry_count.saturating_add(1);
            if entry_count > self.max_entries {
                return Err(tarball_error(format!(
                    "archive exceeds maximum entry count ({})",
                    self.max_entries
                )));
            }

            let header = entry.get_ref().header();
            let entry_size = header
                .size()
                .map_err(|e| tarball_error(format!("failed to read entry size: {e}")))?;
            total_size = total_size.saturating_add(entry_size);
            if total_size > self.max_total_size {
                return Err(tarball_error(format!(
                    "archive exceeds maximum extracted size ({} bytes)",
                    self.max_total_size
                )));
            }

            let Some(path) = self.entry_path(entry.get_ref()) else {
                continue;
            };
            let Some(target) = self.classify(&path) else {
                debug!(path = %path, "discarding entry");
                continue;
            };

            let mut data = Vec::with_capacity(initial_capacity(entry_size));
            match entry.read_to_end(&mut data) {
                Ok(_) => {},
                Err(e) if target == Target::Candidate => {
                    warn!(path = %path, error = %e, "skipping unreadable entry");
                    continue;
                },
                Err(e) => {
                    return Err(FetchError::extraction(
                        target.artifact(),
                        format!("failed to read {path}: {e}"),
                    ));
                },
            }

            debug!(path = %path, bytes = data.len(), "captured entry");
            harvest.capture(target, path, data)?;
        }

        if entry_count == 0 {
            return Err(tarball_error("archive is empty"));
        }

        let bundle = harvest.finish();
        info!(
            entries = entry_count,
            roles = ?bundle.populated_roles(),
            "tarball extracted"
        );
        Ok(bundle)
    }

    /// Package-relative path of a regular-file entry, or `None` if the entry
    /// must be skipped.
    fn entry_path<R: Read>(&self, entry: &tar::Entry<'_, R>) -> Option<String> {
        let entry_type = entry.header().entry_type();
        if !matches!(entry_type, EntryType::Regular | EntryType::Continuous) {
            if !matches!(
                entry_type,
                EntryType::Directory
                    | EntryType::GNULongName
                    | EntryType::XHeader
                    | EntryType::XGlobalHeader
            ) {
                warn!(entry_type = ?entry_type, "skipping non-regular archive entry");
            }
            return None;
        }

        let raw = entry.path_bytes();
        let Ok(raw) = std::str::from_utf8(&raw) else {
            warn!("skipping entry with non UTF-8 path");
            return None;
        };

        if !is_contained(Path::new(raw)) {
            warn!(path = raw, "skipping entry with unsafe path");
            return None;
        }

        let stripped = strip_root_segment(raw);
        if stripped.is_empty() {
            return None;
        }
        Some(stripped.to_string())
    }

    fn classify(&self, path: &str) -> Option<Target> {
        if path == DESCRIPTOR_FILE {
            return Some(Target::Descriptor);
        }
        if path == self.manifest_name {
            return Some(Target::Manifest);
        }
        let candidate = Path::new(path).extension().is_some_and(|ext| {
            ext.eq_ignore_ascii_case("js") || ext.eq_ignore_ascii_case("svg")
        });
        candidate.then_some(Target::Candidate)
    }
}

/// Reads the wrapped entry to its end when dropped.
///
/// The next archive entry may only be requested once the current one has
/// been consumed; tying the drain to scope exit keeps that true on every
/// `continue`, early return and panic path.
pub struct DrainOnDrop<R: Read> {
    inner: R,
}

impl<R: Read> DrainOnDrop<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Borrow the wrapped reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

impl<R: Read> Read for DrainOnDrop<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read> Drop for DrainOnDrop<R> {
    fn drop(&mut self) {
        if let Err(e) = io::copy(&mut self.inner, &mut io::sink()) {
            debug!(error = %e, "failed to drain archive entry");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Descriptor,
    Manifest,
    Candidate,
}

impl Target {
    fn artifact(self) -> Artifact {
        match self {
            Self::Descriptor => Artifact::Descriptor,
            Self::Manifest => Artifact::Manifest,
            Self::Candidate => Artifact::Tarball,
        }
    }
}

/// Files captured while the stream is being read.
#[derive(Default)]
struct Harvest {
    descriptor: Option<PackageFile>,
    manifest: Option<(PackageFile, Value)>,
    candidates: HashMap<String, Vec<u8>>,
}

impl Harvest {
    fn capture(&mut self, target: Target, path: String, data: Vec<u8>) -> FetchResult<()> {
        match target {
            Target::Descriptor => {
                let file = PackageFile::new(&path, data);
                file.json::<Value>(Artifact::Descriptor)?;
                self.descriptor = Some(file);
            },
            Target::Manifest => {
                let file = PackageFile::new(&path, data);
                let value = file.json::<Value>(Artifact::Manifest)?;
                self.manifest = Some((file, value));
            },
            Target::Candidate => {
                self.candidates.insert(path, data);
            },
        }
        Ok(())
    }

    /// Resolve declared paths against the candidate cache.
    fn finish(mut self) -> FileBundle {
        let mut bundle = FileBundle {
            descriptor: self.descriptor.take(),
            ..FileBundle::default()
        };

        if let Some((file, value)) = self.manifest.take() {
            let declared = DeclaredPaths::from_manifest_value(&value);
            for (role, path) in [
                (FileRole::SourceBundle, declared.source),
                (FileRole::Icon, declared.icon),
            ] {
                let Some(path) = path else { continue };
                match self.candidates.remove(&path) {
                    Some(data) => {
                        bundle.set(role, PackageFile::new(&path, data));
                    },
                    None => debug!(path = %path, role = %role, "declared file not in archive"),
                }
            }
            bundle.manifest = Some(file);
        }

        bundle
    }
}

/// Buffer size to reserve for an entry; the header size is untrusted.
fn initial_capacity(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_PREALLOCATION)).unwrap_or(0)
}

fn tarball_error(message: impl Into<String>) -> FetchError {
    FetchError::extraction(Artifact::Tarball, message)
}

/// Whether a path stays inside the archive root.
fn is_contained(path: &Path) -> bool {
    !path.is_absolute()
        && path.components().all(|component| {
            !matches!(
                component,
                Component::ParentDir | Component::Prefix(_) | Component::RootDir
            )
        })
}

/// Drop the first path segment (`package/`, or whatever the packer used).
fn strip_root_segment(path: &str) -> &str {
    let path = path.trim_start_matches("./");
    match path.split_once('/') {
        Some((_, rest)) => rest.trim_start_matches('/'),
        None => "",
    }
}
