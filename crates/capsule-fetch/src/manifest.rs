//! Manifest and descriptor types.
//!
//! A package ships two metadata files:
//!
//! - the **descriptor** (`package.json`), the package's own self-description;
//! - the **manifest** (`snap.manifest.json`), which must agree with the
//!   descriptor and additionally pins the source bundle's digest and the
//!   location of the source bundle and icon inside the archive.
//!
//! Field order in [`PackageManifest`] is the canonical order used when a
//! repaired manifest is written back. Every object keeps its unknown keys,
//! after the known ones, so a repair only changes the field it targets.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::bundle::normalize_path;
use crate::error::FetchResult;

/// File name of the manifest at the package root.
pub const MANIFEST_FILE: &str = "snap.manifest.json";

/// File name of the descriptor at the package root.
pub const DESCRIPTOR_FILE: &str = "package.json";

/// The only accepted shasum algorithm.
pub const SHASUM_ALGORITHM: &str = "sha256";

/// Length of a padded base64 SHA-256 digest.
pub const SHASUM_HASH_LEN: usize = 44;

/// Manifest format version.
pub const MANIFEST_VERSION: &str = "0.1";

/// Source repository reference.
///
/// Equality covers every key, so a `directory` present on one side only is
/// a mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository kind, usually `git`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Repository URL.
    pub url: String,
    /// Other keys such as `directory`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Content digest of the source bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shasum {
    /// Digest algorithm; always [`SHASUM_ALGORITHM`].
    pub algorithm: String,
    /// Padded base64 digest.
    pub hash: String,
    /// Unknown fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Shasum {
    /// Digest `data` with SHA-256.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self {
            algorithm: SHASUM_ALGORITHM.to_string(),
            hash: base64::engine::general_purpose::STANDARD.encode(Sha256::digest(data)),
            extra: Map::new(),
        }
    }
}

/// Where the package's files live, as declared by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpmLocation {
    /// Source bundle path relative to the package root.
    pub file_path: String,
    /// Icon path relative to the package root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
    /// Declared package name; must equal the descriptor's `name`.
    pub package_name: String,
    /// Registry the package is published to.
    pub registry: String,
    /// Unknown fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Location wrapper (`{"npm": {...}}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestLocation {
    /// npm publication details.
    pub npm: NpmLocation,
    /// Unknown fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The manifest's `source` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSource {
    /// Digest of the source bundle.
    pub shasum: Shasum,
    /// File layout.
    pub location: ManifestLocation,
    /// Unknown fields such as `files` or `locales`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parsed `snap.manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    /// Package version; must equal the descriptor's.
    pub version: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_name: Option<String>,
    /// Repository; must deeply equal the descriptor's.
    #[serde(default)]
    pub repository: Option<Repository>,
    /// Digest and file layout.
    pub source: ManifestSource,
    /// Requested permissions, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_permissions: Option<Map<String, Value>>,
    /// Manifest format version.
    pub manifest_version: String,
    /// Unknown fields, preserved on write-back after the known ones.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageManifest {
    /// Declared package name.
    #[must_use]
    pub fn package_name(&self) -> &str {
        &self.source.location.npm.package_name
    }

    /// Normalized source bundle path.
    #[must_use]
    pub fn source_path(&self) -> String {
        normalize_path(&self.source.location.npm.file_path)
    }

    /// Normalized icon path, if declared.
    #[must_use]
    pub fn icon_path(&self) -> Option<String> {
        self.source
            .location
            .npm
            .icon_path
            .as_deref()
            .map(normalize_path)
    }

    /// Serialize in canonical form: typed field order, two-space
    /// indentation, trailing newline.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FetchError::Serialize`] if serialization fails.
    pub fn to_canonical_json(&self) -> FetchResult<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(self)?;
        out.push(b'\n');
        Ok(out)
    }
}

/// Parsed `package.json` (only the fields cross-checked against the
/// manifest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// Repository reference.
    #[serde(default)]
    pub repository: Option<Repository>,
}

/// Source bundle and icon paths declared by a manifest that has not yet
/// been schema-checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredPaths {
    /// `source.location.npm.filePath`.
    pub source: Option<String>,
    /// `source.location.npm.iconPath`.
    pub icon: Option<String>,
}

impl DeclaredPaths {
    /// Read declared paths out of raw manifest JSON.
    ///
    /// Missing or non-string fields yield `None`; schema validation reports
    /// them later.
    #[must_use]
    pub fn from_manifest_value(manifest: &Value) -> Self {
        let read = |pointer: &str| {
            manifest
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(normalize_path)
        };
        Self {
            source: read("/source/location/npm/filePath"),
            icon: read("/source/location/npm/iconPath"),
        }
    }
}
