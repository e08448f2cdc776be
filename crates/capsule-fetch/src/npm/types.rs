//! Serde types for npm registry JSON responses.

use std::collections::HashMap;

use serde::Deserialize;

/// Top-level npm registry response for a package.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageMetadata {
    /// Package name.
    #[serde(default)]
    pub name: String,
    /// Mapping of dist-tags to version strings (e.g. `{"latest": "1.0.0"}`).
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: HashMap<String, String>,
    /// Per-version metadata, keyed by semver string.
    #[serde(default)]
    pub versions: HashMap<String, VersionMetadata>,
}

impl PackageMetadata {
    /// Published version strings, in no particular order.
    #[must_use]
    pub fn version_list(&self) -> Vec<&str> {
        self.versions.keys().map(String::as_str).collect()
    }
}

/// Metadata for a single package version.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionMetadata {
    /// Version string.
    #[serde(default)]
    pub version: String,
    /// Distribution info; absent for some unpublished or broken entries.
    #[serde(default)]
    pub dist: Option<DistInfo>,
}

impl VersionMetadata {
    /// Tarball URL, if the registry advertised one.
    #[must_use]
    pub fn tarball(&self) -> Option<&str> {
        self.dist.as_ref().and_then(|d| d.tarball.as_deref())
    }

    /// SRI integrity string, if any.
    #[must_use]
    pub fn integrity(&self) -> Option<&str> {
        self.dist.as_ref().and_then(|d| d.integrity.as_deref())
    }
}

/// Distribution information for a published version.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DistInfo {
    /// Tarball download URL.
    #[serde(default)]
    pub tarball: Option<String>,
    /// SRI integrity string (e.g. `"sha512-<base64>"`).
    #[serde(default)]
    pub integrity: Option<String>,
    /// SHA-1 hex digest (legacy, never trusted).
    #[serde(default)]
    pub shasum: Option<String>,
}
