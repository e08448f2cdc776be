//! In-memory file table produced by acquisition.

use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::{Artifact, FetchError, FetchResult};
use crate::manifest::{DESCRIPTOR_FILE, MANIFEST_FILE};

/// Logical role of a file inside a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileRole {
    /// `snap.manifest.json`.
    Manifest,
    /// `package.json`.
    Descriptor,
    /// The executable bundle named by the manifest.
    SourceBundle,
    /// The optional icon named by the manifest.
    Icon,
}

impl FileRole {
    /// Every role, in bundle order.
    pub const ALL: [Self; 4] = [
        Self::Manifest,
        Self::Descriptor,
        Self::SourceBundle,
        Self::Icon,
    ];

    /// The artifact used in error messages for this role.
    #[must_use]
    pub fn artifact(self) -> Artifact {
        match self {
            Self::Manifest => Artifact::Manifest,
            Self::Descriptor => Artifact::Descriptor,
            Self::SourceBundle => Artifact::SourceBundle,
            Self::Icon => Artifact::Icon,
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.artifact(), f)
    }
}

/// A file captured from a package, addressed by its path relative to the
/// package root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    /// Normalized path relative to the package root.
    pub path: String,
    /// Raw contents.
    pub data: Vec<u8>,
}

impl PackageFile {
    /// Create a file, normalizing its path.
    #[must_use]
    pub fn new(path: &str, data: Vec<u8>) -> Self {
        Self {
            path: normalize_path(path),
            data,
        }
    }

    /// Decode the contents as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Extraction`] tagged with `artifact` when the
    /// contents are not valid JSON of the requested shape.
    pub fn json<T: DeserializeOwned>(&self, artifact: Artifact) -> FetchResult<T> {
        serde_json::from_slice(&self.data).map_err(|e| {
            FetchError::extraction(artifact, format!("{} is not valid JSON: {e}", self.path))
        })
    }
}

/// Files harvested for one package.
///
/// Exclusively owned by the acquisition that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileBundle {
    /// `snap.manifest.json`.
    pub manifest: Option<PackageFile>,
    /// `package.json`.
    pub descriptor: Option<PackageFile>,
    /// Source bundle named by the manifest.
    pub source_bundle: Option<PackageFile>,
    /// Icon named by the manifest.
    pub icon: Option<PackageFile>,
}

impl FileBundle {
    /// The file stored under `role`, if any.
    #[must_use]
    pub fn get(&self, role: FileRole) -> Option<&PackageFile> {
        match role {
            FileRole::Manifest => self.manifest.as_ref(),
            FileRole::Descriptor => self.descriptor.as_ref(),
            FileRole::SourceBundle => self.source_bundle.as_ref(),
            FileRole::Icon => self.icon.as_ref(),
        }
    }

    /// Store `file` under `role`, returning the previous occupant.
    pub fn set(&mut self, role: FileRole, file: PackageFile) -> Option<PackageFile> {
        let slot = match role {
            FileRole::Manifest => &mut self.manifest,
            FileRole::Descriptor => &mut self.descriptor,
            FileRole::SourceBundle => &mut self.source_bundle,
            FileRole::Icon => &mut self.icon,
        };
        slot.replace(file)
    }

    /// The file stored under `role`, or [`FetchError::MissingFile`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::MissingFile`] when the role is empty.
    pub fn require(&self, role: FileRole) -> FetchResult<&PackageFile> {
        self.get(role).ok_or_else(|| FetchError::MissingFile {
            artifact: role.artifact(),
            path: match role {
                FileRole::Manifest => MANIFEST_FILE.to_string(),
                FileRole::Descriptor => DESCRIPTOR_FILE.to_string(),
                FileRole::SourceBundle | FileRole::Icon => format!("<{role}>"),
            },
        })
    }

    /// Look a file up by path across all roles.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&PackageFile> {
        let path = normalize_path(path);
        FileRole::ALL
            .iter()
            .filter_map(|role| self.get(*role))
            .find(|file| file.path == path)
    }

    /// Roles that currently hold a file.
    #[must_use]
    pub fn populated_roles(&self) -> Vec<FileRole> {
        FileRole::ALL
            .into_iter()
            .filter(|role| self.get(*role).is_some())
            .collect()
    }
}

/// Normalize a package-relative path: forward slashes, no leading `./` or `/`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut rest = path.as_str();
    loop {
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        } else {
            break;
        }
    }
    rest.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_leading_markers() {
        assert_eq!(normalize_path("./dist/bundle.js"), "dist/bundle.js");
        assert_eq!(normalize_path("/images/icon.svg"), "images/icon.svg");
        assert_eq!(normalize_path("././a.js"), "a.js");
        assert_eq!(normalize_path("dist\\bundle.js"), "dist/bundle.js");
    }

    #[test]
    fn set_get_and_find() {
        let mut bundle = FileBundle::default();
        assert!(bundle.populated_roles().is_empty());

        bundle.set(
            FileRole::SourceBundle,
            PackageFile::new("./dist/bundle.js", b"code".to_vec()),
        );
        assert_eq!(bundle.populated_roles(), vec![FileRole::SourceBundle]);
        assert_eq!(
            bundle.get(FileRole::SourceBundle).unwrap().path,
            "dist/bundle.js"
        );
        assert_eq!(bundle.find("dist/bundle.js").unwrap().data, b"code");
        assert_eq!(bundle.find("./dist/bundle.js").unwrap().data, b"code");
        assert!(bundle.find("other.js").is_none());
    }

    #[test]
    fn require_reports_missing_role() {
        let bundle = FileBundle::default();
        let err = bundle.require(FileRole::Descriptor).unwrap_err();
        assert_eq!(err.to_string(), "descriptor: missing file package.json");
    }

    #[test]
    fn json_errors_name_the_artifact() {
        let file = PackageFile::new("package.json", b"{ nope".to_vec());
        let err = file
            .json::<serde_json::Value>(Artifact::Descriptor)
            .unwrap_err();
        assert!(err.to_string().starts_with("descriptor: extraction error"));
    }
}
