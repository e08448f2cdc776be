//! npm handle: resolve, download and extract once, then serve from memory.

use tracing::info;
use url::Url;

use crate::bundle::{FileBundle, FileRole, PackageFile};
use crate::config::FetchConfig;
use crate::error::{Artifact, FetchError, FetchResult};
use crate::extract::ArchiveExtractor;
use crate::npm::{PackageName, RegistryClient, ResolvedPackage};

/// A package downloaded from an npm registry and held in memory.
#[derive(Debug)]
pub struct NpmHandle {
    package: ResolvedPackage,
    files: FileBundle,
}

impl NpmHandle {
    pub(super) async fn resolve(
        registry: Url,
        name: PackageName,
        range: &str,
        config: &FetchConfig,
    ) -> FetchResult<Self> {
        let client = RegistryClient::new(config, registry)?;
        let metadata = client.metadata(&name).await?;
        let package = client.select(&name, &metadata, range)?;
        let tarball = client.download(&package).await?;
        let files = tokio::task::spawn_blocking(move || {
            ArchiveExtractor::default().extract(tarball.as_slice())
        })
        .await
        .map_err(|e| {
            FetchError::extraction(Artifact::Tarball, format!("extraction task failed: {e}"))
        })??;

        info!(
            package = %package.name,
            version = %package.version,
            roles = ?files.populated_roles(),
            "npm package acquired"
        );
        Ok(Self { package, files })
    }

    /// Resolved package details.
    #[must_use]
    pub fn package(&self) -> &ResolvedPackage {
        &self.package
    }

    /// Files captured from the tarball.
    #[must_use]
    pub fn bundle(&self) -> &FileBundle {
        &self.files
    }

    pub(super) fn manifest(&self) -> FetchResult<PackageFile> {
        self.files.require(FileRole::Manifest).cloned()
    }

    pub(super) fn fetch(&self, path: &str) -> FetchResult<PackageFile> {
        self.files
            .find(path)
            .cloned()
            .ok_or_else(|| FetchError::MissingFile {
                artifact: Artifact::Tarball,
                path: path.to_string(),
            })
    }
}
