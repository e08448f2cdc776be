//! npm registry client.
//!
//! Talks to the registry over plain HTTP, never through the npm CLI, so no
//! lifecycle scripts run. Every request, including the tarball download,
//! is pinned to the registry origin.

use tracing::{debug, info, warn};
use url::Url;

use super::integrity::verify_sri_integrity;
use super::name::PackageName;
use super::types::{PackageMetadata, VersionMetadata};
use crate::config::FetchConfig;
use crate::error::{Artifact, FetchError, FetchResult};
use crate::transport::HttpTransport;
use crate::version::{self, ResolvedVersion, VersionRange};

/// Suffix every tarball URL must carry.
const TARBALL_SUFFIX: &str = ".tgz";

/// HTTP client for one npm registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    transport: HttpTransport,
}

/// A version picked from registry metadata, with its download details.
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    /// Package being fetched.
    pub name: PackageName,
    /// Chosen version.
    pub version: ResolvedVersion,
    /// Tarball URL, already rewritten onto the registry origin.
    pub tarball_url: Url,
    /// SRI integrity string advertised by the registry.
    pub integrity: Option<String>,
}

impl RegistryClient {
    /// Create a client for `registry` (a root URL ending in `/`).
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &FetchConfig, registry: Url) -> FetchResult<Self> {
        Ok(Self {
            transport: HttpTransport::new(config, registry)?,
        })
    }

    /// Registry root URL.
    #[must_use]
    pub fn registry(&self) -> &Url {
        self.transport.origin()
    }

    /// Fetch the full metadata document for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] (registry metadata) on network
    /// failure, non-2xx status or malformed JSON.
    pub async fn metadata(&self, name: &PackageName) -> FetchResult<PackageMetadata> {
        let url = self
            .registry()
            .join(&name.registry_path())
            .map_err(|e| {
                FetchError::transport(
                    Artifact::RegistryMetadata,
                    format!("cannot build metadata URL for {name}: {e}"),
                )
            })?;
        debug!(url = %url, "fetching package metadata");
        self.transport.get_json(&url, Artifact::RegistryMetadata).await
    }

    /// Pick the version to install for `range`.
    ///
    /// A range equal to a dist-tag (e.g. `latest`) selects the tagged
    /// version. Otherwise the range is resolved against every published
    /// version; entries that are not semver are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::VersionNotFound`] when nothing matches,
    /// [`FetchError::InvalidRange`] for an unparsable range,
    /// [`FetchError::InvalidVersion`] when a dist-tag points at an invalid
    /// version, and [`FetchError::InvalidTarballUrl`] when the chosen
    /// version has no usable tarball.
    pub fn select(
        &self,
        name: &PackageName,
        metadata: &PackageMetadata,
        range: &str,
    ) -> FetchResult<ResolvedPackage> {
        let (resolved, entry) = pick_version(name, metadata, range)?;

        let raw_tarball = entry.tarball().ok_or_else(|| FetchError::InvalidTarballUrl {
            package: name.full_name(),
            url: "<missing>".to_string(),
        })?;
        let tarball_url = rebase_tarball_url(name, raw_tarball, self.registry())?;

        Ok(ResolvedPackage {
            name: name.clone(),
            version: resolved,
            tarball_url,
            integrity: entry.integrity().map(str::to_string),
        })
    }

    /// Download the tarball for a resolved package and check its SRI hash.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::PackageTooLarge`], [`FetchError::Transport`],
    /// [`FetchError::RedirectBlocked`] or [`FetchError::IntegrityMismatch`].
    pub async fn download(&self, package: &ResolvedPackage) -> FetchResult<Vec<u8>> {
        info!(
            package = %package.name,
            version = %package.version,
            url = %package.tarball_url,
            "downloading tarball"
        );
        let data = self
            .transport
            .get_bytes(&package.tarball_url, Artifact::Tarball)
            .await?;

        match &package.integrity {
            Some(sri) => {
                debug!(package = %package.name, "verifying SRI integrity");
                verify_sri_integrity(&data, sri, &package.name.full_name())?;
            },
            None => warn!(package = %package.name, "registry advertised no integrity hash"),
        }
        Ok(data)
    }
}

fn pick_version<'m>(
    name: &PackageName,
    metadata: &'m PackageMetadata,
    range: &str,
) -> FetchResult<(ResolvedVersion, &'m VersionMetadata)> {
    let not_found = || FetchError::VersionNotFound {
        package: name.full_name(),
        range: range.to_string(),
    };

    let tagged = metadata.dist_tags.get(range.trim());
    let resolved = match tagged {
        Some(tagged) => {
            debug!(tag = range, version = %tagged, "range matches dist-tag");
            let version = version::parse_version(tagged)?;
            ResolvedVersion {
                range: VersionRange::dist_tag(range, &version),
                version,
            }
        },
        None => version::resolve(&metadata.version_list(), range)?.ok_or_else(not_found)?,
    };

    let entry = metadata
        .versions
        .iter()
        .find(|(raw, _)| {
            version::parse_version(raw).is_ok_and(|v| v == resolved.version)
        })
        .map(|(_, entry)| entry)
        .ok_or_else(not_found)?;

    Ok((resolved, entry))
}

/// Move a tarball URL onto the registry's scheme, host and port.
///
/// Metadata may point anywhere; only the path is taken from it.
fn rebase_tarball_url(name: &PackageName, raw: &str, registry: &Url) -> FetchResult<Url> {
    let invalid = || FetchError::InvalidTarballUrl {
        package: name.full_name(),
        url: raw.to_string(),
    };

    let mut url = Url::parse(raw).map_err(|_| invalid())?;
    if !url.path().ends_with(TARBALL_SUFFIX) {
        return Err(invalid());
    }

    url.set_scheme(registry.scheme()).map_err(|()| invalid())?;
    url.set_host(registry.host_str()).map_err(|_| invalid())?;
    url.set_port(registry.port()).map_err(|()| invalid())?;
    Ok(url)
}
