//! Capsule Fetch - acquisition and integrity verification of packaged capsules.
//!
//! A capsule is fetched from one of three sources, its files are harvested
//! into memory, and its manifest is cross-checked against its own
//! `package.json` before anything is trusted:
//!
//! - [`SourceLocation`] / [`SourceHandle`]: `npm:`, `http(s):` and `local:`
//!   locations behind one `manifest()` / `fetch(path)` surface
//! - [`version`]: npm-style range resolution with a stable-first policy
//! - [`extract`]: streaming, selective tarball extraction
//! - [`verify`]: schema checks, cross-checks and the bounded repair loop
//! - [`acquire`]: the whole pipeline in one call
//!
//! # Example
//!
//! ```rust,no_run
//! use capsule_fetch::{AcquireOptions, acquire};
//!
//! # async fn run() -> capsule_fetch::FetchResult<()> {
//! let options = AcquireOptions::default().with_range("^1.0.0");
//! let verified = acquire("npm:@metamask/example-snap", &options).await?;
//! println!("{} {}", verified.descriptor.name, verified.manifest.version);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod bundle;
pub mod config;
pub mod error;
pub mod extract;
pub mod location;
pub mod manifest;
pub mod npm;
pub mod transport;
pub mod verify;
pub mod version;

pub use bundle::{FileBundle, FileRole, PackageFile};
pub use config::{ConfigError, FetchConfig};
pub use error::{Artifact, FetchError, FetchResult};
pub use extract::{ArchiveExtractor, extract_tarball};
pub use location::{SourceHandle, SourceLocation};
pub use manifest::{PackageDescriptor, PackageManifest};
pub use verify::{
    CheckOutcome, ManifestVerifier, ValidationFailure, ValidationFailureReason, VerifiedBundle,
};
pub use version::{ResolvedVersion, VersionRange, resolve_version};

use tracing::info;

/// Inputs to [`acquire`] beyond the location itself.
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Registry, limits and HTTP settings.
    pub config: FetchConfig,
    /// Version range or dist-tag for npm locations.
    pub range: String,
    /// Verifier applied to the fetched files.
    pub verifier: ManifestVerifier,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self::new(FetchConfig::default())
    }
}

impl AcquireOptions {
    /// Options for `config`, accepting any version.
    #[must_use]
    pub fn new(config: FetchConfig) -> Self {
        Self {
            verifier: ManifestVerifier::from_config(&config),
            config,
            range: "*".to_string(),
        }
    }

    /// Request a version range or dist-tag.
    #[must_use]
    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = range.into();
        self
    }

    /// Replace the verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: ManifestVerifier) -> Self {
        self.verifier = verifier;
        self
    }
}

/// Fetch the capsule at `uri` and verify it.
///
/// Resolves the location, assembles the manifest, descriptor, source bundle
/// and icon through the resulting handle, and runs strict validation.
/// Nothing is repaired; use [`ManifestVerifier::check_and_repair`] on the
/// handle's bundle for that.
///
/// # Errors
///
/// Returns configuration problems as [`FetchError::InvalidLocation`], and
/// otherwise any error from location parsing, resolution, transport,
/// extraction or verification.
pub async fn acquire(uri: &str, options: &AcquireOptions) -> FetchResult<VerifiedBundle> {
    options
        .config
        .validate()
        .map_err(|e| FetchError::InvalidLocation {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;

    let location = SourceLocation::parse(uri, &options.config)?;
    let handle = SourceHandle::resolve(location, &options.range, &options.config).await?;
    let bundle = handle.bundle().await?;
    let verified = options.verifier.validate(bundle)?;

    info!(
        uri,
        package = %verified.descriptor.name,
        version = %verified.manifest.version,
        "capsule acquired"
    );
    Ok(verified)
}
