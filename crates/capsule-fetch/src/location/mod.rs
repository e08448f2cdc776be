//! Location resolution.
//!
//! A location URI names where a package comes from:
//!
//! | URI | Variant |
//! |---|---|
//! | `npm:<name>` | [`SourceLocation::Npm`] on the configured registry |
//! | `npm://host[:port]/<name>` | [`SourceLocation::Npm`] on an explicit registry |
//! | `http://…`, `https://…` | [`SourceLocation::Http`] |
//! | `local:http://localhost:8080` | [`SourceLocation::Local`] (loopback only) |
//!
//! [`SourceHandle::resolve`] turns a location into a handle exposing
//! `manifest()` and `fetch(path)`. Dispatch is a plain `match` on the
//! variant.

mod http;
mod npm;

use std::fmt;

use serde_json::Value;
use tracing::{debug, info};
use url::Url;

pub use self::http::HttpHandle;
pub use self::npm::NpmHandle;
use crate::bundle::{FileBundle, FileRole, PackageFile};
use crate::config::FetchConfig;
use crate::error::{Artifact, FetchError, FetchResult};
use crate::manifest::{DESCRIPTOR_FILE, DeclaredPaths};
use crate::npm::PackageName;

/// Where a package comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// A package on an npm registry.
    Npm {
        /// Registry root, ending in `/`.
        registry: Url,
        /// Package name.
        name: PackageName,
    },
    /// A directory served over HTTP(S).
    Http {
        /// Directory URL, ending in `/`.
        root: Url,
    },
    /// A directory served by a development server on this machine.
    Local {
        /// Directory URL on a loopback host, ending in `/`.
        root: Url,
    },
}

impl SourceLocation {
    /// Parse a location URI.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::UnsupportedProtocol`] for unknown schemes,
    /// [`FetchError::NonLoopbackHost`] for a `local:` URI on another host,
    /// [`FetchError::InvalidPackageName`] for bad npm names and
    /// [`FetchError::InvalidLocation`] for anything else malformed.
    pub fn parse(uri: &str, config: &FetchConfig) -> FetchResult<Self> {
        let uri = uri.trim();
        let invalid = |message: String| FetchError::InvalidLocation {
            uri: uri.to_string(),
            message,
        };

        let Some((scheme, rest)) = uri.split_once(':') else {
            return Err(invalid("missing scheme".to_string()));
        };

        match scheme.to_ascii_lowercase().as_str() {
            "npm" => Self::parse_npm(uri, rest, config),
            "http" | "https" => Ok(Self::Http {
                root: parse_root(uri)?,
            }),
            "local" => {
                let root = parse_root(rest)?;
                if !matches!(root.scheme(), "http" | "https") {
                    return Err(invalid(format!(
                        "local location must wrap an http URL, got '{}'",
                        root.scheme()
                    )));
                }
                let host = root.host_str().unwrap_or_default();
                if !is_loopback_host(host) {
                    return Err(FetchError::NonLoopbackHost {
                        host: host.to_string(),
                    });
                }
                Ok(Self::Local { root })
            },
            other => Err(FetchError::UnsupportedProtocol {
                scheme: other.to_string(),
                uri: uri.to_string(),
            }),
        }
    }

    fn parse_npm(uri: &str, rest: &str, config: &FetchConfig) -> FetchResult<Self> {
        let default_registry = config.registry_url().map_err(|e| FetchError::InvalidLocation {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;

        let Some(authority_and_path) = rest.strip_prefix("//") else {
            return Ok(Self::Npm {
                registry: default_registry,
                name: PackageName::parse(rest)?,
            });
        };

        let (authority, name) = authority_and_path
            .split_once('/')
            .ok_or_else(|| FetchError::InvalidLocation {
                uri: uri.to_string(),
                message: "expected npm://host/<package>".to_string(),
            })?;
        let registry = Url::parse(&format!("https://{authority}/")).map_err(|e| {
            FetchError::InvalidLocation {
                uri: uri.to_string(),
                message: format!("invalid registry host: {e}"),
            }
        })?;

        if registry != default_registry && !config.allow_custom_registries {
            return Err(FetchError::InvalidLocation {
                uri: uri.to_string(),
                message: format!(
                    "custom registry {registry} is not allowed (set allow_custom_registries)"
                ),
            });
        }

        Ok(Self::Npm {
            registry,
            name: PackageName::parse(name)?,
        })
    }

    /// Scheme name used in logs.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Npm { .. } => "npm",
            Self::Http { .. } => "http",
            Self::Local { .. } => "local",
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Npm { registry, name } => write!(f, "npm:{name} ({registry})"),
            Self::Http { root } => write!(f, "{root}"),
            Self::Local { root } => write!(f, "local:{root}"),
        }
    }
}

/// A resolved, fetchable package source.
#[derive(Debug)]
pub enum SourceHandle {
    /// Extracted npm tarball held in memory.
    Npm(NpmHandle),
    /// Remote HTTP directory.
    Http(HttpHandle),
    /// Loopback HTTP directory.
    Local(HttpHandle),
}

impl SourceHandle {
    /// Resolve a location into a handle.
    ///
    /// For npm this downloads and extracts the package for `range`; a failure
    /// at any step leaves no handle behind. HTTP handles are created without
    /// network access.
    ///
    /// # Errors
    ///
    /// Any error from metadata retrieval, version selection, download or
    /// extraction.
    pub async fn resolve(
        location: SourceLocation,
        range: &str,
        config: &FetchConfig,
    ) -> FetchResult<Self> {
        debug!(location = %location, scheme = location.scheme(), "resolving location");
        let handle = match location {
            SourceLocation::Npm { registry, name } => {
                Self::Npm(NpmHandle::resolve(registry, name, range, config).await?)
            },
            SourceLocation::Http { root } => Self::Http(HttpHandle::new(root, config)?),
            SourceLocation::Local { root } => Self::Local(HttpHandle::new(root, config)?),
        };
        info!(scheme = handle.scheme(), "location resolved");
        Ok(handle)
    }

    /// Scheme name used in logs.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Npm(_) => "npm",
            Self::Http(_) => "http",
            Self::Local(_) => "local",
        }
    }

    /// The package manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::MissingFile`] or a transport error.
    pub async fn manifest(&self) -> FetchResult<PackageFile> {
        match self {
            Self::Npm(handle) => handle.manifest(),
            Self::Http(handle) | Self::Local(handle) => handle.manifest().await,
        }
    }

    /// A file by package-relative path.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::MissingFile`] or a transport error.
    pub async fn fetch(&self, path: &str) -> FetchResult<PackageFile> {
        match self {
            Self::Npm(handle) => handle.fetch(path),
            Self::Http(handle) | Self::Local(handle) => handle.fetch(path).await,
        }
    }

    /// Assemble the files the verifier needs.
    ///
    /// npm handles hand back what extraction captured, leaving undeclared or
    /// absent files for the verifier to report. HTTP handles fetch the
    /// manifest, then the descriptor and the declared source bundle and icon.
    ///
    /// # Errors
    ///
    /// Transport errors, or a manifest that is not JSON.
    pub async fn bundle(&self) -> FetchResult<FileBundle> {
        if let Self::Npm(handle) = self {
            return Ok(handle.bundle().clone());
        }

        let manifest = self.manifest().await?;
        let declared = DeclaredPaths::from_manifest_value(&manifest.json::<Value>(Artifact::Manifest)?);

        let mut bundle = FileBundle::default();
        bundle.set(FileRole::Descriptor, self.fetch(DESCRIPTOR_FILE).await?);
        if let Some(source) = &declared.source {
            bundle.set(FileRole::SourceBundle, self.fetch(source).await?);
        }
        if let Some(icon) = &declared.icon {
            bundle.set(FileRole::Icon, self.fetch(icon).await?);
        }
        bundle.set(FileRole::Manifest, manifest);
        Ok(bundle)
    }
}

/// Parse a directory URL, forcing a trailing slash so relative joins stay
/// inside it.
fn parse_root(raw: &str) -> FetchResult<Url> {
    let mut url = Url::parse(raw).map_err(|e| FetchError::InvalidLocation {
        uri: raw.to_string(),
        message: e.to_string(),
    })?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(FetchError::InvalidLocation {
            uri: raw.to_string(),
            message: "location must be a hierarchical URL with a host".to_string(),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn is_loopback_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}
