//! Acquisition error types.

use std::fmt;

use crate::verify::{SchemaIssue, ValidationFailure, ValidationFailureReason};

/// The artifact an error is about.
///
/// Every artifact-scoped error renders with this name first, so a caller can
/// tell the user which file to fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// The package's own `package.json`.
    Descriptor,
    /// The externally imposed `snap.manifest.json`.
    Manifest,
    /// The gzip-compressed tarball.
    Tarball,
    /// Package metadata served by the registry.
    RegistryMetadata,
    /// The executable source bundle.
    SourceBundle,
    /// The optional SVG icon.
    Icon,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Descriptor => "descriptor",
            Self::Manifest => "manifest",
            Self::Tarball => "tarball",
            Self::RegistryMetadata => "registry metadata",
            Self::SourceBundle => "source bundle",
            Self::Icon => "icon",
        };
        f.write_str(name)
    }
}

/// Errors from acquisition and verification.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The location URI uses a scheme no resolver handles.
    #[error("unsupported protocol '{scheme}' in location {uri}")]
    UnsupportedProtocol {
        /// The unrecognised scheme.
        scheme: String,
        /// The full location string.
        uri: String,
    },

    /// The location URI is malformed for its scheme.
    #[error("invalid location {uri}: {message}")]
    InvalidLocation {
        /// The offending location string.
        uri: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `local:` location names a host that is not loopback.
    #[error("local location must point at a loopback host, got '{host}'")]
    NonLoopbackHost {
        /// The rejected host.
        host: String,
    },

    /// Invalid npm package name.
    #[error("invalid package name '{name}': {reason}")]
    InvalidPackageName {
        /// The invalid name.
        name: String,
        /// Why the name is invalid.
        reason: String,
    },

    /// A version string is not valid semver.
    #[error("invalid version '{version}': {message}")]
    InvalidVersion {
        /// The rejected version string.
        version: String,
        /// Parser message.
        message: String,
    },

    /// A version range cannot be parsed.
    #[error("invalid version range '{range}': {message}")]
    InvalidRange {
        /// The rejected range string.
        range: String,
        /// Parser message.
        message: String,
    },

    /// No published version satisfies the requested range.
    #[error("no version of {package} satisfies range '{range}'")]
    VersionNotFound {
        /// Package being resolved.
        package: String,
        /// The requested range.
        range: String,
    },

    /// Network failure, non-2xx status or undecodable body.
    #[error("{artifact}: transport error: {message}")]
    Transport {
        /// What was being fetched.
        artifact: Artifact,
        /// Description of the failure.
        message: String,
    },

    /// The tarball URL in registry metadata is unusable.
    #[error("tarball: invalid tarball URL for {package}: {url}")]
    InvalidTarballUrl {
        /// Package whose metadata was inspected.
        package: String,
        /// The URL as found (or a placeholder when absent).
        url: String,
    },

    /// A redirect left the registry origin.
    #[error("{artifact}: redirect to {url} leaves the registry origin")]
    RedirectBlocked {
        /// What was being fetched.
        artifact: Artifact,
        /// The blocked URL.
        url: String,
    },

    /// Tarball exceeds maximum allowed size.
    #[error("tarball: package too large: {size} bytes (limit: {limit} bytes)")]
    PackageTooLarge {
        /// Bytes seen so far (or advertised).
        size: u64,
        /// Configured maximum.
        limit: u64,
    },

    /// SRI integrity verification of the tarball failed.
    #[error("tarball: integrity mismatch for {package}: expected {expected}")]
    IntegrityMismatch {
        /// Package that failed verification.
        package: String,
        /// Expected SRI string.
        expected: String,
    },

    /// Decompression or archive failure, or malformed JSON in a captured file.
    #[error("{artifact}: extraction error: {message}")]
    Extraction {
        /// Artifact implicated.
        artifact: Artifact,
        /// Description of the failure.
        message: String,
    },

    /// A required file is absent.
    #[error("{artifact}: missing file {path}")]
    MissingFile {
        /// Role of the missing file.
        artifact: Artifact,
        /// Path where it was expected.
        path: String,
    },

    /// A file does not satisfy its schema.
    #[error("{artifact}: schema validation failed: {}", join_issues(.issues))]
    SchemaInvalid {
        /// Which file failed.
        artifact: Artifact,
        /// Every violation, each with its field path.
        issues: Vec<SchemaIssue>,
    },

    /// The icon exceeds the size ceiling.
    #[error("icon: {size} bytes exceeds the {limit} byte limit")]
    IconTooLarge {
        /// Icon size in bytes.
        size: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// Manifest and descriptor disagree and were not repaired.
    #[error("manifest: validation failed: {}", join_failures(.failures))]
    ValidationFailed {
        /// Every mismatch found.
        failures: Vec<ValidationFailure>,
    },

    /// The repair loop saw a reason it had already fixed.
    #[error(
        "internal error: manifest repair did not converge after {attempts} fixes \
         (reason {reason} recurred); this is a bug, please report it"
    )]
    InternalRepairLoopExceeded {
        /// The recurring reason.
        reason: ValidationFailureReason,
        /// Fixes applied before giving up.
        attempts: usize,
    },

    /// Manifest could not be serialized for write-back.
    #[error("manifest: serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Reasons carried by a [`FetchError::ValidationFailed`], empty otherwise.
    #[must_use]
    pub fn failure_reasons(&self) -> Vec<ValidationFailureReason> {
        match self {
            Self::ValidationFailed { failures } => failures.iter().map(|f| f.reason).collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn transport(artifact: Artifact, message: impl Into<String>) -> Self {
        Self::Transport {
            artifact,
            message: message.into(),
        }
    }

    pub(crate) fn extraction(artifact: Artifact, message: impl Into<String>) -> Self {
        Self::Extraction {
            artifact,
            message: message.into(),
        }
    }
}

fn join_issues(issues: &[SchemaIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_failures(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(|f| f.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for acquisition operations.
pub type FetchResult<T> = Result<T, FetchError>;
