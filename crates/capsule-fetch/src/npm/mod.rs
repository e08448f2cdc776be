//! npm registry support.
//!
//! Packages are fetched straight from the registry over HTTP:
//! metadata → version selection → tarball download → SRI check. Extraction
//! happens in [`crate::extract`].

pub mod integrity;
pub mod name;
pub mod registry;
pub mod types;

pub use integrity::verify_sri_integrity;
pub use name::PackageName;
pub use registry::{RegistryClient, ResolvedPackage};
pub use types::{DistInfo, PackageMetadata, VersionMetadata};
