//! Manifest integrity verification.
//!
//! A [`FileBundle`] is checked in a fixed order:
//!
//! 1. manifest and descriptor are present;
//! 2. both satisfy their schema (fatal, never repaired);
//! 3. the declared source bundle and icon are present, and the icon is
//!    within the size limit;
//! 4. cross-checks, in order: package name, version, repository, shasum.
//!
//! [`ManifestVerifier::validate`] reports every cross-check failure at once.
//! [`ManifestVerifier::check_and_repair`] fixes them one at a time through
//! [`repair::repair_loop`] and can write the repaired manifest back.

pub mod repair;
pub mod schema;
pub mod writer;

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

pub use self::repair::{FixContext, MAX_REPAIR_ATTEMPTS, apply_fix, repair_loop};
pub use self::schema::{BuiltinSchema, SchemaIssue, SchemaValidator};
pub use self::writer::{FsManifestWriter, ManifestWriter};
use crate::bundle::{FileBundle, FileRole, PackageFile};
use crate::config::{DEFAULT_MAX_ICON_SIZE, FetchConfig};
use crate::error::{Artifact, FetchError, FetchResult};
use crate::manifest::{PackageDescriptor, PackageManifest, Shasum};

/// A programmatically fixable disagreement between manifest and descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationFailureReason {
    /// Manifest package name differs from the descriptor's `name`.
    NameMismatch,
    /// Manifest version differs from the descriptor's `version`.
    VersionMismatch,
    /// Manifest repository differs from the descriptor's `repository`.
    RepositoryMismatch,
    /// Manifest shasum does not match the source bundle.
    ShasumMismatch,
}

impl ValidationFailureReason {
    /// Every reason, in check order.
    pub const ALL: [Self; 4] = [
        Self::NameMismatch,
        Self::VersionMismatch,
        Self::RepositoryMismatch,
        Self::ShasumMismatch,
    ];
}

impl fmt::Display for ValidationFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NameMismatch => "name mismatch",
            Self::VersionMismatch => "version mismatch",
            Self::RepositoryMismatch => "repository mismatch",
            Self::ShasumMismatch => "shasum mismatch",
        };
        f.write_str(name)
    }
}

/// One cross-check failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Which check failed.
    pub reason: ValidationFailureReason,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A bundle that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedBundle {
    /// The files, including any repaired manifest.
    pub bundle: FileBundle,
    /// Parsed manifest.
    pub manifest: PackageManifest,
    /// Parsed descriptor.
    pub descriptor: PackageDescriptor,
}

/// Result of [`ManifestVerifier::check_and_repair`].
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    /// The verified (possibly repaired) bundle.
    pub verified: VerifiedBundle,
    /// Whether any fix was applied.
    pub fixed: bool,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
    /// Every failure that was found and fixed, in order.
    pub errors: Vec<String>,
}

/// Typed view of a bundle that passed steps 1 to 3.
struct Checked {
    manifest: PackageManifest,
    descriptor: PackageDescriptor,
    failures: Vec<ValidationFailure>,
}

/// Validates bundles and repairs their manifests.
#[derive(Debug, Clone)]
pub struct ManifestVerifier {
    schema: Arc<dyn SchemaValidator>,
    writer: Option<Arc<dyn ManifestWriter>>,
    max_icon_size: usize,
}

impl Default for ManifestVerifier {
    fn default() -> Self {
        Self {
            schema: Arc::new(BuiltinSchema),
            writer: None,
            max_icon_size: DEFAULT_MAX_ICON_SIZE,
        }
    }
}

impl ManifestVerifier {
    /// Verifier with the built-in schema and limits from `config`.
    #[must_use]
    pub fn from_config(config: &FetchConfig) -> Self {
        Self::default().with_max_icon_size(config.max_icon_size)
    }

    /// Use another schema validator.
    #[must_use]
    pub fn with_schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.schema = schema;
        self
    }

    /// Persist repaired manifests through `writer`.
    #[must_use]
    pub fn with_writer(mut self, writer: Arc<dyn ManifestWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Override the icon size ceiling.
    #[must_use]
    pub fn with_max_icon_size(mut self, bytes: usize) -> Self {
        self.max_icon_size = bytes;
        self
    }

    /// Check a bundle without modifying it.
    ///
    /// # Errors
    ///
    /// [`FetchError::MissingFile`], [`FetchError::Extraction`] (invalid
    /// JSON), [`FetchError::SchemaInvalid`], [`FetchError::IconTooLarge`],
    /// or [`FetchError::ValidationFailed`] listing every cross-check failure.
    pub fn validate(&self, bundle: FileBundle) -> FetchResult<VerifiedBundle> {
        let checked = self.check(&bundle)?;
        if !checked.failures.is_empty() {
            return Err(FetchError::ValidationFailed {
                failures: checked.failures,
            });
        }
        Ok(VerifiedBundle {
            bundle,
            manifest: checked.manifest,
            descriptor: checked.descriptor,
        })
    }

    /// Check a bundle, repairing cross-check failures in its manifest.
    ///
    /// With `allow_write`, a repaired manifest is handed to the configured
    /// writer in canonical form.
    ///
    /// # Errors
    ///
    /// Everything [`ManifestVerifier::validate`] reports except
    /// `ValidationFailed`, plus [`FetchError::InternalRepairLoopExceeded`]
    /// and writer errors.
    pub fn check_and_repair(&self, bundle: FileBundle, allow_write: bool) -> FetchResult<CheckOutcome> {
        let repaired = repair_loop(
            bundle,
            |bundle| self.check(bundle).map(|checked| checked.failures),
            |bundle, reason| self.fix(bundle, reason),
        )?;

        let bundle = repaired.state;
        let checked = self.check(&bundle)?;
        let fixed = !repaired.applied.is_empty();
        let mut warnings = Vec::new();

        if checked.manifest.icon_path().is_none() {
            warnings.push(
                "no icon declared; set source.location.npm.iconPath to an .svg file".to_string(),
            );
        }

        if fixed && allow_write {
            match (&self.writer, &bundle.manifest) {
                (Some(writer), Some(manifest)) => writer.write_manifest(&manifest.data)?,
                _ => warnings.push(
                    "manifest was repaired but no writer is configured; changes were not saved"
                        .to_string(),
                ),
            }
        }

        for warning in &warnings {
            warn!(package = checked.manifest.package_name(), "{warning}");
        }
        info!(
            package = checked.manifest.package_name(),
            fixed,
            fixes = repaired.applied.len(),
            "manifest verified"
        );

        Ok(CheckOutcome {
            verified: VerifiedBundle {
                bundle,
                manifest: checked.manifest,
                descriptor: checked.descriptor,
            },
            fixed,
            warnings,
            errors: repaired.errors,
        })
    }

    fn check(&self, bundle: &FileBundle) -> FetchResult<Checked> {
        let manifest_file = bundle.require(FileRole::Manifest)?;
        let descriptor_file = bundle.require(FileRole::Descriptor)?;
        let manifest_value: Value = manifest_file.json(Artifact::Manifest)?;
        let descriptor_value: Value = descriptor_file.json(Artifact::Descriptor)?;

        schema_result(Artifact::Manifest, self.schema.validate_manifest(&manifest_value))?;
        schema_result(
            Artifact::Descriptor,
            self.schema.validate_descriptor(&descriptor_value),
        )?;
        let manifest: PackageManifest = typed(manifest_value, Artifact::Manifest)?;
        let descriptor: PackageDescriptor = typed(descriptor_value, Artifact::Descriptor)?;

        let source = declared_file(bundle, FileRole::SourceBundle, manifest.source_path())?;
        if let Some(icon_path) = manifest.icon_path() {
            let icon = declared_file(bundle, FileRole::Icon, icon_path)?;
            if icon.data.len() > self.max_icon_size {
                return Err(FetchError::IconTooLarge {
                    size: icon.data.len(),
                    limit: self.max_icon_size,
                });
            }
        }

        let failures = cross_check(&manifest, &descriptor, &source.data);
        debug!(failures = failures.len(), "cross-checked manifest");
        Ok(Checked {
            manifest,
            descriptor,
            failures,
        })
    }

    fn fix(&self, bundle: &mut FileBundle, reason: ValidationFailureReason) -> FetchResult<()> {
        let checked = self.check(bundle)?;
        let source = bundle.require(FileRole::SourceBundle)?;
        let fixed = apply_fix(
            reason,
            &checked.manifest,
            FixContext {
                descriptor: &checked.descriptor,
                source_bundle: &source.data,
            },
        );

        let path = bundle.require(FileRole::Manifest)?.path.clone();
        bundle.set(
            FileRole::Manifest,
            PackageFile::new(&path, fixed.to_canonical_json()?),
        );
        Ok(())
    }
}

/// Validate with the default verifier.
///
/// # Errors
///
/// See [`ManifestVerifier::validate`].
pub fn validate(bundle: FileBundle) -> FetchResult<VerifiedBundle> {
    ManifestVerifier::default().validate(bundle)
}

/// Check and repair with the default verifier.
///
/// # Errors
///
/// See [`ManifestVerifier::check_and_repair`].
pub fn check_and_repair(bundle: FileBundle, allow_write: bool) -> FetchResult<CheckOutcome> {
    ManifestVerifier::default().check_and_repair(bundle, allow_write)
}

fn schema_result(artifact: Artifact, issues: Vec<SchemaIssue>) -> FetchResult<()> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(FetchError::SchemaInvalid { artifact, issues })
    }
}

fn typed<T: DeserializeOwned>(value: Value, artifact: Artifact) -> FetchResult<T> {
    serde_json::from_value(value).map_err(|e| FetchError::SchemaInvalid {
        artifact,
        issues: vec![SchemaIssue::new("", e.to_string())],
    })
}

fn declared_file(bundle: &FileBundle, role: FileRole, path: String) -> FetchResult<&PackageFile> {
    bundle
        .get(role)
        .filter(|file| file.path == path)
        .ok_or(FetchError::MissingFile {
            artifact: role.artifact(),
            path,
        })
}

fn cross_check(
    manifest: &PackageManifest,
    descriptor: &PackageDescriptor,
    source_bundle: &[u8],
) -> Vec<ValidationFailure> {
    let mut failures = Vec::new();
    let mut fail = |reason, message: String| failures.push(ValidationFailure { reason, message });

    if manifest.package_name() != descriptor.name {
        fail(
            ValidationFailureReason::NameMismatch,
            format!(
                "package name \"{}\" does not match package.json name \"{}\"",
                manifest.package_name(),
                descriptor.name
            ),
        );
    }
    if manifest.version != descriptor.version {
        fail(
            ValidationFailureReason::VersionMismatch,
            format!(
                "version \"{}\" does not match package.json version \"{}\"",
                manifest.version, descriptor.version
            ),
        );
    }
    if manifest.repository != descriptor.repository {
        fail(
            ValidationFailureReason::RepositoryMismatch,
            "repository does not match package.json repository".to_string(),
        );
    }
    let actual = Shasum::of(source_bundle);
    if manifest.source.shasum.hash != actual.hash {
        fail(
            ValidationFailureReason::ShasumMismatch,
            format!(
                "shasum \"{}\" does not match computed shasum \"{}\"",
                manifest.source.shasum.hash, actual.hash
            ),
        );
    }
    failures
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;

    pub(crate) const SOURCE: &[u8] = b"module.exports.onRpcRequest = () => 42;\n";
    pub(crate) const ICON: &[u8] = b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>";

    pub(crate) fn descriptor_json() -> Value {
        json!({
            "name": "@example/snap",
            "version": "1.2.0",
            "repository": { "type": "git", "url": "https://github.com/example/snap.git" },
            "main": "dist/bundle.js"
        })
    }

    pub(crate) fn manifest_json() -> Value {
        json!({
            "version": "1.2.0",
            "description": "An example package",
            "proposedName": "Example",
            "repository": { "type": "git", "url": "https://github.com/example/snap.git" },
            "source": {
                "shasum": { "algorithm": "sha256", "hash": Shasum::of(SOURCE).hash },
                "location": { "npm": {
                    "filePath": "dist/bundle.js",
                    "iconPath": "images/icon.svg",
                    "packageName": "@example/snap",
                    "registry": "https://registry.npmjs.org"
                } }
            },
            "initialPermissions": { "endowment:rpc": { "dapps": true } },
            "manifestVersion": "0.1"
        })
    }

    pub(crate) fn bundle_with(manifest: &Value, descriptor: &Value) -> FileBundle {
        FileBundle {
            manifest: Some(PackageFile::new(
                "snap.manifest.json",
                serde_json::to_vec(manifest).unwrap(),
            )),
            descriptor: Some(PackageFile::new(
                "package.json",
                serde_json::to_vec(descriptor).unwrap(),
            )),
            source_bundle: Some(PackageFile::new("dist/bundle.js", SOURCE.to_vec())),
            icon: Some(PackageFile::new("images/icon.svg", ICON.to_vec())),
        }
    }

    fn valid_bundle() -> FileBundle {
        bundle_with(&manifest_json(), &descriptor_json())
    }

    #[test]
    fn valid_bundle_verifies_cleanly() {
        let verified = validate(valid_bundle()).unwrap();
        assert_eq!(verified.manifest.package_name(), "@example/snap");
        assert_eq!(verified.descriptor.version, "1.2.0");

        let outcome = check_and_repair(valid_bundle(), false).unwrap();
        assert!(!outcome.fixed);
        assert!(outcome.warnings.is_empty());
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.verified.bundle, valid_bundle());
    }

    #[test]
    fn single_byte_change_is_only_a_shasum_mismatch() {
        let mut bundle = valid_bundle();
        let source = bundle.source_bundle.as_mut().unwrap();
        source.data[0] ^= 0x01;

        let err = validate(bundle).unwrap_err();
        assert_eq!(
            err.failure_reasons(),
            [ValidationFailureReason::ShasumMismatch]
        );
        assert!(err.to_string().starts_with("manifest: validation failed: shasum"));
    }

    #[test]
    fn validate_lists_every_mismatch_in_order() {
        let mut manifest = manifest_json();
        manifest["source"]["location"]["npm"]["packageName"] = json!("other-snap");
        manifest["version"] = json!("0.1.0");
        manifest["repository"] = Value::Null;

        let err = validate(bundle_with(&manifest, &descriptor_json())).unwrap_err();
        assert_eq!(
            err.failure_reasons(),
            [
                ValidationFailureReason::NameMismatch,
                ValidationFailureReason::VersionMismatch,
                ValidationFailureReason::RepositoryMismatch,
            ]
        );
    }

    #[test]
    fn repository_absent_on_both_sides_is_equal() {
        let mut manifest = manifest_json();
        manifest.as_object_mut().unwrap().remove("repository");
        let mut descriptor = descriptor_json();
        descriptor.as_object_mut().unwrap().remove("repository");

        validate(bundle_with(&manifest, &descriptor)).unwrap();
    }

    #[test]
    fn repository_present_on_one_side_is_a_mismatch() {
        let mut descriptor = descriptor_json();
        descriptor.as_object_mut().unwrap().remove("repository");

        let err = validate(bundle_with(&manifest_json(), &descriptor)).unwrap_err();
        assert_eq!(
            err.failure_reasons(),
            [ValidationFailureReason::RepositoryMismatch]
        );
    }

    #[test]
    fn repository_extra_key_on_one_side_is_a_mismatch() {
        let mut descriptor = descriptor_json();
        descriptor["repository"]["directory"] = json!("packages/snap");

        let err = validate(bundle_with(&manifest_json(), &descriptor)).unwrap_err();
        assert_eq!(
            err.failure_reasons(),
            [ValidationFailureReason::RepositoryMismatch]
        );

        let outcome = check_and_repair(bundle_with(&manifest_json(), &descriptor), false).unwrap();
        assert_eq!(outcome.verified.manifest.repository, outcome.verified.descriptor.repository);
        let written: Value =
            serde_json::from_slice(&outcome.verified.bundle.manifest.as_ref().unwrap().data).unwrap();
        assert_eq!(written["repository"]["directory"], "packages/snap");
    }

    #[test]
    fn version_repair_keeps_nested_unknown_fields() {
        let mut manifest = manifest_json();
        manifest["version"] = json!("0.1.0");
        manifest["source"]["files"] = json!(["./data/extra.json"]);
        manifest["source"]["locales"] = json!(["locales/en.json"]);

        let outcome = check_and_repair(bundle_with(&manifest, &descriptor_json()), false).unwrap();
        assert!(outcome.fixed);

        let written: Value =
            serde_json::from_slice(&outcome.verified.bundle.manifest.as_ref().unwrap().data).unwrap();
        manifest["version"] = json!("1.2.0");
        assert_eq!(written, manifest);
    }

    #[test]
    fn all_mismatches_repair_within_bound() {
        let mut manifest = manifest_json();
        manifest["source"]["location"]["npm"]["packageName"] = json!("other-snap");
        manifest["version"] = json!("0.1.0");
        manifest["repository"] = Value::Null;
        manifest["source"]["shasum"]["hash"] = json!(Shasum::of(b"stale").hash);

        let outcome = check_and_repair(bundle_with(&manifest, &descriptor_json()), false).unwrap();
        assert!(outcome.fixed);
        assert_eq!(outcome.errors.len(), MAX_REPAIR_ATTEMPTS);
        assert!(outcome.errors[0].starts_with("package name"));
        assert!(outcome.errors[3].starts_with("shasum"));

        let repaired = &outcome.verified.manifest;
        assert_eq!(repaired.package_name(), "@example/snap");
        assert_eq!(repaired.version, "1.2.0");
        assert_eq!(repaired.source.shasum, Shasum::of(SOURCE));
        assert!(
            repaired
                .initial_permissions
                .as_ref()
                .is_some_and(|p| p.contains_key("endowment:rpc"))
        );

        // The repaired bundle passes strict validation on its own.
        validate(outcome.verified.bundle.clone()).unwrap();
    }

    #[test]
    fn repair_is_idempotent() {
        let mut manifest = manifest_json();
        manifest["version"] = json!("0.1.0");

        let first = check_and_repair(bundle_with(&manifest, &descriptor_json()), false).unwrap();
        assert!(first.fixed);
        assert_eq!(first.errors.len(), 1);

        let second = check_and_repair(first.verified.bundle.clone(), false).unwrap();
        assert!(!second.fixed);
        assert!(second.errors.is_empty());
        assert_eq!(second.verified, first.verified);
    }

    #[test]
    fn repaired_manifest_is_canonical() {
        let mut manifest = manifest_json();
        manifest["version"] = json!("0.1.0");

        let outcome = check_and_repair(bundle_with(&manifest, &descriptor_json()), false).unwrap();
        let written = &outcome.verified.bundle.manifest.as_ref().unwrap().data;
        assert_eq!(*written, outcome.verified.manifest.to_canonical_json().unwrap());
    }

    #[test]
    fn schema_errors_are_fatal_even_when_repairing() {
        let mut manifest = manifest_json();
        manifest["manifestVersion"] = json!("9.9");
        manifest["version"] = json!("0.1.0");

        let err = check_and_repair(bundle_with(&manifest, &descriptor_json()), true).unwrap_err();
        assert!(
            matches!(err, FetchError::SchemaInvalid { artifact: Artifact::Manifest, ref issues } if issues[0].field == "manifestVersion"),
            "got: {err}"
        );
    }

    #[test]
    fn descriptor_schema_errors_name_the_descriptor() {
        let mut descriptor = descriptor_json();
        descriptor["version"] = json!(12);

        let err = validate(bundle_with(&manifest_json(), &descriptor)).unwrap_err();
        assert!(err.to_string().starts_with("descriptor: schema validation failed: version"));
    }

    #[test]
    fn missing_files_are_reported() {
        let mut bundle = valid_bundle();
        bundle.descriptor = None;
        let err = validate(bundle).unwrap_err();
        assert!(matches!(err, FetchError::MissingFile { artifact: Artifact::Descriptor, .. }));

        let mut bundle = valid_bundle();
        bundle.source_bundle = None;
        let err = validate(bundle).unwrap_err();
        assert_eq!(err.to_string(), "source bundle: missing file dist/bundle.js");

        let mut bundle = valid_bundle();
        bundle.icon = Some(PackageFile::new("other.svg", ICON.to_vec()));
        let err = validate(bundle).unwrap_err();
        assert_eq!(err.to_string(), "icon: missing file images/icon.svg");
    }

    #[test]
    fn oversized_icon_is_rejected() {
        let verifier = ManifestVerifier::default().with_max_icon_size(8);
        let err = verifier.validate(valid_bundle()).unwrap_err();
        assert!(matches!(err, FetchError::IconTooLarge { limit: 8, .. }));
    }

    #[test]
    fn missing_icon_declaration_warns() {
        let mut manifest = manifest_json();
        manifest["source"]["location"]["npm"]
            .as_object_mut()
            .unwrap()
            .remove("iconPath");
        let mut bundle = bundle_with(&manifest, &descriptor_json());
        bundle.icon = None;

        let outcome = check_and_repair(bundle, false).unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("no icon"));
    }

    #[test]
    fn write_back_uses_writer() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(FsManifestWriter::new(dir.path()));
        let verifier = ManifestVerifier::default().with_writer(writer.clone());

        let mut manifest = manifest_json();
        manifest["source"]["shasum"]["hash"] = json!(Shasum::of(b"stale").hash);
        let outcome = verifier
            .check_and_repair(bundle_with(&manifest, &descriptor_json()), true)
            .unwrap();

        let on_disk = std::fs::read(writer.path()).unwrap();
        assert_eq!(on_disk, outcome.verified.bundle.manifest.unwrap().data);
        assert!(String::from_utf8(on_disk).unwrap().ends_with("}\n"));
    }

    #[test]
    fn write_back_skipped_without_fixes_or_permission() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(FsManifestWriter::new(dir.path()));
        let verifier = ManifestVerifier::default().with_writer(writer.clone());

        verifier.check_and_repair(valid_bundle(), true).unwrap();
        assert!(!writer.path().exists());

        let mut manifest = manifest_json();
        manifest["version"] = json!("0.1.0");
        let outcome = verifier
            .check_and_repair(bundle_with(&manifest, &descriptor_json()), false)
            .unwrap();
        assert!(outcome.fixed);
        assert!(!writer.path().exists());
    }

    #[test]
    fn write_requested_without_writer_warns() {
        let mut manifest = manifest_json();
        manifest["version"] = json!("0.1.0");

        let outcome = check_and_repair(bundle_with(&manifest, &descriptor_json()), true).unwrap();
        assert!(outcome.fixed);
        assert!(outcome.warnings.iter().any(|w| w.contains("no writer")));
    }

    #[test]
    fn custom_schema_validator_is_consulted() {
        #[derive(Debug)]
        struct RejectAll;
        impl SchemaValidator for RejectAll {
            fn validate_manifest(&self, _: &Value) -> Vec<SchemaIssue> {
                vec![SchemaIssue::new("$schema", "unknown schema")]
            }
            fn validate_descriptor(&self, _: &Value) -> Vec<SchemaIssue> {
                Vec::new()
            }
        }

        let verifier = ManifestVerifier::default().with_schema(Arc::new(RejectAll));
        let err = verifier.validate(valid_bundle()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "manifest: schema validation failed: $schema: unknown schema"
        );
    }
}
