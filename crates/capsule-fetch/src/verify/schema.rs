//! Structural validation of manifest and descriptor JSON.
//!
//! [`SchemaValidator`] is the seam for plugging in a full JSON-Schema
//! engine. [`BuiltinSchema`] checks the fields the pipeline relies on.

use std::fmt;

use base64::Engine;
use serde_json::Value;

use crate::manifest::{MANIFEST_VERSION, SHASUM_ALGORITHM, SHASUM_HASH_LEN};
use crate::npm::PackageName;

/// Maximum manifest description length.
const MAX_DESCRIPTION_LENGTH: usize = 280;

/// Maximum proposed display name length.
const MAX_PROPOSED_NAME_LENGTH: usize = 214;

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    /// Dotted path to the offending field (empty for the document root).
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl SchemaIssue {
    /// Create an issue.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validates raw manifest and descriptor JSON.
///
/// An empty result means the document is valid.
pub trait SchemaValidator: fmt::Debug + Send + Sync {
    /// Check a parsed `snap.manifest.json`.
    fn validate_manifest(&self, manifest: &Value) -> Vec<SchemaIssue>;

    /// Check a parsed `package.json`.
    fn validate_descriptor(&self, descriptor: &Value) -> Vec<SchemaIssue>;
}

/// Built-in structural rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinSchema;

impl SchemaValidator for BuiltinSchema {
    fn validate_manifest(&self, manifest: &Value) -> Vec<SchemaIssue> {
        let mut c = Checker::new(manifest);
        if !c.root_is_object() {
            return c.issues;
        }

        c.semver("version");
        if let Some(description) = c.optional_string("description")
            && description.chars().count() > MAX_DESCRIPTION_LENGTH
        {
            c.push(
                "description",
                format!("must be at most {MAX_DESCRIPTION_LENGTH} characters"),
            );
        }
        if let Some(name) = c.optional_string("proposedName") {
            let len = name.chars().count();
            if len == 0 || len > MAX_PROPOSED_NAME_LENGTH {
                c.push(
                    "proposedName",
                    format!("must be 1 to {MAX_PROPOSED_NAME_LENGTH} characters"),
                );
            }
        }
        c.repository();

        if let Some(algorithm) = c.required_string("source.shasum.algorithm")
            && algorithm != SHASUM_ALGORITHM
        {
            c.push(
                "source.shasum.algorithm",
                format!("must be \"{SHASUM_ALGORITHM}\""),
            );
        }
        if let Some(hash) = c.required_string("source.shasum.hash") {
            let decoded = base64::engine::general_purpose::STANDARD.decode(hash);
            if hash.len() != SHASUM_HASH_LEN || !decoded.is_ok_and(|bytes| bytes.len() == 32) {
                c.push(
                    "source.shasum.hash",
                    format!("must be a {SHASUM_HASH_LEN}-character base64 SHA-256 digest"),
                );
            }
        }

        if let Some(path) = c.required_string("source.location.npm.filePath")
            && path.trim().is_empty()
        {
            c.push("source.location.npm.filePath", "cannot be empty");
        }
        if let Some(icon) = c.optional_string("source.location.npm.iconPath")
            && !icon.to_ascii_lowercase().ends_with(".svg")
        {
            c.push("source.location.npm.iconPath", "must point at an .svg file");
        }
        c.package_name("source.location.npm.packageName");
        if let Some(registry) = c.required_string("source.location.npm.registry")
            && url::Url::parse(registry).is_err()
        {
            c.push("source.location.npm.registry", "must be a URL");
        }

        if c.optional("initialPermissions").is_some_and(|v| !v.is_object()) {
            c.push("initialPermissions", "must be an object");
        }
        if let Some(version) = c.required_string("manifestVersion")
            && version != MANIFEST_VERSION
        {
            c.push("manifestVersion", format!("must be \"{MANIFEST_VERSION}\""));
        }

        c.issues
    }

    fn validate_descriptor(&self, descriptor: &Value) -> Vec<SchemaIssue> {
        let mut c = Checker::new(descriptor);
        if !c.root_is_object() {
            return c.issues;
        }
        c.package_name("name");
        c.semver("version");
        c.repository();
        c.issues
    }
}

/// Field lookups that record an issue on the way.
struct Checker<'a> {
    root: &'a Value,
    issues: Vec<SchemaIssue>,
}

impl<'a> Checker<'a> {
    fn new(root: &'a Value) -> Self {
        Self {
            root,
            issues: Vec::new(),
        }
    }

    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.issues.push(SchemaIssue::new(field, message));
    }

    fn root_is_object(&mut self) -> bool {
        if self.root.is_object() {
            return true;
        }
        self.push("", "document must be a JSON object");
        false
    }

    /// Value at a dotted path; `null` counts as absent.
    fn optional(&self, field: &str) -> Option<&'a Value> {
        field
            .split('.')
            .try_fold(self.root, |value, key| value.get(key))
            .filter(|value| !value.is_null())
    }

    fn required_string(&mut self, field: &str) -> Option<&'a str> {
        match self.optional(field) {
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                self.push(field, "must be a string");
                None
            },
            None => {
                self.push(field, "is required");
                None
            },
        }
    }

    fn optional_string(&mut self, field: &str) -> Option<&'a str> {
        match self.optional(field) {
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                self.push(field, "must be a string");
                None
            },
            None => None,
        }
    }

    fn semver(&mut self, field: &str) {
        if let Some(version) = self.required_string(field)
            && semver::Version::parse(version).is_err()
        {
            self.push(field, format!("'{version}' is not a valid semantic version"));
        }
    }

    fn package_name(&mut self, field: &str) {
        if let Some(name) = self.required_string(field)
            && let Err(e) = PackageName::parse(name)
        {
            self.push(field, e.to_string());
        }
    }

    fn repository(&mut self) {
        match self.optional("repository") {
            None => {},
            Some(Value::Object(_)) => {
                self.required_string("repository.type");
                self.required_string("repository.url");
            },
            Some(_) => self.push("repository", "must be an object with type and url"),
        }
    }
}
