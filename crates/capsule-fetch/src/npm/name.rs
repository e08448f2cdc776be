//! npm package name parsing and validation.
//!
//! Accepts `@scope/name` and `name`, checked against npm naming rules.

use std::fmt;

use crate::error::{FetchError, FetchResult};

/// Maximum npm package name length (scope + name combined).
const MAX_PACKAGE_NAME_LENGTH: usize = 214;

/// A validated npm package name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageName {
    /// Optional scope (without the `@` prefix).
    pub scope: Option<String>,
    /// Package name (without scope).
    pub name: String,
}

impl PackageName {
    /// Parse and validate a package name.
    ///
    /// Scope and name must each match `[a-z0-9][a-z0-9._-]*` and the full
    /// name must not exceed 214 characters.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidPackageName`] if the name is empty,
    /// malformed or fails validation.
    pub fn parse(raw: &str) -> FetchResult<Self> {
        let raw = raw.trim();
        let malformed = |reason: &str| FetchError::InvalidPackageName {
            name: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(malformed("package name cannot be empty"));
        }

        let parsed = if let Some(without_at) = raw.strip_prefix('@') {
            let (scope, name) = without_at
                .split_once('/')
                .ok_or_else(|| malformed("scoped name must have the form @scope/name"))?;
            if scope.is_empty() || scope.starts_with('@') || name.is_empty() {
                return Err(malformed("scoped name must have the form @scope/name"));
            }
            Self {
                scope: Some(scope.to_string()),
                name: name.to_string(),
            }
        } else {
            Self {
                scope: None,
                name: raw.to_string(),
            }
        };

        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> FetchResult<()> {
        let full_name = self.full_name();
        if full_name.len() > MAX_PACKAGE_NAME_LENGTH {
            return Err(FetchError::InvalidPackageName {
                name: full_name,
                reason: format!("exceeds maximum length of {MAX_PACKAGE_NAME_LENGTH} characters"),
            });
        }

        if let Some(scope) = &self.scope {
            validate_name_component(scope, "scope")?;
        }
        validate_name_component(&self.name, "name")
    }

    /// Full package name including scope (e.g. `@scope/name` or `name`).
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("@{scope}/{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Percent-encoded registry path for metadata requests.
    ///
    /// Scoped packages use `@scope%2Fname`, unscoped use `name`.
    #[must_use]
    pub fn registry_path(&self) -> String {
        match &self.scope {
            Some(scope) => format!(
                "@{}%2F{}",
                percent_encode(scope),
                percent_encode(&self.name)
            ),
            None => percent_encode(&self.name),
        }
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Validate a single name component against `[a-z0-9][a-z0-9._-]*`.
fn validate_name_component(component: &str, kind: &str) -> FetchResult<()> {
    let invalid = |reason: String| FetchError::InvalidPackageName {
        name: component.to_string(),
        reason,
    };

    let mut chars = component.chars();
    let Some(first) = chars.next() else {
        return Err(invalid(format!("{kind} cannot be empty")));
    };

    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(invalid(format!(
            "{kind} must start with a lowercase letter or digit"
        )));
    }

    if let Some(c) = chars.find(|c| {
        !c.is_ascii_lowercase() && !c.is_ascii_digit() && !matches!(c, '.' | '_' | '-')
    }) {
        return Err(invalid(format!(
            "{kind} contains invalid character '{c}' (allowed: a-z, 0-9, '.', '_', '-')"
        )));
    }

    Ok(())
}

/// Percent-encode a URL path component.
fn percent_encode(s: &str) -> String {
    use std::fmt::Write;

    let mut encoded = String::with_capacity(s.len());
    for byte in s.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}
