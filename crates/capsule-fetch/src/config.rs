//! Acquisition configuration.
//!
//! Every field has a production default, so an empty TOML document yields a
//! working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default npm registry root.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// Default maximum tarball size (50 MB).
pub const DEFAULT_MAX_TARBALL_SIZE: u64 = 50 * 1024 * 1024;

/// Default icon ceiling in bytes.
pub const DEFAULT_MAX_ICON_SIZE: usize = 100_000;

/// Errors from loading or validating a [`FetchConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("failed to parse fetch config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds an unacceptable value.
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// Field that failed validation.
        field: String,
        /// Validation failure description.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings shared by every acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Registry used for `npm:<name>` locations.
    pub registry: String,
    /// Allow `npm://host/<name>` locations naming another registry.
    pub allow_custom_registries: bool,
    /// Tarball size ceiling in bytes.
    pub max_tarball_size: u64,
    /// Icon size ceiling in bytes.
    pub max_icon_size: usize,
    /// Whole-request timeout for HTTP calls.
    pub request_timeout_secs: u64,
    /// Connection timeout for HTTP calls.
    pub connect_timeout_secs: u64,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            allow_custom_registries: false,
            max_tarball_size: DEFAULT_MAX_TARBALL_SIZE,
            max_icon_size: DEFAULT_MAX_ICON_SIZE,
            request_timeout_secs: 120,
            connect_timeout_secs: 30,
            user_agent: concat!("capsule-fetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::ValidationError`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Override the registry root.
    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Override the tarball size ceiling.
    #[must_use]
    pub fn with_max_tarball_size(mut self, bytes: u64) -> Self {
        self.max_tarball_size = bytes;
        self
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Registry root as a URL with a trailing slash, ready for joining.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if `registry` is not an
    /// http(s) URL.
    pub fn registry_url(&self) -> ConfigResult<url::Url> {
        let invalid = |message: String| ConfigError::ValidationError {
            field: "registry".to_owned(),
            message,
        };

        let mut url = url::Url::parse(&self.registry)
            .map_err(|e| invalid(format!("'{}' is not a valid URL: {e}", self.registry)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "unsupported scheme '{}'; expected http or https",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(invalid("registry URL has no host".to_owned()));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::ValidationError`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        self.registry_url()?;

        if self.max_tarball_size == 0 {
            return Err(ConfigError::ValidationError {
                field: "max_tarball_size".to_owned(),
                message: "max_tarball_size must be greater than 0".to_owned(),
            });
        }
        if self.max_icon_size == 0 {
            return Err(ConfigError::ValidationError {
                field: "max_icon_size".to_owned(),
                message: "max_icon_size must be greater than 0".to_owned(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                field: "request_timeout_secs".to_owned(),
                message: "request_timeout_secs must be greater than 0".to_owned(),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                field: "connect_timeout_secs".to_owned(),
                message: "connect_timeout_secs must be greater than 0".to_owned(),
            });
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: "user_agent".to_owned(),
                message: "user_agent cannot be empty".to_owned(),
            });
        }
        Ok(())
    }
}
