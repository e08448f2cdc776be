//! HTTP and loopback directory handles.

use std::collections::HashMap;

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;
use url::Url;

use crate::bundle::{PackageFile, normalize_path};
use crate::config::FetchConfig;
use crate::error::{Artifact, FetchError, FetchResult};
use crate::manifest::{DESCRIPTOR_FILE, MANIFEST_FILE};
use crate::transport::HttpTransport;

/// A package served as plain files under a root URL.
///
/// Fetched files are cached by canonical URL. The cache lock is held across
/// the request, so concurrent fetches of one path through a shared handle
/// hit the network once.
#[derive(Debug)]
pub struct HttpHandle {
    root: Url,
    transport: HttpTransport,
    cache: Mutex<HashMap<String, PackageFile>>,
    manifest: OnceCell<PackageFile>,
}

impl HttpHandle {
    pub(super) fn new(root: Url, config: &FetchConfig) -> FetchResult<Self> {
        Ok(Self {
            transport: HttpTransport::new(config, root.clone())?,
            root,
            cache: Mutex::new(HashMap::new()),
            manifest: OnceCell::new(),
        })
    }

    /// Root URL every path is resolved against.
    #[must_use]
    pub fn root(&self) -> &Url {
        &self.root
    }

    /// The manifest, fetched once per handle.
    ///
    /// # Errors
    ///
    /// Transport errors for the manifest URL.
    pub async fn manifest(&self) -> FetchResult<PackageFile> {
        self.manifest
            .get_or_try_init(|| self.fetch_as(MANIFEST_FILE, Artifact::Manifest))
            .await
            .cloned()
    }

    /// Fetch `path` relative to the root, from cache when possible.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidLocation`] for paths escaping the root, and
    /// transport errors.
    pub async fn fetch(&self, path: &str) -> FetchResult<PackageFile> {
        self.fetch_as(path, artifact_for(path)).await
    }

    async fn fetch_as(&self, path: &str, artifact: Artifact) -> FetchResult<PackageFile> {
        let path = normalize_path(path);
        let url = self.resolve(&path)?;
        let key = url.to_string();

        let mut cache = self.cache.lock().await;
        if let Some(file) = cache.get(&key) {
            debug!(url = %key, "cache hit");
            return Ok(file.clone());
        }

        let data = self.transport.get_bytes(&url, artifact).await?;
        let file = PackageFile::new(&path, data);
        cache.insert(key, file.clone());
        Ok(file)
    }

    fn resolve(&self, path: &str) -> FetchResult<Url> {
        let url = self.root.join(path).map_err(|e| FetchError::InvalidLocation {
            uri: format!("{}{path}", self.root),
            message: e.to_string(),
        })?;
        if !url.as_str().starts_with(self.root.as_str()) {
            return Err(FetchError::InvalidLocation {
                uri: url.to_string(),
                message: format!("path '{path}' escapes {}", self.root),
            });
        }
        Ok(url)
    }
}

/// Artifact named in errors for a fetched path.
fn artifact_for(path: &str) -> Artifact {
    match normalize_path(path).as_str() {
        DESCRIPTOR_FILE => Artifact::Descriptor,
        MANIFEST_FILE => Artifact::Manifest,
        p if p.ends_with(".svg") => Artifact::Icon,
        _ => Artifact::SourceBundle,
    }
}
