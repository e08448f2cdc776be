//! Origin-pinned HTTP transport.
//!
//! The reqwest client never follows redirects on its own. Each hop is
//! checked against the origin the transport was built for (scheme, host and
//! port) before it is requested, and response bodies are streamed with a
//! running size counter so a missing or lying `Content-Length` cannot push
//! a body past the limit.

use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::FetchConfig;
use crate::error::{Artifact, FetchError, FetchResult};

/// Maximum number of redirects followed for one request.
const MAX_REDIRECTS: u32 = 10;

/// HTTP client bound to a single origin.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    origin: Url,
    max_body_size: u64,
}

impl HttpTransport {
    /// Build a transport whose requests must stay on `origin`'s origin.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the HTTP client cannot be built
    /// (e.g. no TLS backend available).
    pub fn new(config: &FetchConfig, origin: Url) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                FetchError::transport(
                    Artifact::RegistryMetadata,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            client,
            origin,
            max_body_size: config.max_tarball_size,
        })
    }

    /// The URL this transport is pinned to.
    #[must_use]
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Whether `url` shares this transport's scheme, host and port.
    #[must_use]
    pub fn same_origin(&self, url: &Url) -> bool {
        url.scheme() == self.origin.scheme()
            && url.host_str() == self.origin.host_str()
            && url.port_or_known_default() == self.origin.port_or_known_default()
    }

    /// GET `url` and decode the body as JSON.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::get_bytes`]; an undecodable body is a
    /// [`FetchError::Transport`] for `artifact`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url, artifact: Artifact) -> FetchResult<T> {
        let body = self.get_bytes(url, artifact).await?;
        serde_json::from_slice(&body)
            .map_err(|e| FetchError::transport(artifact, format!("malformed JSON from {url}: {e}")))
    }

    /// GET `url` and collect the body, bounded by the configured size.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::RedirectBlocked`] when a hop leaves the origin,
    /// [`FetchError::PackageTooLarge`] when the body exceeds the limit and
    /// [`FetchError::Transport`] for network failures and non-2xx responses.
    pub async fn get_bytes(&self, url: &Url, artifact: Artifact) -> FetchResult<Vec<u8>> {
        let response = self.follow_redirects(url, artifact).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::transport(
                artifact,
                format!("server returned {status} for {url}"),
            ));
        }

        if let Some(content_length) = response.content_length()
            && content_length > self.max_body_size
        {
            return Err(FetchError::PackageTooLarge {
                size: content_length,
                limit: self.max_body_size,
            });
        }

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        let mut downloaded: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| {
                FetchError::transport(artifact, format!("failed to read body of {url}: {e}"))
            })?;

            downloaded = downloaded.saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
            if downloaded > self.max_body_size {
                return Err(FetchError::PackageTooLarge {
                    size: downloaded,
                    limit: self.max_body_size,
                });
            }
            buffer.extend_from_slice(&chunk);
        }

        debug!(url = %url, bytes = buffer.len(), "fetched");
        Ok(buffer)
    }

    async fn follow_redirects(&self, url: &Url, artifact: Artifact) -> FetchResult<reqwest::Response> {
        if !self.same_origin(url) {
            return Err(FetchError::RedirectBlocked {
                artifact,
                url: url.to_string(),
            });
        }

        let mut current = url.clone();
        for _ in 0..MAX_REDIRECTS {
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| FetchError::transport(artifact, format!("request to {current} failed: {e}")))?;

            if !response.status().is_redirection() {
                return Ok(response);
            }

            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    FetchError::transport(artifact, format!("redirect without Location header from {current}"))
                })?;

            let next = current.join(location).map_err(|e| FetchError::RedirectBlocked {
                artifact,
                url: format!("{location} (parse error: {e})"),
            })?;

            if !self.same_origin(&next) {
                return Err(FetchError::RedirectBlocked {
                    artifact,
                    url: next.to_string(),
                });
            }

            debug!(redirect = %next, "following redirect");
            current = next;
        }

        Err(FetchError::transport(
            artifact,
            format!("too many redirects for {url}"),
        ))
    }
}
