//! SRI (Subresource Integrity) verification of downloaded tarballs.
//!
//! Accepts `sha512-<base64>` and `sha256-<base64>` tokens. SHA-1 tokens are
//! ignored, so a SHA-1-only string never verifies.

use base64::Engine;
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::error::{Artifact, FetchError, FetchResult};

/// Supported SRI hash algorithms, ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SriAlgorithm {
    Sha256,
    Sha512,
}

impl SriAlgorithm {
    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha512 => Sha512::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Verify `data` against an SRI string, using its strongest supported hash.
///
/// # Errors
///
/// Returns [`FetchError::IntegrityMismatch`] when the digest differs, and
/// [`FetchError::Transport`] (registry metadata) when the SRI string itself
/// is unusable.
pub fn verify_sri_integrity(data: &[u8], sri: &str, package: &str) -> FetchResult<()> {
    let (algorithm, expected_b64) = pick_strongest_hash(sri)?;

    let expected = base64::engine::general_purpose::STANDARD
        .decode(expected_b64)
        .map_err(|e| bad_metadata(format!("invalid base64 in SRI hash: {e}")))?;

    let actual = algorithm.digest(data);
    if !bool::from(actual.ct_eq(&expected)) {
        return Err(FetchError::IntegrityMismatch {
            package: package.to_string(),
            expected: sri.to_string(),
        });
    }
    Ok(())
}

fn pick_strongest_hash(sri: &str) -> FetchResult<(SriAlgorithm, &str)> {
    let mut best: Option<(SriAlgorithm, &str)> = None;

    for token in sri.split_whitespace() {
        if let Some((algorithm, hash)) = parse_token(token)?
            && best.is_none_or(|(current, _)| algorithm > current)
        {
            best = Some((algorithm, hash));
        }
    }

    best.ok_or_else(|| bad_metadata(format!("no usable hash in SRI string: {sri}")))
}

/// Parse one `algorithm-hash[?options]` token; `Ok(None)` for SHA-1.
fn parse_token(token: &str) -> FetchResult<Option<(SriAlgorithm, &str)>> {
    let token = token.split('?').next().unwrap_or(token);

    if let Some(hash) = token.strip_prefix("sha512-") {
        Ok(Some((SriAlgorithm::Sha512, hash)))
    } else if let Some(hash) = token.strip_prefix("sha256-") {
        Ok(Some((SriAlgorithm::Sha256, hash)))
    } else if token.starts_with("sha1-") {
        Ok(None)
    } else {
        Err(bad_metadata(format!("unsupported SRI algorithm in: {token}")))
    }
}

fn bad_metadata(message: String) -> FetchError {
    FetchError::transport(Artifact::RegistryMetadata, message)
}
