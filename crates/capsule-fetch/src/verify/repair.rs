//! Manifest repair.
//!
//! [`apply_fix`] is a pure function from a failure reason to a corrected
//! manifest. [`repair_loop`] drives check → fix → re-check and refuses to
//! apply the same fix twice: each fix only touches the field its reason
//! names, so a recurring reason means a fix is wrong, not that the input is.

use tracing::debug;

use super::{ValidationFailure, ValidationFailureReason};
use crate::error::{FetchError, FetchResult};
use crate::manifest::{PackageDescriptor, PackageManifest, Shasum};

/// Upper bound on fixes in one repair run.
pub const MAX_REPAIR_ATTEMPTS: usize = ValidationFailureReason::ALL.len();

/// Inputs a fix may copy from.
#[derive(Debug, Clone, Copy)]
pub struct FixContext<'a> {
    /// The package's own descriptor.
    pub descriptor: &'a PackageDescriptor,
    /// Source bundle contents.
    pub source_bundle: &'a [u8],
}

/// Return `manifest` with the field implicated by `reason` corrected.
#[must_use]
pub fn apply_fix(
    reason: ValidationFailureReason,
    manifest: &PackageManifest,
    ctx: FixContext<'_>,
) -> PackageManifest {
    let mut fixed = manifest.clone();
    match reason {
        ValidationFailureReason::NameMismatch => {
            fixed.source.location.npm.package_name = ctx.descriptor.name.clone();
        },
        ValidationFailureReason::VersionMismatch => {
            fixed.version = ctx.descriptor.version.clone();
        },
        ValidationFailureReason::RepositoryMismatch => {
            fixed.repository = ctx.descriptor.repository.clone();
        },
        ValidationFailureReason::ShasumMismatch => {
            let actual = Shasum::of(ctx.source_bundle);
            fixed.source.shasum.algorithm = actual.algorithm;
            fixed.source.shasum.hash = actual.hash;
        },
    }
    fixed
}

/// Result of a converged repair run.
#[derive(Debug)]
pub struct Repaired<S> {
    /// State after the last fix.
    pub state: S,
    /// Reasons fixed, in order.
    pub applied: Vec<ValidationFailureReason>,
    /// Message of every failure that was fixed, in order.
    pub errors: Vec<String>,
}

/// Check `state`, fix its first failure, and repeat until it checks clean.
///
/// # Errors
///
/// Propagates errors from `check` and `fix`. Returns
/// [`FetchError::InternalRepairLoopExceeded`] if a reason recurs after its
/// fix or more than [`MAX_REPAIR_ATTEMPTS`] fixes would be needed.
pub fn repair_loop<S, C, F>(mut state: S, mut check: C, mut fix: F) -> FetchResult<Repaired<S>>
where
    C: FnMut(&S) -> FetchResult<Vec<ValidationFailure>>,
    F: FnMut(&mut S, ValidationFailureReason) -> FetchResult<()>,
{
    let mut applied: Vec<ValidationFailureReason> = Vec::new();
    let mut errors = Vec::new();

    loop {
        let failures = check(&state)?;
        let Some(first) = failures.into_iter().next() else {
            return Ok(Repaired {
                state,
                applied,
                errors,
            });
        };

        if applied.contains(&first.reason) || applied.len() >= MAX_REPAIR_ATTEMPTS {
            return Err(FetchError::InternalRepairLoopExceeded {
                reason: first.reason,
                attempts: applied.len(),
            });
        }

        debug!(reason = %first.reason, "applying manifest fix");
        fix(&mut state, first.reason)?;
        applied.push(first.reason);
        errors.push(first.message);
    }
}
