//! Version range resolution.
//!
//! Ranges use the npm grammar: `*`, `x`, exact and partial versions,
//! comparison operators, `~`, `^`, `1.2.x`, space-separated conjunctions,
//! `||` disjunctions and hyphen ranges (`1.0.0 - 2.0.0`). Each conjunction is
//! parsed with [`semver::VersionReq`]; matching is done here so that
//! pre-release versions can be admitted on the fallback pass.
//!
//! Resolution is two-pass: the highest stable version satisfying the range
//! wins; only when no stable version matches is the highest pre-release
//! inside the range's bounds considered.

use std::cmp::Ordering;
use std::fmt;

use semver::{Comparator, Op, Version, VersionReq};
use tracing::debug;

use crate::error::{FetchError, FetchResult};

/// A parsed npm-style version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// The range matching every version (`*`).
    #[must_use]
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            alternatives: vec![VersionReq::STAR],
        }
    }

    /// Parse an npm-style range.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRange`] if any alternative fails to parse.
    pub fn parse(range: &str) -> FetchResult<Self> {
        let raw = range.trim();
        let mut alternatives = Vec::new();

        for alternative in raw.split("||") {
            let normalized = normalize_conjunction(alternative.trim());
            let req = VersionReq::parse(&normalized).map_err(|e| FetchError::InvalidRange {
                range: raw.to_string(),
                message: e.to_string(),
            })?;
            alternatives.push(req);
        }

        Ok(Self {
            raw: raw.to_string(),
            alternatives,
        })
    }

    /// The range a dist-tag stands for: exactly `version`, displayed as
    /// `tag`.
    #[must_use]
    pub fn dist_tag(tag: &str, version: &Version) -> Self {
        let exact = Comparator {
            op: Op::Exact,
            major: version.major,
            minor: Some(version.minor),
            patch: Some(version.patch),
            pre: version.pre.clone(),
        };
        Self {
            raw: tag.trim().to_string(),
            alternatives: vec![VersionReq {
                comparators: vec![exact],
            }],
        }
    }

    /// The range as written by the caller.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `version` lies inside the range.
    ///
    /// Pre-release versions are judged purely by precedence against the
    /// range bounds; callers that must prefer stable releases filter first.
    #[must_use]
    pub fn satisfies(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| {
            req.comparators
                .iter()
                .all(|comparator| comparator_matches(comparator, version))
        })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for VersionRange {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A concrete version chosen for a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    /// The selected version.
    pub version: Version,
    /// The range it was selected for.
    pub range: VersionRange,
}

impl fmt::Display for ResolvedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)
    }
}

/// Pick the best version in `available` for `range`.
///
/// Returns `None` when neither pass finds a match.
#[must_use]
pub fn resolve_version(available: &[Version], range: &VersionRange) -> Option<ResolvedVersion> {
    let best = |allow_prerelease: bool| {
        available
            .iter()
            .filter(|v| allow_prerelease || v.pre.is_empty())
            .filter(|v| range.satisfies(v))
            .max_by(|a, b| cmp_precedence(a, b))
    };

    best(false)
        .or_else(|| best(true))
        .map(|version| ResolvedVersion {
            version: version.clone(),
            range: range.clone(),
        })
}

/// String form of [`resolve_version`].
///
/// Entries that are not valid semver are skipped, as registries do list
/// the odd malformed version.
///
/// # Errors
///
/// Returns [`FetchError::InvalidRange`] for an unparsable range. A range
/// nothing satisfies is `Ok(None)`.
pub fn resolve<S: AsRef<str>>(available: &[S], range: &str) -> FetchResult<Option<ResolvedVersion>> {
    let range = VersionRange::parse(range)?;
    let versions: Vec<Version> = available
        .iter()
        .filter_map(|raw| match parse_version(raw.as_ref()) {
            Ok(version) => Some(version),
            Err(e) => {
                debug!(error = %e, "ignoring unparsable version");
                None
            },
        })
        .collect();
    Ok(resolve_version(&versions, &range))
}

/// Parse a list of version strings.
///
/// # Errors
///
/// Returns [`FetchError::InvalidVersion`] for the first invalid entry.
pub fn parse_versions<S: AsRef<str>>(versions: &[S]) -> FetchResult<Vec<Version>> {
    versions.iter().map(|v| parse_version(v.as_ref())).collect()
}

/// Parse a single semver version, accepting a leading `v`.
///
/// # Errors
///
/// Returns [`FetchError::InvalidVersion`] if the string is not semver.
pub fn parse_version(version: &str) -> FetchResult<Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).map_err(|e| FetchError::InvalidVersion {
        version: version.to_string(),
        message: e.to_string(),
    })
}

/// Semver precedence: build metadata is ignored.
fn cmp_precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre))
}

/// Rewrite one npm conjunction into `VersionReq` syntax.
fn normalize_conjunction(conjunction: &str) -> String {
    if conjunction.is_empty() || matches!(conjunction, "*" | "x" | "X") {
        return "*".to_string();
    }

    if let Some((low, high)) = conjunction.split_once(" - ") {
        return format!(">={}, <={}", strip_v(low.trim()), strip_v(high.trim()));
    }

    let mut comparators = Vec::new();
    let mut pending_op: Option<&str> = None;

    for token in conjunction.split_whitespace() {
        if is_operator(token) {
            pending_op = Some(token);
            continue;
        }
        let comparator = match pending_op.take() {
            Some(op) => format!("{op}{}", strip_v(token)),
            None => bare_comparator(token),
        };
        comparators.push(comparator);
    }

    if comparators.is_empty() {
        return "*".to_string();
    }
    comparators.join(", ")
}

fn is_operator(token: &str) -> bool {
    matches!(token, "=" | ">" | ">=" | "<" | "<=" | "~" | "^")
}

/// A token without a separate operator.
///
/// npm treats a bare version as exact and a bare partial as an x-range,
/// whereas `VersionReq` would read both as caret requirements.
fn bare_comparator(token: &str) -> String {
    let op_len = token
        .find(|c: char| c.is_ascii_digit() || matches!(c, 'v' | 'x' | 'X' | '*'))
        .unwrap_or(token.len());
    let (op, version) = token.split_at(op_len);
    let version = strip_v(version);

    if !op.is_empty() {
        return format!("{op}{version}");
    }
    if version.contains(['x', 'X', '*']) {
        return version.to_string();
    }
    format!("={version}")
}

fn strip_v(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Evaluate one comparator with pre-release versions admitted by precedence.
fn comparator_matches(c: &Comparator, v: &Version) -> bool {
    let triple = (v.major, v.minor, v.patch);
    let full = match (c.minor, c.patch) {
        (Some(minor), Some(patch)) => Some((c.major, minor, patch)),
        _ => None,
    };
    let cmp_full = |(major, minor, patch): (u64, u64, u64)| {
        (v.major, v.minor, v.patch, &v.pre).cmp(&(major, minor, patch, &c.pre))
    };

    match c.op {
        Op::Exact | Op::Wildcard => match (full, c.minor) {
            (Some(f), _) => cmp_full(f) == Ordering::Equal,
            (None, Some(minor)) => v.major == c.major && v.minor == minor,
            (None, None) => v.major == c.major,
        },
        Op::Greater => match (full, c.minor) {
            (Some(f), _) => cmp_full(f) == Ordering::Greater,
            (None, Some(minor)) => triple >= (c.major, minor.saturating_add(1), 0),
            (None, None) => v.major > c.major,
        },
        Op::GreaterEq => match (full, c.minor) {
            (Some(f), _) => cmp_full(f) != Ordering::Less,
            (None, Some(minor)) => triple >= (c.major, minor, 0),
            (None, None) => v.major >= c.major,
        },
        // `<X.Y.Z` means `<X.Y.Z-0`: pre-releases of X.Y.Z are not below it.
        Op::Less => match (full, c.minor) {
            (Some(f), _) if c.pre.is_empty() => triple < f,
            (Some(f), _) => cmp_full(f) == Ordering::Less,
            (None, Some(minor)) => triple < (c.major, minor, 0),
            (None, None) => v.major < c.major,
        },
        Op::LessEq => match (full, c.minor) {
            (Some(f), _) => cmp_full(f) != Ordering::Greater,
            (None, Some(minor)) => (v.major, v.minor) <= (c.major, minor),
            (None, None) => v.major <= c.major,
        },
        Op::Tilde => match (full, c.minor) {
            (Some(f), _) => {
                cmp_full(f) != Ordering::Less && v.major == c.major && v.minor == f.1
            },
            (None, Some(minor)) => v.major == c.major && v.minor == minor,
            (None, None) => v.major == c.major,
        },
        Op::Caret => match (full, c.minor) {
            (Some(f), _) => cmp_full(f) != Ordering::Less && caret_upper_holds(c.major, f.1, f.2, v),
            (None, Some(minor)) => {
                if c.major > 0 {
                    v.major == c.major && v.minor >= minor
                } else {
                    v.major == 0 && v.minor == minor
                }
            },
            (None, None) => v.major == c.major,
        },
        _ => false,
    }
}

/// Upper bound of `^major.minor.patch`: the left-most non-zero part is fixed.
fn caret_upper_holds(major: u64, minor: u64, patch: u64, v: &Version) -> bool {
    if major > 0 {
        v.major == major
    } else if minor > 0 {
        v.major == 0 && v.minor == minor
    } else {
        v.major == 0 && v.minor == 0 && v.patch == patch
    }
}
