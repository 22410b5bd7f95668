//! Matches a build's Android version and architecture variant against the
//! companion repository names fetched at the start of a scan.
//!
//! Repository names follow `{version}.0.0-{arch}` or `{version}.0.0-{arch}-{variant}`,
//! e.g. `14.0.0-arm64`, `14.0.0-arm64-ATV`, `16.0.0-arm64-ATV`.

use tracing::debug;

/// Profile that takes the plain `arm64` companion; every other profile uses the ATV variant.
const TABLET_PROFILE_ID: &str = "nx_tab";

pub fn companion_suffix(profile_id: &str) -> &'static str {
    if profile_id == TABLET_PROFILE_ID {
        "arm64"
    } else {
        "arm64-ATV"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantMatch<'a> {
    pub name: &'a str,
    pub kind: MatchKind,
}

/// Candidates sharing either half of the key, reported on a miss.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NearMisses<'a> {
    pub by_version: Vec<&'a str>,
    pub by_suffix: Vec<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct VariantMatcher {
    candidates: Vec<String>,
}

impl VariantMatcher {
    pub fn new(candidates: Vec<String>) -> Self {
        Self { candidates }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Exact `{version}.0.0-{suffix}` wins; otherwise the first name, in listing
    /// order, that starts with `{version}.` and ends with `-{suffix}`.
    pub fn find(&self, version: &str, suffix: &str) -> Option<VariantMatch<'_>> {
        let exact = format!("{version}.0.0-{suffix}");
        if let Some(name) = self.candidates.iter().find(|name| **name == exact) {
            debug!(name = %name, "exact companion match");
            return Some(VariantMatch {
                name,
                kind: MatchKind::Exact,
            });
        }

        let prefix = format!("{version}.");
        let tail = format!("-{suffix}");
        let pattern = self
            .candidates
            .iter()
            .find(|name| name.starts_with(&prefix) && name.ends_with(&tail));
        match pattern {
            Some(name) => {
                debug!(name = %name, "pattern companion match");
                Some(VariantMatch {
                    name,
                    kind: MatchKind::Pattern,
                })
            }
            None => {
                let misses = self.near_misses(version, suffix);
                if !misses.by_version.is_empty() {
                    debug!(version, available = %misses.by_version.join(", "), "companions for version");
                }
                if !misses.by_suffix.is_empty() {
                    debug!(suffix, available = %misses.by_suffix.join(", "), "companions for variant");
                }
                None
            }
        }
    }

    pub fn near_misses(&self, version: &str, suffix: &str) -> NearMisses<'_> {
        let prefix = format!("{version}.");
        let tail = format!("-{suffix}");
        NearMisses {
            by_version: self
                .candidates
                .iter()
                .filter(|name| name.starts_with(&prefix))
                .map(String::as_str)
                .collect(),
            by_suffix: self
                .candidates
                .iter()
                .filter(|name| name.ends_with(&tail))
                .map(String::as_str)
                .collect(),
        }
    }
}
