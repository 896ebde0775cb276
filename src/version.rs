//! # Tool Version Detection and Matching
//!
//! Before a builtin `Command` runs, the engine resolves which version of
//! the underlying tool (`grep`, `systemctl`, ...) is installed so it can
//! pick the right output parser (spec §4.5). `ToolVersionRegistry` caches
//! this per `(tool, backend_key)` pair for the process's lifetime, the
//! same process-wide-cache discipline the teacher applies to its compiled
//! version regex in `bootstrap_v2::platform::parse_version_from_output`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::RwLock;

/// A detected tool version, parsed down to the `major.minor.patch` triple
/// the engine reasons about; `raw` keeps the untouched `--version` output
/// for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVersion {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
    /// The raw text this was parsed from.
    pub raw: String,
}

impl ToolVersion {
    /// Construct directly from components, for tests and builtins that
    /// already know their own version.
    pub fn new(major: u64, minor: u64, patch: u64, raw: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            patch,
            raw: raw.into(),
        }
    }

    /// `major.minor.patch` with no raw-output noise.
    pub fn canonical(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// GNU/BSD/single-number fallback chain used to pull a version number out
/// of arbitrary `--version` output (spec §4.5). Patterns are tried in
/// order and the first capturing match wins.
static VERSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // GNU style: "grep (GNU grep) 3.11" / "git version 2.43.0"
        Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("gnu version pattern is valid"),
        // Two-component: "rg 13.0" (no patch component reported)
        Regex::new(r"(\d+)\.(\d+)()").expect("two-component version pattern is valid"),
        // Bare major only: "BusyBox v1"
        Regex::new(r"[vV](\d+)()()").expect("bare major version pattern is valid"),
    ]
});

/// Parse the first version-shaped substring out of raw `--version` output.
///
/// Falls through GNU (`X.Y.Z`) → two-component (`X.Y`) → bare-major (`vX`)
/// patterns, mirroring the teacher's single-pattern
/// `parse_version_from_output` generalized to the three shapes spec §4.5
/// requires the registry to tolerate.
pub fn parse_version(output: &str) -> Option<ToolVersion> {
    for pattern in VERSION_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(output) {
            let major = caps.get(1)?.as_str().parse().ok()?;
            let minor = caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            let patch = caps
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            return Some(ToolVersion::new(major, minor, patch, output.trim()));
        }
    }
    None
}

/// A version-keyed parser table entry: which `ToolVersion` pattern this
/// adapter covers, in the precedence order spec §4.5 defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPattern {
    /// Exact `major.minor.patch` match.
    Exact(u64, u64, u64),
    /// Any patch within `major.minor`.
    MinorWildcard(u64, u64),
    /// Any minor/patch within `major`.
    MajorWildcard(u64),
    /// `major.minor.patch` at or above this bound.
    AtLeast(u64, u64, u64),
    /// Matches every version; the adapter of last resort.
    Any,
}

impl VersionPattern {
    /// Specificity rank used to break ties when more than one pattern in a
    /// dispatch table matches the same version (spec §4.5: "exact beats
    /// X.Y beats X.x beats range beats X+").
    fn specificity(&self) -> u8 {
        match self {
            Self::Exact(..) => 4,
            Self::MinorWildcard(..) => 3,
            Self::MajorWildcard(..) => 2,
            Self::AtLeast(..) => 1,
            Self::Any => 0,
        }
    }

    /// Whether `version` satisfies this pattern.
    pub fn matches(&self, version: &ToolVersion) -> bool {
        match self {
            Self::Exact(ma, mi, pa) => {
                version.major == *ma && version.minor == *mi && version.patch == *pa
            }
            Self::MinorWildcard(ma, mi) => version.major == *ma && version.minor == *mi,
            Self::MajorWildcard(ma) => version.major == *ma,
            Self::AtLeast(ma, mi, pa) => {
                (version.major, version.minor, version.patch) >= (*ma, *mi, *pa)
            }
            Self::Any => true,
        }
    }
}

/// Pick the most specific matching pattern's index out of `patterns`,
/// implementing spec §4.5's precedence rule. Returns `None` if nothing
/// matches.
pub fn select_best_match<'a>(
    version: &ToolVersion,
    patterns: &'a [VersionPattern],
) -> Option<&'a VersionPattern> {
    patterns
        .iter()
        .filter(|p| p.matches(version))
        .max_by_key(|p| p.specificity())
}

/// Process-wide cache of detected tool versions, keyed by
/// `(tool_name, backend_key)` so the same tool detected locally and over
/// SSH to two different hosts gets three independent entries.
pub struct ToolVersionRegistry {
    cache: RwLock<HashMap<(String, String), ToolVersion>>,
}

impl Default for ToolVersionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolVersionRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Previously detected version for `tool` on `backend_key`, if any.
    pub fn get(&self, tool: &str, backend_key: &str) -> Option<ToolVersion> {
        self.cache
            .read()
            .expect("version registry poisoned")
            .get(&(tool.to_string(), backend_key.to_string()))
            .cloned()
    }

    /// Record a freshly detected version.
    pub fn put(&self, tool: &str, backend_key: &str, version: ToolVersion) {
        self.cache
            .write()
            .expect("version registry poisoned")
            .insert((tool.to_string(), backend_key.to_string()), version);
    }

    /// Drop every cached entry (used when tests need a clean registry, and
    /// by `--no-cache`-style CLI invocations that also want to redetect).
    pub fn clear(&self) {
        self.cache.write().expect("version registry poisoned").clear();
    }
}

/// The process-wide registry instance the orchestrator consults by
/// default. Built lazily on first access, matching the teacher's
/// `once_cell::sync::Lazy`-cached regex pattern applied one layer up, to
/// the registry itself rather than just the regex inside it.
pub static GLOBAL_VERSION_REGISTRY: Lazy<ToolVersionRegistry> = Lazy::new(ToolVersionRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gnu_style() {
        let v = parse_version("grep (GNU grep) 3.11\n").unwrap();
        assert_eq!(v.canonical(), "3.11.0");
    }

    #[test]
    fn test_parse_full_semver() {
        let v = parse_version("git version 2.43.0").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (2, 43, 0));
    }

    #[test]
    fn test_parse_bare_major() {
        let v = parse_version("BusyBox v1 multi-call binary").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 0, 0));
    }

    #[test]
    fn test_parse_no_version_returns_none() {
        assert!(parse_version("command not found").is_none());
    }

    #[test]
    fn test_precedence_exact_beats_wildcards() {
        let version = ToolVersion::new(3, 11, 0, "3.11.0");
        let patterns = vec![
            VersionPattern::Any,
            VersionPattern::MajorWildcard(3),
            VersionPattern::MinorWildcard(3, 11),
            VersionPattern::Exact(3, 11, 0),
        ];
        let best = select_best_match(&version, &patterns).unwrap();
        assert_eq!(*best, VersionPattern::Exact(3, 11, 0));
    }

    #[test]
    fn test_precedence_falls_back_to_any() {
        let version = ToolVersion::new(9, 9, 9, "9.9.9");
        let patterns = vec![VersionPattern::Exact(1, 0, 0), VersionPattern::Any];
        let best = select_best_match(&version, &patterns).unwrap();
        assert_eq!(*best, VersionPattern::Any);
    }

    #[test]
    fn test_no_match_returns_none() {
        let version = ToolVersion::new(9, 9, 9, "9.9.9");
        let patterns = vec![VersionPattern::Exact(1, 0, 0)];
        assert!(select_best_match(&version, &patterns).is_none());
    }

    #[test]
    fn test_registry_is_keyed_by_backend() {
        let registry = ToolVersionRegistry::new();
        registry.put("grep", "local", ToolVersion::new(3, 11, 0, "3.11.0"));
        registry.put("grep", "remote:u@h:22", ToolVersion::new(2, 5, 1, "2.5.1"));

        assert_eq!(registry.get("grep", "local").unwrap().canonical(), "3.11.0");
        assert_eq!(
            registry.get("grep", "remote:u@h:22").unwrap().canonical(),
            "2.5.1"
        );
        assert!(registry.get("grep", "remote:other:22").is_none());
    }

    #[test]
    fn test_registry_clear() {
        let registry = ToolVersionRegistry::new();
        registry.put("grep", "local", ToolVersion::new(1, 0, 0, "1.0.0"));
        registry.clear();
        assert!(registry.get("grep", "local").is_none());
    }
}
