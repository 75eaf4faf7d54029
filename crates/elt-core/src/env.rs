//! Small, self-contained pieces of §6's environment-variable surface that
//! don't require the excluded CLI/env-cascading collaborator: a pure parser
//! for the `TESTS` selector grammar, and typed readers for the flags the
//! core itself branches on (`ERROR_ON_CHECKSUM_FAILURE`, `CONCURRENCY_LIMIT`).

use std::collections::HashMap;

/// A parsed `TESTS` selector entry (§6): `N`, `N-M`, or `N+`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestSelector {
    Single(u32),
    Range(u32, u32),
    From(u32),
}

impl TestSelector {
    pub fn matches(&self, n: u32) -> bool {
        match self {
            TestSelector::Single(x) => *x == n,
            TestSelector::Range(a, b) => (*a..=*b).contains(&n),
            TestSelector::From(a) => n >= *a,
        }
    }
}

/// Parses a comma-joined `TESTS` selector string into its entries. Returns
/// an error describing the offending fragment on malformed input.
pub fn parse_test_selector(spec: &str) -> Result<Vec<TestSelector>, String> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|frag| {
            if let Some(base) = frag.strip_suffix('+') {
                base.parse::<u32>()
                    .map(TestSelector::From)
                    .map_err(|_| format!("invalid TESTS fragment: `{frag}`"))
            } else if let Some((a, b)) = frag.split_once('-') {
                let a: u32 = a.parse().map_err(|_| format!("invalid TESTS fragment: `{frag}`"))?;
                let b: u32 = b.parse().map_err(|_| format!("invalid TESTS fragment: `{frag}`"))?;
                Ok(TestSelector::Range(a, b))
            } else {
                frag.parse::<u32>()
                    .map(TestSelector::Single)
                    .map_err(|_| format!("invalid TESTS fragment: `{frag}`"))
            }
        })
        .collect()
}

/// Reads `ERROR_ON_CHECKSUM_FAILURE` from an `Env` map: `"1"` is fatal.
pub fn checksum_failure_is_fatal(env: &HashMap<String, String>) -> bool {
    env.get("ERROR_ON_CHECKSUM_FAILURE").map(String::as_str) == Some("1")
}

/// Reads `CONCURRENCY_LIMIT`, defaulting to `default_limit` when unset or
/// unparseable.
pub fn concurrency_limit(env: &HashMap<String, String>, default_limit: usize) -> usize {
    env.get("CONCURRENCY_LIMIT")
        .and_then(|s| s.parse().ok())
        .unwrap_or(default_limit)
}
