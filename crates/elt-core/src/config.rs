//! The `Config` data model (§3): immutable after `prepare()`, carrying the
//! source/target connection and stream/object descriptions, the transfer
//! mode, and free-form options.
//!
//! Config loading from YAML/JSON is an ambient concern (SPEC_FULL.md §6) —
//! the CLI front-end and environment-variable cascading remain out of
//! scope, but plain deserialization is implemented here so the engine is
//! runnable end to end.

use crate::column::Column;
use crate::error::{EltError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Transfer mode, selected per spec.md §3. An empty string deserializes to
/// `Append` ("" -> append). `Deserialize` is implemented by hand (below, via
/// `deserialize_mode`) rather than derived, so every parse path — not just
/// direct `str::parse` — runs through `FromStr` and rejects an unrecognized
/// mode with `InvalidMode` instead of a generic serde error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Append,
    Drop,
    Truncate,
    Upsert,
    FullRefresh,
    Snapshot,
    Discover,
}

impl std::str::FromStr for Mode {
    type Err = EltError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "append" => Ok(Mode::Append),
            "drop" => Ok(Mode::Drop),
            "truncate" => Ok(Mode::Truncate),
            "upsert" => Ok(Mode::Upsert),
            "full-refresh" | "full_refresh" => Ok(Mode::FullRefresh),
            "snapshot" => Ok(Mode::Snapshot),
            "discover" => Ok(Mode::Discover),
            other => Err(EltError::InvalidMode(other.to_string())),
        }
    }
}

/// Deserializes `mode` as a raw string and converts it via `FromStr`, so
/// `""` and unrecognized values are handled by the one authoritative mapping
/// instead of a derived kebab-case match that rejects `""` outright.
fn deserialize_mode<'de, D>(deserializer: D) -> std::result::Result<Mode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse::<Mode>().map_err(serde::de::Error::custom)
}

/// Connection info for either endpoint: a type tag (`postgres`, `mysql`,
/// `snowflake`, `s3`, `local`, ...), a URL, and a credentials map. The type
/// tag is what the `DriverRegistry` keys on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnInfo {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

impl ConnInfo {
    pub fn is_database(&self) -> bool {
        matches!(
            self.type_tag.as_str(),
            "postgres" | "mysql" | "snowflake" | "mock_db" | "sqlite" | "oracle" | "bigquery"
        )
    }

    pub fn is_filesystem(&self) -> bool {
        matches!(self.type_tag.as_str(), "local" | "s3" | "gcs" | "azure" | "file")
    }

    pub fn is_api(&self) -> bool {
        self.type_tag == "api"
    }
}

/// Target-side options (§3): pre/post hooks, DDL overrides, bulk toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetOptions {
    #[serde(default)]
    pub pre_sql: Option<String>,
    #[serde(default)]
    pub post_sql: Option<String>,
    #[serde(default)]
    pub table_ddl: Option<String>,
    #[serde(default)]
    pub table_tmp: Option<String>,
    #[serde(default = "default_true")]
    pub use_bulk: bool,
    #[serde(default)]
    pub adjust_column_type: bool,
    /// A transform directive (dbt-style model name or inline SQL), present
    /// only for the `DbTransform` topology. The transform runner itself is
    /// out of scope (§1); the planner only needs to know whether one is set.
    #[serde(default)]
    pub transform: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Source-side stream description (§3): either a bare identifier (resolved
/// to `select * from <schema.table>`) or raw SQL, plus key metadata used by
/// upsert mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSpec {
    pub stream: String,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub update_key: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub limit: Option<u64>,
}

/// Target-side object description (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSpec {
    pub object: String,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub update_key: Option<String>,
    #[serde(default)]
    pub options: TargetOptions,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub tmp_table_created: bool,
}

/// Options outside of source/target: stdio redirection toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub stdout: bool,
}

/// The full task configuration (§3). Immutable after `prepare()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub src_conn: ConnInfo,
    pub source: SourceSpec,
    pub tgt_conn: ConnInfo,
    pub target: TargetSpec,
    #[serde(default = "default_mode", deserialize_with = "deserialize_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub options: RunOptions,
    /// Free-form map; also carries unknown top-level keys and validation
    /// hints, per spec.md §3.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_mode() -> Mode {
    Mode::Append
}

impl Config {
    /// Parses a `Config` from a YAML or JSON string. Both are accepted
    /// (§6); YAML is tried first since JSON is a subset of YAML and would
    /// otherwise always match.
    pub fn from_str_auto(text: &str) -> Result<Config> {
        serde_yaml::from_str(text)
            .map_err(anyhow::Error::from)
            .or_else(|_| serde_json::from_str(text).map_err(anyhow::Error::from))
            .map_err(|e| EltError::InvalidConfig(format!("could not parse config: {e}")))
    }

    /// Loads and parses a `Config` file, sniffing format by extension with
    /// a fallback to `from_str_auto`.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EltError::InvalidConfig(format!("reading {}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)
                .map_err(|e| EltError::InvalidConfig(format!("parsing {}: {e}", path.display()))),
            _ => Self::from_str_auto(&text),
        }
    }

    /// Validates mode/key prerequisites and returns the immutable, prepared
    /// config. Per spec.md §3: upsert requires non-empty `primary_key` and
    /// `update_key` on the target.
    pub fn prepare(self) -> Result<Config> {
        if self.mode == Mode::Upsert
            && (self.target.primary_key.is_empty() || self.target.update_key.is_none())
        {
            return Err(EltError::InvalidConfig(
                "upsert mode requires target.primary_key and target.update_key".into(),
            ));
        }
        if self.target.object.is_empty() && self.mode != Mode::Discover {
            return Err(EltError::InvalidConfig("target.object must not be empty".into()));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
src_conn:
  type: postgres
  url: postgres://localhost/src
source:
  stream: public.t1k
tgt_conn:
  type: mock_db
  url: mock://tgt
target:
  object: public.t1k
mode: full-refresh
"#
    }

    #[test]
    fn parses_minimal_yaml_and_prepares() {
        let cfg = Config::from_str_auto(minimal_yaml()).unwrap();
        let cfg = cfg.prepare().unwrap();
        assert_eq!(cfg.mode, Mode::FullRefresh);
        assert!(cfg.src_conn.is_database());
    }

    #[test]
    fn upsert_without_keys_is_rejected() {
        let mut cfg = Config::from_str_auto(minimal_yaml()).unwrap();
        cfg.mode = Mode::Upsert;
        let err = cfg.prepare().unwrap_err();
        assert!(matches!(err, EltError::InvalidConfig(_)));
    }

    #[test]
    fn upsert_with_keys_is_accepted() {
        let mut cfg = Config::from_str_auto(minimal_yaml()).unwrap();
        cfg.mode = Mode::Upsert;
        cfg.target.primary_key = vec!["id".into()];
        cfg.target.update_key = Some("updated_at".into());
        assert!(cfg.prepare().is_ok());
    }

    #[test]
    fn round_trips_through_yaml() {
        let cfg = Config::from_str_auto(minimal_yaml()).unwrap();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let cfg2 = Config::from_str_auto(&yaml).unwrap();
        assert_eq!(cfg.target.object, cfg2.target.object);
        assert_eq!(cfg.mode, cfg2.mode);
    }

    #[test]
    fn empty_mode_string_defaults_to_append_via_fromstr() {
        assert_eq!("".parse::<Mode>().unwrap(), Mode::Append);
        assert!("bogus".parse::<Mode>().is_err());
    }

    #[test]
    fn explicit_empty_mode_in_yaml_defaults_to_append() {
        let yaml = minimal_yaml().replace("mode: full-refresh", "mode: \"\"");
        let cfg = Config::from_str_auto(&yaml).unwrap();
        assert_eq!(cfg.mode, Mode::Append);
    }

    #[test]
    fn unknown_mode_in_yaml_is_rejected_at_parse_time() {
        let yaml = minimal_yaml().replace("mode: full-refresh", "mode: bogus");
        let err = Config::from_str_auto(&yaml).unwrap_err();
        assert!(matches!(err, EltError::InvalidConfig(ref msg) if msg.contains("invalid mode")), "got {err:?}");
    }
}
