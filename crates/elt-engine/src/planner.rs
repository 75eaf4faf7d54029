//! Task Planner (§4.1): classifies a prepared `Config` into a `Topology`,
//! validates mode/key prerequisites beyond what `Config::prepare` already
//! checks, and reserves a temp-table name when the user didn't supply one.

use elt_core::{Column, Config, EltError, Result, Task, Topology};
use rand::Rng;

/// Classifies `config` into a topology, or fails with `InvalidConfig` if no
/// rule matches. Mirrors the "first match wins" table in §4.1.
pub fn classify(config: &Config) -> Result<Topology> {
    let src_db = config.src_conn.is_database();
    let tgt_db = config.tgt_conn.is_database();
    let src_file = config.src_conn.is_filesystem();
    let tgt_file = config.tgt_conn.is_filesystem();
    let src_api = config.src_conn.is_api();
    let src_stream_provided = !config.source.stream.trim().is_empty();
    let transform_set = config
        .target
        .options
        .transform
        .as_ref()
        .is_some_and(|t| !t.trim().is_empty());

    if src_db && tgt_db && !transform_set {
        return Ok(Topology::DbToDb);
    }
    if src_file && tgt_db && !transform_set {
        return Ok(Topology::FileToDb);
    }
    if src_db && src_stream_provided && !tgt_db && tgt_file {
        return Ok(Topology::DbToFile);
    }
    if src_file && !src_db && !tgt_db && tgt_file {
        return Ok(Topology::FileToFile);
    }
    if src_api && src_stream_provided && tgt_db {
        return Ok(Topology::ApiToDb);
    }
    if src_api && src_stream_provided && tgt_file {
        return Ok(Topology::ApiToFile);
    }
    if tgt_db && transform_set {
        return Ok(Topology::DbTransform);
    }
    if tgt_db
        && config.target.options.post_sql.is_some()
        && !src_stream_provided
        && config.target.options.pre_sql.is_none()
    {
        return Ok(Topology::DbSql);
    }

    Err(EltError::InvalidConfig(
        "no topology matches this combination of connections, stream, and mode".into(),
    ))
}

/// Builds a `Task` from a prepared `Config`: classifies it and resolves a
/// temp-table name into `target.options.table_tmp` if the user left it
/// unset (§4.1's "reserves a name" rule).
pub fn plan(mut config: Config, max_identifier_len: usize) -> Result<Task> {
    let topology = classify(&config)?;
    if config.target.options.table_tmp.is_none() && !config.target.object.is_empty() {
        config.target.options.table_tmp =
            Some(reserve_temp_name(&config.target.object, max_identifier_len));
    }
    Ok(Task::new(config, topology))
}

/// Reserves a temp-table name: the final object's base name, truncated to
/// leave room for a dialect-appropriate random suffix, plus that suffix
/// (one digit, then alphanumeric characters) so the whole name fits within
/// `max_identifier_len` (§4.1, §8's "Oracle-style short-identifier limit").
pub fn reserve_temp_name(final_object: &str, max_identifier_len: usize) -> String {
    const SUFFIX_LEN: usize = 6;
    let base = final_object.rsplit('.').next().unwrap_or(final_object);
    let budget = max_identifier_len.saturating_sub(SUFFIX_LEN + 1); // +1 for the separating '_'
    let truncated: String = base.chars().take(budget.min(24)).collect();
    format!("{truncated}_{}", random_suffix(SUFFIX_LEN))
}

fn random_suffix(len: usize) -> String {
    const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(len);
    out.push((b'0' + rng.gen_range(0..10)) as char);
    for _ in 1..len {
        out.push(ALNUM[rng.gen_range(0..ALNUM.len())] as char);
    }
    out
}

/// Case-insensitive intersection of source and target columns, per
/// `ReadFromDB` step 3 (§4.2). Fails with `SchemaMismatch` on an empty
/// intersection.
pub fn intersect_or_fail<'a>(source: &'a [Column], target: &[Column]) -> Result<Vec<&'a Column>> {
    let common = elt_core::column::intersect_case_insensitive(source, target);
    if common.is_empty() {
        return Err(EltError::SchemaMismatch);
    }
    Ok(common)
}

#[cfg(test)]
mod tests {
    use super::*;
    use elt_core::{ConnInfo, Mode, SourceSpec, TargetSpec};
    use std::collections::HashMap;

    fn base_config() -> Config {
        Config {
            src_conn: ConnInfo { type_tag: "postgres".into(), url: String::new(), credentials: HashMap::new() },
            source: SourceSpec { stream: "public.t1k".into(), ..Default::default() },
            tgt_conn: ConnInfo { type_tag: "mock_db".into(), url: String::new(), credentials: HashMap::new() },
            target: TargetSpec { object: "public.t1k".into(), ..Default::default() },
            mode: Mode::FullRefresh,
            options: Default::default(),
            env: HashMap::new(),
        }
    }

    #[test]
    fn db_to_db_when_both_sides_are_databases() {
        assert_eq!(classify(&base_config()).unwrap(), Topology::DbToDb);
    }

    #[test]
    fn file_to_db_when_source_is_filesystem() {
        let mut cfg = base_config();
        cfg.src_conn.type_tag = "local".into();
        assert_eq!(classify(&cfg).unwrap(), Topology::FileToDb);
    }

    #[test]
    fn db_transform_when_transform_directive_set() {
        let mut cfg = base_config();
        cfg.target.options.transform = Some("my_model".into());
        assert_eq!(classify(&cfg).unwrap(), Topology::DbTransform);
    }

    #[test]
    fn unrecognized_combination_is_invalid_config() {
        let mut cfg = base_config();
        cfg.src_conn.type_tag = "api".into();
        cfg.source.stream = String::new();
        cfg.tgt_conn.type_tag = "local".into();
        assert!(matches!(classify(&cfg).unwrap_err(), EltError::InvalidConfig(_)));
    }

    #[test]
    fn reserved_temp_name_respects_short_identifier_limit() {
        let name = reserve_temp_name("sling_test.wide_table_with_a_very_long_name", 30);
        assert!(name.len() <= 30, "name was {} chars: {name}", name.len());
    }

    #[test]
    fn plan_assigns_temp_table_name_when_unset() {
        let task = plan(base_config(), 63).unwrap();
        assert!(task.config.target.options.table_tmp.is_some());
    }
}
