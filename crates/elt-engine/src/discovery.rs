//! Discovery (§4.5): enumerates tables/columns for a database target, or
//! files/columns for a filesystem target, used by the read-only `discover`
//! mode. `discover` mode runs no promotion.

use elt_core::{Column, DatabaseDriver, EltError, FilesystemDriver, Result};

#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Include column-level detail (per-table columns, or per-file schema
    /// probing for filesystems).
    pub column_level: bool,
    /// Glob filter applied to table/file names.
    pub filter: Option<String>,
    /// Expand nested schemas (database targets only).
    pub recursive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TableEntry {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
}

/// Discovery result: `files` populated for a filesystem target, `schemata`
/// for a database target — never both (§4.5's `(files, schemata)` pair).
#[derive(Debug, Clone, Default)]
pub struct DiscoverResult {
    pub files: Vec<String>,
    pub schemata: Vec<TableEntry>,
}

fn matches_filter(name: &str, filter: &Option<String>) -> bool {
    match filter {
        None => true,
        Some(pattern) => glob_match(pattern, name),
    }
}

/// Minimal glob matcher supporting `*` and `?`, sufficient for the name
/// filters discovery needs (no directory-separator semantics, unlike the
/// filesystem driver's path globbing).
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

/// Enumerates tables (and optionally columns) on a database target whose
/// schema/table list is `known_tables` — supplied by the caller since the
/// `DatabaseDriver` capability surface (§2) doesn't include a generic
/// schema-enumeration verb; drivers that can list their own catalog expose
/// it through `get_columns`/`table_exists` per named table instead.
pub async fn discover_database(
    driver: &dyn DatabaseDriver,
    known_tables: &[(String, String)],
    opts: &DiscoverOptions,
) -> Result<DiscoverResult> {
    let mut schemata = Vec::new();
    for (schema, table) in known_tables {
        if !matches_filter(table, &opts.filter) {
            continue;
        }
        let columns = if opts.column_level {
            driver.get_columns(&format!("{schema}.{table}")).await?
        } else {
            Vec::new()
        };
        schemata.push(TableEntry { schema: schema.clone(), name: table.clone(), columns });
    }
    Ok(DiscoverResult { files: Vec::new(), schemata })
}

/// Enumerates files under `prefix` on a filesystem target. Rejects any
/// listed path containing `//` after the scheme (§4.5's invariant).
pub async fn discover_filesystem(
    driver: &dyn FilesystemDriver,
    prefix: &str,
    opts: &DiscoverOptions,
) -> Result<DiscoverResult> {
    let mut paths = driver.list(prefix).await?;
    for p in &paths {
        if let Some(after_scheme) = strip_scheme(p) {
            if after_scheme.contains("//") {
                return Err(EltError::Other(anyhow::anyhow!("path contains `//` after scheme: {p}")));
            }
        }
    }
    paths.retain(|p| matches_filter(p, &opts.filter));

    let mut schemata = Vec::new();
    if opts.column_level {
        for p in &paths {
            let hint: Vec<Column> = Vec::new();
            if let Ok(mut df) = driver.read_dataflow(p, &hint).await {
                df.fill_leading_buffers().await;
                schemata.push(TableEntry { schema: String::new(), name: p.clone(), columns: df.columns().to_vec() });
            }
        }
    }

    Ok(DiscoverResult { files: paths, schemata })
}

fn strip_scheme(path: &str) -> Option<&str> {
    path.find("://").map(|i| &path[i + 3..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_prefix_star() {
        assert!(glob_match("sling_test.*", "sling_test.t1k"));
        assert!(!glob_match("sling_test.*", "other.t1k"));
    }

    #[tokio::test]
    async fn discover_database_lists_requested_tables() {
        let driver = elt_drivers::MockDatabaseDriver::new();
        let tables = vec![("public".to_string(), "t1k".to_string())];
        let opts = DiscoverOptions::default();
        let result = discover_database(&driver, &tables, &opts).await.unwrap();
        assert_eq!(result.schemata.len(), 1);
        assert_eq!(result.schemata[0].name, "t1k");
    }
}
