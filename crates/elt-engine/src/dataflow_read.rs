//! Dataflow Read Path (§4.2): `ReadFromDB` and `ReadFromFile`.

use crate::types::infer_columns;
use crate::watermark;
use elt_core::{Column, DatabaseDriver, Dataflow, EltError, FilesystemDriver, Mode, Result, Task};

const UPSERT_PLACEHOLDER: &str = "{upsert_where_cond}";

/// True when `stream` has no whitespace, i.e. it's a bare `schema.table`
/// identifier rather than raw SQL (§4.2 step 1).
fn is_identifier(stream: &str) -> bool {
    !stream.trim().is_empty() && !stream.trim().chars().any(char::is_whitespace)
}

/// §4.2 step 2: if `stream` names a `.sql` file that exists, its contents
/// replace the stream text. Falls back to the original stream (preserving
/// the identifier path) if the file can't be read.
fn resolve_sql_file(stream: &str) -> String {
    if stream.ends_with(".sql") {
        if let Ok(text) = std::fs::read_to_string(stream) {
            return text;
        }
    }
    stream.to_string()
}

/// Reads rows from a database source per §4.2's `ReadFromDB` steps.
pub async fn read_from_db(
    driver: &dyn DatabaseDriver,
    target_driver: Option<&dyn DatabaseDriver>,
    task: &Task,
) -> Result<Dataflow> {
    let raw_stream = resolve_sql_file(&task.config.source.stream);
    let identifier_mode = is_identifier(&raw_stream);
    let mode = task.config.mode;

    if !identifier_mode && mode == Mode::Upsert && !raw_stream.contains(UPSERT_PLACEHOLDER) {
        return Err(EltError::MissingUpsertPlaceholder);
    }

    // §4.2 step 4: discover source columns. For an identifier stream this
    // is exactly what `get_columns` exists for; for raw SQL we run a
    // zero-row shape probe (placeholder substituted with `1=0`, or a
    // trailing `where 1=0` when there's no placeholder to substitute).
    let mut source_columns: Vec<Column> = if identifier_mode {
        driver.get_columns(&raw_stream).await?
    } else {
        let probe_sql = if raw_stream.contains(UPSERT_PLACEHOLDER) {
            raw_stream.replace(UPSERT_PLACEHOLDER, "1=0")
        } else {
            format!("select * from ({raw_stream}) probe_src where 1=0")
        };
        let batch = driver.query(&probe_sql).await?;
        batch.schema().fields().iter().map(|f| Column::from_arrow_field(f)).collect()
    };

    // §4.2 step 3: intersect with existing target columns when the target
    // already exists and mode != drop.
    let finale = &task.config.target.object;
    if mode != Mode::Drop {
        if let Some(tgt_driver) = target_driver {
            if tgt_driver.table_exists(finale).await? {
                let target_columns = tgt_driver.get_columns(finale).await?;
                let common: Vec<Column> = crate::planner::intersect_or_fail(&source_columns, &target_columns)?
                    .into_iter()
                    .cloned()
                    .collect();
                source_columns = common;
            }
        }
    }

    let fields_clause = source_columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>().join(", ");

    let mut sql = if identifier_mode {
        format!("select {fields_clause} from {raw_stream}")
    } else {
        raw_stream.replace(UPSERT_PLACEHOLDER, "1=1")
    };

    if mode == Mode::Upsert {
        let update_key = task
            .config
            .source
            .update_key
            .as_deref()
            .or(task.config.target.update_key.as_deref())
            .ok_or_else(|| EltError::InvalidConfig("upsert mode requires an update_key".into()))?;
        let predicate = match watermark::resolve(target_driver.unwrap_or(driver), finale, update_key).await? {
            Some(literal) => format!("{} >= {}", driver.quote_ident(update_key), literal),
            None => "1=1".to_string(),
        };
        sql = if identifier_mode {
            format!("{sql} where {predicate}")
        } else if raw_stream.contains(UPSERT_PLACEHOLDER) {
            raw_stream.replace(UPSERT_PLACEHOLDER, &predicate)
        } else {
            sql
        };
    } else if let Some(limit) = task.config.source.limit.filter(|l| *l > 0) {
        if let Some(tpl) = driver.template_lookup("limit") {
            sql = format!("{sql} {}", tpl.replace("{limit}", &limit.to_string()));
        }
    }

    let mut dataflow = driver.bulk_export_flow(&sql, &source_columns).await?;
    dataflow.set_cancel(task.cancel.clone());
    Ok(dataflow)
}

/// Reads rows from a filesystem source per §4.2's `ReadFromFile`. Standard
/// input is out of scope for this driver surface (no scheme to key a
/// `FilesystemDriver` registration on); an unset `Source.Stream` fails with
/// `InvalidConfig` rather than silently reading nothing.
pub async fn read_from_file(driver: &dyn FilesystemDriver, task: &Task) -> Result<Dataflow> {
    let url = &task.config.source.stream;
    if url.trim().is_empty() {
        return Err(EltError::InvalidConfig(
            "source.stream must name a file/prefix URL (stdin sources are not supported by this driver surface)"
                .into(),
        ));
    }

    let declared = &task.config.source.columns;
    let mut dataflow = driver.read_dataflow(url, declared).await?;
    dataflow.set_cancel(task.cancel.clone());
    if dataflow.columns().is_empty() {
        dataflow.fill_leading_buffers().await;
        let buffer: Vec<elt_core::Batch> =
            dataflow.streams_mut().iter().flat_map(|s| s.leading_buffer().to_vec()).collect();
        let inferred = infer_columns(&buffer)?;
        dataflow.set_columns(inferred);
    }
    Ok(dataflow)
}
