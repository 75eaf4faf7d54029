//! Incremental Watermark Resolver (§4.4): resolves the source predicate for
//! upsert/incremental mode by reading `max(update_key)` from the target.

use elt_core::{Column, ColumnType, DatabaseDriver, EltError, Result};
use serde_json::Value as Json;

/// The resolved watermark: `None` means "full load" (target missing, or
/// empty), `Some(literal)` is a ready-to-splice SQL literal.
pub type Watermark = Option<String>;

/// Queries `final`'s current `update_key` high-water mark. Returns `None`
/// (full load) when the target doesn't exist yet or has no rows.
pub async fn resolve(
    driver: &dyn DatabaseDriver,
    finale: &str,
    update_key: &str,
) -> Result<Watermark> {
    if !driver.table_exists(finale).await? {
        return Ok(None);
    }

    let sql = format!(
        "select max({}) from {}",
        driver.quote_ident(update_key),
        driver.quote_ident(finale)
    );
    let batch = driver.query(&sql).await?;
    if batch.num_rows() == 0 {
        return Ok(None);
    }

    let columns = driver.get_columns(finale).await?;
    let col_type = columns
        .iter()
        .find(|c| c.normalized_name() == update_key.to_lowercase())
        .map(|c| c.col_type)
        .unwrap_or(ColumnType::Text);

    let rows = elt_core::batch_to_rows(&batch, &[Column::new(update_key, col_type, true)]);
    let Some(value) = rows.first().and_then(|r| r.first()) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }

    Ok(Some(format_literal(value, col_type, driver)?))
}

/// Formats `value` as a SQL literal by inferred type class (§4.4):
/// timestamp/datetime through the dialect's timestamp template, integer/
/// decimal as a naked literal, everything else single-quoted with embedded
/// quotes doubled. Rejects types with no safe literal rendering (binary).
fn format_literal(value: &Json, col_type: ColumnType, driver: &dyn DatabaseDriver) -> Result<String> {
    match col_type {
        ColumnType::Binary | ColumnType::Json => Err(EltError::UnrepresentableWatermark(col_type_name(col_type))),
        ColumnType::Timestamp | ColumnType::DateTime => {
            let text = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            match driver.template_lookup("timestamp_literal") {
                Some(tpl) => Ok(tpl.replace("{value}", &text)),
                None => Ok(format!("'{}'", text.replace('\'', "''"))),
            }
        }
        ColumnType::Integer | ColumnType::Decimal | ColumnType::Float => Ok(value.to_string()),
        ColumnType::Bool => Ok(if value.as_bool().unwrap_or(false) { "true".into() } else { "false".into() }),
        ColumnType::Text | ColumnType::Date => {
            let text = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            Ok(format!("'{}'", text.replace('\'', "''")))
        }
    }
}

fn col_type_name(t: ColumnType) -> String {
    format!("{t:?}").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use elt_core::Column as C;
    use elt_drivers::MockDatabaseDriver;

    #[tokio::test]
    async fn missing_target_is_full_load() {
        let driver = MockDatabaseDriver::new();
        let wm = resolve(&driver, "nope", "updated_at").await.unwrap();
        assert!(wm.is_none());
    }

    #[tokio::test]
    async fn existing_target_with_no_rows_is_full_load() {
        let driver = MockDatabaseDriver::new();
        let columns = vec![C::new("updated_at", ColumnType::Integer, true)];
        let empty_batch = elt_core::rows_to_batch(&columns, &[]).unwrap();
        driver.seed("t", columns, &empty_batch);
        let wm = resolve(&driver, "t", "updated_at").await.unwrap();
        assert!(wm.is_none());
    }

    #[tokio::test]
    async fn integer_watermark_is_naked_literal() {
        let driver = MockDatabaseDriver::new();
        let columns = vec![C::new("updated_at", ColumnType::Integer, true)];
        let rows = vec![vec![Json::from(5)], vec![Json::from(42)]];
        let batch = elt_core::rows_to_batch(&columns, &rows).unwrap();
        driver.seed("t", columns, &batch);
        let wm = resolve(&driver, "t", "updated_at").await.unwrap();
        assert_eq!(wm.unwrap(), "42");
    }
}
