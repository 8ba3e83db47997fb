//! Station metadata read from a relational table.

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::debug;

use crate::error::{ProcessingError, Result};
use crate::models::StationMetadataRow;

use super::station_reader::MetadataStore;

/// Ids bound per statement; keeps well under driver placeholder limits.
const IDS_PER_QUERY: usize = 500;

/// Metadata store over any SQL database sqlx can reach through its `Any` driver
/// (`mysql://` or `sqlite:` URLs). The table holds one row per station with
/// `gh_id`, `X`, `Y` and `elevation` columns.
pub struct SqlMetadataStore {
    pool: AnyPool,
    table: String,
}

impl SqlMetadataStore {
    /// Build the pool without connecting; the first fetch opens the connection.
    pub fn connect_lazy(database_url: &str, table: &str, max_connections: u32) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)?;
        Self::from_pool(pool, table)
    }

    pub fn from_pool(pool: AnyPool, table: &str) -> Result<Self> {
        check_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    fn select_sql(&self, id_count: usize) -> String {
        let placeholders = vec!["?"; id_count].join(", ");
        format!(
            "SELECT gh_id AS station_id, X AS lon, Y AS lat, elevation AS elev FROM {} WHERE gh_id IN ({})",
            self.table, placeholders
        )
    }
}

/// Table names are spliced into SQL, so only `[A-Za-z0-9_]` segments joined by
/// dots (`schema.table`) are accepted.
pub fn check_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table.split('.').all(|segment| {
            !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(ProcessingError::InvalidConfig(format!("Invalid metadata table name: '{}'", table)))
    }
}

/// Column value as text, whatever numeric type the database stored it as.
fn text_column(row: &AnyRow, name: &str) -> Result<Option<String>> {
    if let Ok(value) = row.try_get::<Option<String>, _>(name) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(name) {
        return Ok(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<f32>, _>(name) {
        return Ok(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(name) {
        return Ok(value.map(|v| v.to_string()));
    }
    let value = row.try_get::<Option<i32>, _>(name)?;
    Ok(value.map(|v| v.to_string()))
}

fn metadata_row(row: &AnyRow) -> Result<Option<StationMetadataRow>> {
    let Some(station_id) = text_column(row, "station_id")? else {
        return Ok(None);
    };
    Ok(Some(StationMetadataRow {
        station_id,
        lon: text_column(row, "lon")?,
        lat: text_column(row, "lat")?,
        elevation: text_column(row, "elev")?,
    }))
}

#[async_trait]
impl MetadataStore for SqlMetadataStore {
    async fn bulk_fetch(&self, ids: &[String]) -> Result<Vec<StationMetadataRow>> {
        let mut rows = Vec::new();

        for chunk in ids.chunks(IDS_PER_QUERY) {
            let sql = self.select_sql(chunk.len());
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.clone());
            }

            for row in query.fetch_all(&self.pool).await? {
                if let Some(parsed) = metadata_row(&row)? {
                    rows.push(parsed);
                }
            }
        }

        debug!(table = %self.table, requested = ids.len(), returned = rows.len(), "Fetched station metadata");
        Ok(rows)
    }
}
