//! `DuckDB` backend.
//!
//! All state lives in one `DuckDB` file with three tables:
//! `dataset_registry`, `fetch_runs`, and `indicators`. Timestamps are stored
//! as naive UTC `TIMESTAMP`s and read back through a `::TEXT` cast.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{Connection, params, params_from_iter};
use govdata_database_models::{
    DatasetRegistryEntry, FetchRun, FetchRunCompletion, FetchRunStatus, IndicatorQuery,
};
use govdata_indicator_models::{Category, Geography, Indicator, PeriodType};

use crate::{DbError, IndicatorStore, check_indicator_ownership, finalize_run};

/// Number of rows per INSERT chunk.
const CHUNK_SIZE: usize = 1_000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const FETCH_RUN_COLUMNS: &str = "id, dataset_id, status, started_at::TEXT, completed_at::TEXT, \
     records_fetched, error_message";

/// Indicator store backed by a `DuckDB` database.
pub struct DuckDbStore {
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for DuckDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbStore").finish_non_exhaustive()
    }
}

impl DuckDbStore {
    /// Opens (or creates) the store at `path` and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the directory, connection, or schema cannot be
    /// created.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }
        log::info!("Opening indicator store at {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a throwaway in-memory `DuckDB` database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema cannot be created.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_mut().ok_or(DbError::Closed)?;
        f(conn)
    }
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS dataset_registry (
            id TEXT NOT NULL PRIMARY KEY,
            name TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            category TEXT NOT NULL,
            refresh_interval_minutes BIGINT NOT NULL,
            normalization TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            last_fetched_at TIMESTAMP,
            updated_at TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fetch_runs (
            id TEXT NOT NULL PRIMARY KEY,
            dataset_id TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TIMESTAMP NOT NULL,
            completed_at TIMESTAMP,
            records_fetched BIGINT NOT NULL DEFAULT 0,
            error_message TEXT
        );

        CREATE TABLE IF NOT EXISTS indicators (
            indicator_name TEXT NOT NULL,
            value DOUBLE NOT NULL,
            unit TEXT NOT NULL,
            geography TEXT NOT NULL,
            geography_name TEXT NOT NULL,
            period TEXT NOT NULL,
            period_type TEXT NOT NULL,
            source_dataset TEXT NOT NULL,
            category TEXT NOT NULL,
            metadata TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_indicators_source_dataset
            ON indicators (source_dataset);",
    )?;
    Ok(())
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a `DuckDB` timestamp text representation into a UTC `DateTime`.
///
/// The `::TEXT` cast drops the fractional part when it is zero, so both
/// forms are accepted.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DbError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|e| DbError::Conversion {
            message: format!("invalid timestamp {s:?}: {e}"),
        })
}

fn parse_optional_timestamp(s: Option<&str>) -> Result<Option<DateTime<Utc>>, DbError> {
    s.map(parse_timestamp).transpose()
}

fn parse_enum<T: std::str::FromStr>(column: &str, s: &str) -> Result<T, DbError> {
    T::from_str(s).map_err(|_| DbError::Conversion {
        message: format!("invalid {column} {s:?}"),
    })
}

fn to_i64(value: u64, column: &str) -> Result<i64, DbError> {
    i64::try_from(value).map_err(|_| DbError::Conversion {
        message: format!("{column} {value} out of range"),
    })
}

fn to_u64(value: i64, column: &str) -> Result<u64, DbError> {
    u64::try_from(value).map_err(|_| DbError::Conversion {
        message: format!("{column} {value} is negative"),
    })
}

/// Maps `QueryReturnedNoRows` to `None`.
fn optional<T>(result: duckdb::Result<T>) -> Result<Option<T>, DbError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::Database(e)),
    }
}

fn dataset_exists(conn: &Connection, id: &str) -> Result<bool, DbError> {
    let found = optional(conn.query_row(
        "SELECT 1 FROM dataset_registry WHERE id = ?",
        [id],
        |row| row.get::<_, i32>(0),
    ))?;
    Ok(found.is_some())
}

/// Raw `fetch_runs` row before enum and timestamp conversion.
struct FetchRunRow {
    id: String,
    dataset_id: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    records_fetched: i64,
    error_message: Option<String>,
}

impl FetchRunRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            dataset_id: row.get(1)?,
            status: row.get(2)?,
            started_at: row.get(3)?,
            completed_at: row.get(4)?,
            records_fetched: row.get(5)?,
            error_message: row.get(6)?,
        })
    }

    fn into_run(self) -> Result<FetchRun, DbError> {
        Ok(FetchRun {
            status: parse_enum::<FetchRunStatus>("status", &self.status)?,
            started_at: parse_timestamp(&self.started_at)?,
            completed_at: parse_optional_timestamp(self.completed_at.as_deref())?,
            records_fetched: to_u64(self.records_fetched, "records_fetched")?,
            id: self.id,
            dataset_id: self.dataset_id,
            error_message: self.error_message,
        })
    }
}

fn load_fetch_run(conn: &Connection, id: &str) -> Result<Option<FetchRun>, DbError> {
    optional(conn.query_row(
        &format!("SELECT {FETCH_RUN_COLUMNS} FROM fetch_runs WHERE id = ?"),
        [id],
        FetchRunRow::from_row,
    ))?
    .map(FetchRunRow::into_run)
    .transpose()
}

/// Raw `indicators` row before enum and metadata conversion.
struct IndicatorRow {
    indicator_name: String,
    value: f64,
    unit: String,
    geography: String,
    geography_name: String,
    period: String,
    period_type: String,
    source_dataset: String,
    category: String,
    metadata: Option<String>,
}

impl IndicatorRow {
    fn into_indicator(self) -> Result<Indicator, DbError> {
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| DbError::Conversion {
                message: format!("invalid indicator metadata: {e}"),
            })?;

        Ok(Indicator {
            geography: parse_enum::<Geography>("geography", &self.geography)?,
            period_type: parse_enum::<PeriodType>("period_type", &self.period_type)?,
            category: parse_enum::<Category>("category", &self.category)?,
            indicator_name: self.indicator_name,
            value: self.value,
            unit: self.unit,
            geography_name: self.geography_name,
            period: self.period,
            source_dataset: self.source_dataset,
            metadata,
        })
    }
}

fn insert_indicators(conn: &Connection, indicators: &[Indicator]) -> Result<u64, DbError> {
    let mut total_inserted = 0u64;

    for chunk in indicators.chunks(CHUNK_SIZE) {
        let mut sql = String::from(
            "INSERT INTO indicators (
                indicator_name, value, unit, geography, geography_name,
                period, period_type, source_dataset, category, metadata
            ) VALUES ",
        );
        for i in 0..chunk.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str("(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)");
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut param_idx = 1usize;

        for indicator in chunk {
            let metadata = indicator
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| DbError::Conversion {
                    message: format!("unserializable indicator metadata: {e}"),
                })?;

            stmt.raw_bind_parameter(param_idx, &indicator.indicator_name)?;
            stmt.raw_bind_parameter(param_idx + 1, indicator.value)?;
            stmt.raw_bind_parameter(param_idx + 2, &indicator.unit)?;
            stmt.raw_bind_parameter(param_idx + 3, indicator.geography.as_ref())?;
            stmt.raw_bind_parameter(param_idx + 4, &indicator.geography_name)?;
            stmt.raw_bind_parameter(param_idx + 5, &indicator.period)?;
            stmt.raw_bind_parameter(param_idx + 6, indicator.period_type.as_ref())?;
            stmt.raw_bind_parameter(param_idx + 7, &indicator.source_dataset)?;
            stmt.raw_bind_parameter(param_idx + 8, indicator.category.as_ref())?;
            stmt.raw_bind_parameter(param_idx + 9, metadata.as_deref())?;

            param_idx += 10;
        }

        let rows = stmt.raw_execute()?;
        total_inserted += u64::try_from(rows).unwrap_or(0);
    }

    Ok(total_inserted)
}

#[async_trait]
impl IndicatorStore for DuckDbStore {
    async fn upsert_registry_entry(&self, entry: &DatasetRegistryEntry) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO dataset_registry (
                    id, name, resource_id, category, refresh_interval_minutes,
                    normalization, description, is_active, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    resource_id = EXCLUDED.resource_id,
                    category = EXCLUDED.category,
                    refresh_interval_minutes = EXCLUDED.refresh_interval_minutes,
                    normalization = EXCLUDED.normalization,
                    description = EXCLUDED.description,
                    is_active = EXCLUDED.is_active,
                    updated_at = EXCLUDED.updated_at",
                params![
                    entry.id,
                    entry.name,
                    entry.resource_id,
                    entry.category.as_ref(),
                    i64::from(entry.refresh_interval_minutes),
                    entry.normalization,
                    entry.description,
                    entry.is_active,
                    format_timestamp(entry.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    async fn registry_entries(&self) -> Result<Vec<DatasetRegistryEntry>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, resource_id, category, refresh_interval_minutes,
                        normalization, description, is_active,
                        last_fetched_at::TEXT, updated_at::TEXT
                 FROM dataset_registry
                 ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, bool>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (
                    id,
                    name,
                    resource_id,
                    category,
                    interval,
                    normalization,
                    description,
                    is_active,
                    last_fetched_at,
                    updated_at,
                ) = row?;

                entries.push(DatasetRegistryEntry {
                    category: parse_enum::<Category>("category", &category)?,
                    refresh_interval_minutes: u32::try_from(interval).map_err(|_| {
                        DbError::Conversion {
                            message: format!("refresh_interval_minutes {interval} out of range"),
                        }
                    })?,
                    last_fetched_at: parse_optional_timestamp(last_fetched_at.as_deref())?,
                    updated_at: parse_timestamp(&updated_at)?,
                    id,
                    name,
                    resource_id,
                    normalization,
                    description,
                    is_active,
                });
            }
            Ok(entries)
        })
    }

    async fn mark_fetched(&self, dataset_id: &str, at: DateTime<Utc>) -> Result<(), DbError> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE dataset_registry SET last_fetched_at = ? WHERE id = ?",
                params![format_timestamp(at), dataset_id],
            )?;
            if updated == 0 {
                return Err(DbError::UnknownDataset {
                    id: dataset_id.to_string(),
                });
            }
            Ok(())
        })
    }

    async fn create_fetch_run(
        &self,
        dataset_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<FetchRun, DbError> {
        self.with_conn(|conn| {
            if !dataset_exists(conn, dataset_id)? {
                return Err(DbError::UnknownDataset {
                    id: dataset_id.to_string(),
                });
            }

            let run = FetchRun {
                id: uuid::Uuid::new_v4().to_string(),
                dataset_id: dataset_id.to_string(),
                status: FetchRunStatus::Running,
                started_at,
                completed_at: None,
                records_fetched: 0,
                error_message: None,
            };
            conn.execute(
                "INSERT INTO fetch_runs (id, dataset_id, status, started_at, records_fetched)
                 VALUES (?, ?, ?, ?, 0)",
                params![
                    run.id,
                    run.dataset_id,
                    run.status.as_ref(),
                    format_timestamp(run.started_at),
                ],
            )?;
            Ok(run)
        })
    }

    async fn finish_fetch_run(
        &self,
        run_id: &str,
        completion: &FetchRunCompletion,
    ) -> Result<FetchRun, DbError> {
        self.with_conn(|conn| {
            let run = load_fetch_run(conn, run_id)?.ok_or_else(|| DbError::FetchRunNotFound {
                id: run_id.to_string(),
            })?;
            let finished = finalize_run(&run, completion)?;

            conn.execute(
                "UPDATE fetch_runs
                 SET status = ?, completed_at = ?, records_fetched = ?, error_message = ?
                 WHERE id = ?",
                params![
                    finished.status.as_ref(),
                    finished.completed_at.map(format_timestamp),
                    to_i64(finished.records_fetched, "records_fetched")?,
                    finished.error_message,
                    finished.id,
                ],
            )?;
            Ok(finished)
        })
    }

    async fn fetch_runs(&self, dataset_id: &str, limit: u32) -> Result<Vec<FetchRun>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FETCH_RUN_COLUMNS} FROM fetch_runs
                 WHERE dataset_id = ?
                 ORDER BY started_at DESC
                 LIMIT ?"
            ))?;
            let rows = stmt.query_map(params![dataset_id, i64::from(limit)], FetchRunRow::from_row)?;

            let mut runs = Vec::new();
            for row in rows {
                runs.push(row?.into_run()?);
            }
            Ok(runs)
        })
    }

    async fn replace_indicators(
        &self,
        dataset_id: &str,
        indicators: &[Indicator],
    ) -> Result<u64, DbError> {
        check_indicator_ownership(dataset_id, indicators)?;

        self.with_conn(|conn| {
            if !dataset_exists(conn, dataset_id)? {
                return Err(DbError::UnknownDataset {
                    id: dataset_id.to_string(),
                });
            }

            let tx = conn.transaction()?;
            let deleted = tx.execute(
                "DELETE FROM indicators WHERE source_dataset = ?",
                [dataset_id],
            )?;
            let inserted = insert_indicators(&tx, indicators)?;
            tx.commit()?;

            log::debug!("Replaced indicators for {dataset_id}: {deleted} deleted, {inserted} inserted");
            Ok(inserted)
        })
    }

    async fn query_indicators(&self, query: &IndicatorQuery) -> Result<Vec<Indicator>, DbError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(category) = query.category {
            clauses.push("category = ?");
            values.push(category.to_string());
        }
        if let Some(geography) = query.geography {
            clauses.push("geography = ?");
            values.push(geography.to_string());
        }
        if let Some(name) = &query.geography_name {
            clauses.push("geography_name = ?");
            values.push(name.clone());
        }
        if let Some(period) = &query.period {
            clauses.push("period = ?");
            values.push(period.clone());
        }
        if let Some(dataset) = &query.source_dataset {
            clauses.push("source_dataset = ?");
            values.push(dataset.clone());
        }
        if let Some(name) = &query.indicator_name {
            clauses.push("indicator_name = ?");
            values.push(name.clone());
        }

        let mut sql = String::from(
            "SELECT indicator_name, value, unit, geography, geography_name,
                    period, period_type, source_dataset, category, metadata
             FROM indicators",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY source_dataset, indicator_name, geography_name, period");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                Ok(IndicatorRow {
                    indicator_name: row.get(0)?,
                    value: row.get(1)?,
                    unit: row.get(2)?,
                    geography: row.get(3)?,
                    geography_name: row.get(4)?,
                    period: row.get(5)?,
                    period_type: row.get(6)?,
                    source_dataset: row.get(7)?,
                    category: row.get(8)?,
                    metadata: row.get(9)?,
                })
            })?;

            let mut indicators = Vec::new();
            for row in rows {
                indicators.push(row?.into_indicator()?);
            }
            Ok(indicators)
        })
    }

    async fn close(&self) -> Result<(), DbError> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| DbError::Database(e))?;
            log::info!("Indicator store closed");
        }
        Ok(())
    }
}
