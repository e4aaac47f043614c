#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Indicator store.
//!
//! [`IndicatorStore`] is the persistence seam of the pipeline: registry
//! state, the append-only fetch-run audit log, and the normalized indicator
//! table. Two backends are provided: [`DuckDbStore`] (a single `DuckDB` file,
//! default `data/govdata.duckdb`) and [`MemoryStore`] for tests and dry runs.

pub mod duck;
pub mod memory;
pub mod paths;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use govdata_database_models::{
    DatasetRegistryEntry, FetchRun, FetchRunCompletion, FetchRunStatus, IndicatorQuery,
};
use govdata_indicator_models::Indicator;

pub use duck::DuckDbStore;
pub use memory::MemoryStore;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    Database(#[from] duckdb::Error),

    /// I/O error (e.g. creating the data directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// No registry entry exists for the dataset.
    #[error("Unknown dataset: {id}")]
    UnknownDataset {
        /// Dataset id.
        id: String,
    },

    /// No fetch run exists with the id.
    #[error("Fetch run not found: {id}")]
    FetchRunNotFound {
        /// Run id.
        id: String,
    },

    /// The fetch run was already finalized.
    #[error("Fetch run {id} is already finalized ({status})")]
    FetchRunFinalized {
        /// Run id.
        id: String,
        /// Status it was finalized with.
        status: FetchRunStatus,
    },

    /// The store has been closed.
    #[error("Store is closed")]
    Closed,
}

/// Persistence operations the pipeline needs.
#[async_trait]
pub trait IndicatorStore: Send + Sync {
    /// Inserts or updates a registry entry, keyed by id.
    ///
    /// Never changes the stored `last_fetched_at`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the write fails.
    async fn upsert_registry_entry(&self, entry: &DatasetRegistryEntry) -> Result<(), DbError>;

    /// Returns every registry entry, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read fails.
    async fn registry_entries(&self) -> Result<Vec<DatasetRegistryEntry>, DbError>;

    /// Records a definitive success for a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UnknownDataset`] if no entry exists.
    async fn mark_fetched(&self, dataset_id: &str, at: DateTime<Utc>) -> Result<(), DbError>;

    /// Creates a `running` fetch run for a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UnknownDataset`] if no entry exists.
    async fn create_fetch_run(
        &self,
        dataset_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<FetchRun, DbError>;

    /// Finalizes a fetch run. A run can be finalized once.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::FetchRunNotFound`] for an unknown id and
    /// [`DbError::FetchRunFinalized`] if the run is no longer running.
    async fn finish_fetch_run(
        &self,
        run_id: &str,
        completion: &FetchRunCompletion,
    ) -> Result<FetchRun, DbError>;

    /// Returns the most recent fetch runs of a dataset, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read fails.
    async fn fetch_runs(&self, dataset_id: &str, limit: u32) -> Result<Vec<FetchRun>, DbError>;

    /// Replaces every indicator of a dataset with `indicators`, atomically.
    ///
    /// Returns the number of rows inserted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UnknownDataset`] if no entry exists and
    /// [`DbError::Conversion`] if an indicator belongs to another dataset.
    /// On error the previous indicator set is left in place.
    async fn replace_indicators(
        &self,
        dataset_id: &str,
        indicators: &[Indicator],
    ) -> Result<u64, DbError>;

    /// Reads indicators matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read fails.
    async fn query_indicators(&self, query: &IndicatorQuery) -> Result<Vec<Indicator>, DbError>;

    /// Releases the underlying connection. Later calls fail with
    /// [`DbError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection fails to close cleanly.
    async fn close(&self) -> Result<(), DbError>;
}

/// Checks that `indicators` all belong to `dataset_id`.
fn check_indicator_ownership(dataset_id: &str, indicators: &[Indicator]) -> Result<(), DbError> {
    if let Some(stray) = indicators.iter().find(|i| i.source_dataset != dataset_id) {
        return Err(DbError::Conversion {
            message: format!(
                "indicator {:?} belongs to {:?}, not {dataset_id:?}",
                stray.indicator_name, stray.source_dataset
            ),
        });
    }
    Ok(())
}

/// Applies `completion` to a running `run`.
///
/// The completion time is clamped so it never precedes `started_at`.
fn finalize_run(run: &FetchRun, completion: &FetchRunCompletion) -> Result<FetchRun, DbError> {
    if run.status.is_final() {
        return Err(DbError::FetchRunFinalized {
            id: run.id.clone(),
            status: run.status,
        });
    }
    if !completion.status.is_final() {
        return Err(DbError::Conversion {
            message: format!("cannot finalize run {} as {}", run.id, completion.status),
        });
    }

    Ok(FetchRun {
        status: completion.status,
        completed_at: Some(completion.completed_at.max(run.started_at)),
        records_fetched: completion.records_fetched,
        error_message: completion.error_message.clone(),
        ..run.clone()
    })
}
