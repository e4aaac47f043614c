#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Scheduled ingestion of data.gov.in datasets into the indicator store.
//!
//! [`engine::FetchEngine`] fetches, normalizes and stores datasets;
//! [`worker`] re-runs it on the refresh interval. Everything is constructed
//! explicitly; [`build_engine`] wires up the production pieces.

pub mod clock;
pub mod engine;
pub mod retry;
pub mod worker;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use govdata_client::DataGovClient;
use govdata_database::{DbError, DuckDbStore, paths};
use govdata_database_models::DatasetRegistryEntry;
use govdata_dataset::{DatasetDescriptor, DatasetRegistry};
use govdata_ingest_models::PipelineConfig;

use crate::clock::SystemClock;
use crate::engine::FetchEngine;

/// Maps dataset id to its last successful fetch, for the entries that
/// have one.
#[must_use]
pub fn last_fetch_times(entries: &[DatasetRegistryEntry]) -> BTreeMap<String, DateTime<Utc>> {
    entries
        .iter()
        .filter_map(|entry| entry.last_fetched_at.map(|at| (entry.id.clone(), at)))
        .collect()
}

/// Returns the active registry datasets due at `now`, given the stored
/// registry entries.
#[must_use]
pub fn due_datasets<'a>(
    registry: &'a DatasetRegistry,
    entries: &[DatasetRegistryEntry],
    now: DateTime<Utc>,
) -> Vec<&'a DatasetDescriptor> {
    registry.datasets_due_for_refresh(&last_fetch_times(entries), now)
}

/// Opens the `DuckDB` store at the configured path, or at
/// [`paths::default_db_path`] when none is configured.
///
/// # Errors
///
/// Returns [`DbError`] if the database cannot be opened.
pub fn open_store(config: &PipelineConfig) -> Result<DuckDbStore, DbError> {
    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(paths::default_db_path);
    DuckDbStore::open(&db_path)
}

/// Builds an engine backed by the HTTP client, the `DuckDB` store, and the
/// system clock, as described by `config`.
///
/// # Errors
///
/// Returns an error if the registry fails to load, the HTTP client cannot
/// be built, or the database cannot be opened.
pub fn build_engine(config: &PipelineConfig) -> Result<FetchEngine, Box<dyn std::error::Error>> {
    let registry = Arc::new(DatasetRegistry::load(config.registry_dir.as_deref())?);
    log::info!(
        "Loaded {} dataset(s) from the registry",
        registry.all_datasets().len()
    );

    let client = DataGovClient::new(&config.api_url, &config.api_key, config.timeout)?;

    let store = open_store(config)?;

    Ok(FetchEngine::new(
        registry,
        Arc::new(client),
        Arc::new(store),
        Arc::new(SystemClock),
        config.clone(),
    ))
}
