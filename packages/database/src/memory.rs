//! In-memory backend for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use govdata_database_models::{
    DatasetRegistryEntry, FetchRun, FetchRunCompletion, FetchRunStatus, IndicatorQuery,
};
use govdata_indicator_models::Indicator;

use crate::{DbError, IndicatorStore, check_indicator_ownership, finalize_run};

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, DatasetRegistryEntry>,
    runs: Vec<FetchRun>,
    indicators: Vec<Indicator>,
    closed: bool,
}

/// Indicator store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> Result<T, DbError>) -> Result<T, DbError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(DbError::Closed);
        }
        f(&mut state)
    }
}

fn matches(indicator: &Indicator, query: &IndicatorQuery) -> bool {
    query.category.is_none_or(|c| indicator.category == c)
        && query.geography.is_none_or(|g| indicator.geography == g)
        && query
            .geography_name
            .as_ref()
            .is_none_or(|n| &indicator.geography_name == n)
        && query.period.as_ref().is_none_or(|p| &indicator.period == p)
        && query
            .source_dataset
            .as_ref()
            .is_none_or(|d| &indicator.source_dataset == d)
        && query
            .indicator_name
            .as_ref()
            .is_none_or(|n| &indicator.indicator_name == n)
}

#[async_trait]
impl IndicatorStore for MemoryStore {
    async fn upsert_registry_entry(&self, entry: &DatasetRegistryEntry) -> Result<(), DbError> {
        self.with_state(|state| {
            let last_fetched_at = state
                .entries
                .get(&entry.id)
                .and_then(|existing| existing.last_fetched_at);
            state.entries.insert(
                entry.id.clone(),
                DatasetRegistryEntry {
                    last_fetched_at,
                    ..entry.clone()
                },
            );
            Ok(())
        })
    }

    async fn registry_entries(&self) -> Result<Vec<DatasetRegistryEntry>, DbError> {
        self.with_state(|state| Ok(state.entries.values().cloned().collect()))
    }

    async fn mark_fetched(&self, dataset_id: &str, at: DateTime<Utc>) -> Result<(), DbError> {
        self.with_state(|state| {
            let entry = state
                .entries
                .get_mut(dataset_id)
                .ok_or_else(|| DbError::UnknownDataset {
                    id: dataset_id.to_string(),
                })?;
            entry.last_fetched_at = Some(at);
            Ok(())
        })
    }

    async fn create_fetch_run(
        &self,
        dataset_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<FetchRun, DbError> {
        self.with_state(|state| {
            if !state.entries.contains_key(dataset_id) {
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
            state.runs.push(run.clone());
            Ok(run)
        })
    }

    async fn finish_fetch_run(
        &self,
        run_id: &str,
        completion: &FetchRunCompletion,
    ) -> Result<FetchRun, DbError> {
        self.with_state(|state| {
            let run = state
                .runs
                .iter_mut()
                .find(|r| r.id == run_id)
                .ok_or_else(|| DbError::FetchRunNotFound {
                    id: run_id.to_string(),
                })?;
            let finished = finalize_run(run, completion)?;
            *run = finished.clone();
            Ok(finished)
        })
    }

    async fn fetch_runs(&self, dataset_id: &str, limit: u32) -> Result<Vec<FetchRun>, DbError> {
        self.with_state(|state| {
            let mut runs: Vec<FetchRun> = state
                .runs
                .iter()
                .filter(|r| r.dataset_id == dataset_id)
                .cloned()
                .collect();
            runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            runs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(runs)
        })
    }

    async fn replace_indicators(
        &self,
        dataset_id: &str,
        indicators: &[Indicator],
    ) -> Result<u64, DbError> {
        check_indicator_ownership(dataset_id, indicators)?;

        self.with_state(|state| {
            if !state.entries.contains_key(dataset_id) {
                return Err(DbError::UnknownDataset {
                    id: dataset_id.to_string(),
                });
            }
            state.indicators.retain(|i| i.source_dataset != dataset_id);
            state.indicators.extend_from_slice(indicators);
            Ok(u64::try_from(indicators.len()).unwrap_or(u64::MAX))
        })
    }

    async fn query_indicators(&self, query: &IndicatorQuery) -> Result<Vec<Indicator>, DbError> {
        self.with_state(|state| {
            let mut found: Vec<Indicator> = state
                .indicators
                .iter()
                .filter(|i| matches(i, query))
                .cloned()
                .collect();
            found.sort_by(|a, b| {
                (&a.source_dataset, &a.indicator_name, &a.geography_name, &a.period).cmp(&(
                    &b.source_dataset,
                    &b.indicator_name,
                    &b.geography_name,
                    &b.period,
                ))
            });
            if let Some(limit) = query.limit {
                found.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            }
            Ok(found)
        })
    }

    async fn close(&self) -> Result<(), DbError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        Ok(())
    }
}
