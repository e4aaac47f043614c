//! Fetch orchestrator.
//!
//! [`FetchEngine`] runs the per-dataset pipeline: registry upsert, fetch-run
//! audit row, paginated fetch with retries, normalization, replace-store,
//! and scheduling bookkeeping. Every call to [`FetchEngine::fetch_dataset`]
//! yields a [`FetchResult`]; failures never escape as errors.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use govdata_client::{ClientError, PageFetcher, PageOptions};
use govdata_database::{DbError, IndicatorStore};
use govdata_database_models::{DatasetRegistryEntry, FetchRun, FetchRunCompletion};
use govdata_dataset::{DatasetDescriptor, DatasetRegistry};
use govdata_ingest_models::progress::ProgressCallback;
use govdata_ingest_models::{CycleSummary, FetchResult, PipelineConfig};
use govdata_normalize::{NormalizationStrategy, normalize};

use crate::clock::Clock;
use crate::retry;

/// Errors raised inside the per-dataset pipeline.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The id is not in the dataset registry.
    #[error("Dataset {id} not found in registry")]
    UnknownDataset {
        /// Requested dataset id.
        id: String,
    },

    /// Upstream fetch failed after all retries.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The store rejected a read or write.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

/// Counts produced by a successful pipeline run.
struct Fetched {
    records: u64,
    indicators: u64,
}

/// Orchestrates fetching, normalizing and storing registry datasets.
pub struct FetchEngine {
    registry: Arc<DatasetRegistry>,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn IndicatorStore>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    progress: Option<Arc<dyn ProgressCallback>>,
    /// Id of the fetch run currently between creation and finalization.
    in_flight: Mutex<Option<String>>,
}

impl FetchEngine {
    /// Creates an engine over explicitly constructed collaborators.
    ///
    /// Nothing is opened or fetched until a fetch method is called.
    #[must_use]
    pub fn new(
        registry: Arc<DatasetRegistry>,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn IndicatorStore>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            fetcher,
            store,
            clock,
            config,
            progress: None,
            in_flight: Mutex::new(None),
        }
    }

    /// Reports per-dataset progress of batch operations to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn set_in_flight(&self, run_id: Option<String>) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = run_id;
    }

    fn elapsed_since(&self, start: DateTime<Utc>) -> Duration {
        (self.clock.now() - start).to_std().unwrap_or_default()
    }

    /// Fetches, normalizes and stores one dataset.
    ///
    /// On failure the fetch run is finalized as failed, `last_fetched_at`
    /// is left unchanged, and the previously stored indicators remain.
    pub async fn fetch_dataset(&self, dataset_id: &str) -> FetchResult {
        let start = self.clock.now();

        let Some(descriptor) = self.registry.dataset(dataset_id) else {
            let e = FetchError::UnknownDataset {
                id: dataset_id.to_string(),
            };
            log::error!("{e}");
            return FetchResult::failed(dataset_id, e.to_string(), Duration::ZERO);
        };

        log::info!(
            "Fetching dataset: {} ({dataset_id}), resource {}, category {}",
            descriptor.name,
            descriptor.resource_id,
            descriptor.category
        );

        let run = match self.begin_run(descriptor, start).await {
            Ok(run) => run,
            Err(e) => {
                log::error!("Failed to create fetch run for {dataset_id}: {e}");
                return FetchResult::failed(dataset_id, e.to_string(), self.elapsed_since(start));
            }
        };

        self.set_in_flight(Some(run.id.clone()));

        let result = match self.run_pipeline(descriptor, &run).await {
            Ok(fetched) => {
                let duration = self.elapsed_since(start);
                log::info!(
                    "Processed {}: {} records, {} indicators in {}ms",
                    descriptor.name,
                    fetched.records,
                    fetched.indicators,
                    duration.as_millis()
                );
                FetchResult::success(dataset_id, fetched.records, fetched.indicators, duration)
            }
            Err(e) => {
                log::error!("Failed to fetch {}: {e}", descriptor.name);
                let completion = FetchRunCompletion::failed(e.to_string(), self.clock.now());
                if let Err(finish_err) = self.store.finish_fetch_run(&run.id, &completion).await {
                    log::error!("Failed to finalize fetch run {}: {finish_err}", run.id);
                }
                FetchResult::failed(dataset_id, e.to_string(), self.elapsed_since(start))
            }
        };

        self.set_in_flight(None);
        result
    }

    /// Finalizes the fetch run left behind by a cancelled
    /// [`Self::fetch_dataset`] as failed with `reason`.
    ///
    /// Does nothing when no run is in flight. `last_fetched_at` is left
    /// alone, so the dataset stays due.
    pub async fn abandon_in_flight(&self, reason: &str) {
        let run_id = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(run_id) = run_id else {
            return;
        };

        let completion = FetchRunCompletion::failed(reason, self.clock.now());
        match self.store.finish_fetch_run(&run_id, &completion).await {
            Ok(_) => log::warn!("Marked fetch run {run_id} as failed: {reason}"),
            Err(e) => log::error!("Failed to finalize abandoned fetch run {run_id}: {e}"),
        }
    }

    /// Finalizes `run` as a success once its data is committed.
    ///
    /// The data and `last_fetched_at` are already stored at this point, so a
    /// failure here only leaves the audit row behind and is not reported
    /// as a failed fetch.
    async fn finish_succeeded(&self, run: &FetchRun, records: u64, now: DateTime<Utc>) {
        let completion = FetchRunCompletion::success(records, now);
        if let Err(e) = self.store.finish_fetch_run(&run.id, &completion).await {
            log::warn!(
                "Stored {} but could not finalize fetch run {}: {e}",
                run.dataset_id,
                run.id
            );
        }
    }

    async fn begin_run(
        &self,
        descriptor: &DatasetDescriptor,
        started_at: DateTime<Utc>,
    ) -> Result<FetchRun, DbError> {
        let entry = DatasetRegistryEntry::from_descriptor(descriptor, started_at);
        self.store.upsert_registry_entry(&entry).await?;
        self.store.create_fetch_run(&descriptor.id, started_at).await
    }

    async fn run_pipeline(
        &self,
        descriptor: &DatasetDescriptor,
        run: &FetchRun,
    ) -> Result<Fetched, FetchError> {
        let options = PageOptions {
            page_size: descriptor.page_size.unwrap_or(self.config.page_size),
            page_delay: self.config.page_delay,
            filters: descriptor.filters.clone(),
        };
        let fetcher = self.fetcher.as_ref();
        let resource_id = descriptor.resource_id.as_str();
        let options = &options;

        let records = retry::with_backoff(
            &self.config.retry,
            self.clock.as_ref(),
            &descriptor.id,
            move |_attempt| fetcher.fetch_all_pages(resource_id, options),
        )
        .await?;
        let record_count = u64::try_from(records.len()).unwrap_or(u64::MAX);

        if records.is_empty() {
            log::warn!("No data returned for {}", descriptor.id);
            let now = self.clock.now();
            self.store.mark_fetched(&descriptor.id, now).await?;
            self.finish_succeeded(run, 0, now).await;
            return Ok(Fetched {
                records: 0,
                indicators: 0,
            });
        }

        let strategy = NormalizationStrategy::from_key(&descriptor.normalization);
        let indicators = normalize(strategy, &records, &descriptor.id, descriptor.category);

        let stored = self
            .store
            .replace_indicators(&descriptor.id, &indicators)
            .await?;

        let now = self.clock.now();
        self.store.mark_fetched(&descriptor.id, now).await?;
        self.finish_succeeded(run, record_count, now).await;

        Ok(Fetched {
            records: record_count,
            indicators: stored,
        })
    }

    /// Fetches every active dataset in the registry, one after another.
    ///
    /// A failing dataset never stops the batch.
    pub async fn fetch_all_datasets(&self) -> Vec<FetchResult> {
        let datasets: Vec<&DatasetDescriptor> = self
            .registry
            .all_datasets()
            .iter()
            .filter(|d| d.active)
            .collect();

        log::info!("Fetching all datasets ({} total)", datasets.len());
        let results = self.fetch_batch(&datasets).await;
        CycleSummary::from_results(&results).log("Fetch summary");
        results
    }

    /// Fetches the datasets whose refresh interval has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Storage`] if the last fetch times cannot be
    /// read; nothing is fetched in that case.
    pub async fn fetch_due_datasets(&self) -> Result<Vec<FetchResult>, FetchError> {
        let entries = self.store.registry_entries().await?;
        let due = crate::due_datasets(&self.registry, &entries, self.clock.now());

        if due.is_empty() {
            log::info!("All datasets are up to date");
            return Ok(Vec::new());
        }

        log::info!("Refreshing {} dataset(s) due for update", due.len());
        Ok(self.fetch_batch(&due).await)
    }

    async fn fetch_batch(&self, datasets: &[&DatasetDescriptor]) -> Vec<FetchResult> {
        if let Some(progress) = &self.progress {
            progress.set_total(u64::try_from(datasets.len()).unwrap_or(u64::MAX));
        }

        let mut results = Vec::with_capacity(datasets.len());
        for (i, descriptor) in datasets.iter().enumerate() {
            if let Some(progress) = &self.progress {
                progress.set_message(descriptor.name.clone());
            }

            results.push(self.fetch_dataset(&descriptor.id).await);

            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
            if i + 1 < datasets.len() {
                self.clock.sleep(self.config.dataset_delay).await;
            }
        }

        if let Some(progress) = &self.progress {
            let succeeded = results.iter().filter(|r| r.is_success()).count();
            progress.finish(format!("{succeeded}/{} datasets refreshed", results.len()));
        }

        results
    }

    /// Closes the underlying store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store fails to close.
    pub async fn close(&self) -> Result<(), DbError> {
        self.store.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone as _;
    use govdata_client::{ApiPage, PageRequest};
    use govdata_database::MemoryStore;
    use govdata_database_models::{FetchRunStatus, IndicatorQuery};
    use govdata_indicator_models::{Category, Geography, Indicator, PeriodType, RawRecord};
    use govdata_ingest_models::{FetchStatus, RetryPolicy};
    use serde_json::json;

    use super::*;
    use crate::clock::FakeClock;

    /// Serves whole datasets in the order they were scripted; every call
    /// to `fetch_page` consumes one scripted response.
    #[derive(Default)]
    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<Vec<RawRecord>, u16>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn push_ok(&self, records: Vec<RawRecord>) {
            self.responses.lock().unwrap().push_back(Ok(records));
        }

        fn push_err(&self, status: u16) {
            self.responses.lock().unwrap().push_back(Err(status));
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_page(
            &self,
            resource_id: &str,
            request: &PageRequest,
        ) -> Result<ApiPage, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(records)) => {
                    let count = records.len() as u64;
                    Ok(ApiPage {
                        records,
                        total: count,
                        count,
                        offset: request.offset,
                        limit: request.limit,
                    })
                }
                Some(Err(status)) => Err(ClientError::Status {
                    status,
                    resource_id: resource_id.to_string(),
                }),
                None => Ok(ApiPage {
                    records: Vec::new(),
                    total: 0,
                    count: 0,
                    offset: request.offset,
                    limit: request.limit,
                }),
            }
        }
    }

    /// Never answers.
    struct HangingFetcher;

    #[async_trait]
    impl PageFetcher for HangingFetcher {
        async fn fetch_page(
            &self,
            _resource_id: &str,
            _request: &PageRequest,
        ) -> Result<ApiPage, ClientError> {
            std::future::pending().await
        }
    }

    /// Delegates to a [`MemoryStore`], counting replaces and optionally
    /// refusing to create fetch runs or to finalize them as successful.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        replaces: AtomicU64,
        refuse_runs: bool,
        refuse_success: bool,
    }

    #[async_trait]
    impl IndicatorStore for FaultyStore {
        async fn upsert_registry_entry(&self, entry: &DatasetRegistryEntry) -> Result<(), DbError> {
            self.inner.upsert_registry_entry(entry).await
        }

        async fn registry_entries(&self) -> Result<Vec<DatasetRegistryEntry>, DbError> {
            self.inner.registry_entries().await
        }

        async fn mark_fetched(&self, dataset_id: &str, at: DateTime<Utc>) -> Result<(), DbError> {
            self.inner.mark_fetched(dataset_id, at).await
        }

        async fn create_fetch_run(
            &self,
            dataset_id: &str,
            started_at: DateTime<Utc>,
        ) -> Result<FetchRun, DbError> {
            if self.refuse_runs {
                return Err(DbError::Conversion {
                    message: "fetch_runs table unavailable".to_string(),
                });
            }
            self.inner.create_fetch_run(dataset_id, started_at).await
        }

        async fn finish_fetch_run(
            &self,
            run_id: &str,
            completion: &FetchRunCompletion,
        ) -> Result<FetchRun, DbError> {
            if self.refuse_success && completion.status == FetchRunStatus::Success {
                return Err(DbError::Conversion {
                    message: "fetch_runs is read-only".to_string(),
                });
            }
            self.inner.finish_fetch_run(run_id, completion).await
        }

        async fn fetch_runs(&self, dataset_id: &str, limit: u32) -> Result<Vec<FetchRun>, DbError> {
            self.inner.fetch_runs(dataset_id, limit).await
        }

        async fn replace_indicators(
            &self,
            dataset_id: &str,
            indicators: &[Indicator],
        ) -> Result<u64, DbError> {
            self.replaces.fetch_add(1, Ordering::SeqCst);
            self.inner.replace_indicators(dataset_id, indicators).await
        }

        async fn query_indicators(&self, query: &IndicatorQuery) -> Result<Vec<Indicator>, DbError> {
            self.inner.query_indicators(query).await
        }

        async fn close(&self) -> Result<(), DbError> {
            self.inner.close().await
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn descriptor(id: &str, refresh_interval_minutes: u32) -> DatasetDescriptor {
        descriptor_with(id, refresh_interval_minutes, Category::Economy, "economy")
    }

    fn descriptor_with(
        id: &str,
        refresh_interval_minutes: u32,
        category: Category,
        normalization: &str,
    ) -> DatasetDescriptor {
        DatasetDescriptor {
            id: id.to_string(),
            name: format!("{id} name"),
            resource_id: format!("{id}-resource"),
            category,
            refresh_interval_minutes,
            normalization: normalization.to_string(),
            description: String::new(),
            filters: BTreeMap::new(),
            page_size: Some(100),
            active: true,
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            page_delay: Duration::ZERO,
            retry: RetryPolicy::default(),
            ..PipelineConfig::default()
        }
    }

    struct Harness {
        engine: FetchEngine,
        fetcher: Arc<ScriptedFetcher>,
        store: Arc<dyn IndicatorStore>,
        clock: Arc<FakeClock>,
    }

    fn harness_with_store(datasets: Vec<DatasetDescriptor>, store: Arc<dyn IndicatorStore>) -> Harness {
        let registry = Arc::new(DatasetRegistry::new(datasets).unwrap());
        let fetcher = Arc::new(ScriptedFetcher::default());
        let clock = Arc::new(FakeClock::new(start()));
        let engine = FetchEngine::new(
            registry,
            fetcher.clone(),
            store.clone(),
            clock.clone(),
            config(),
        );
        Harness {
            engine,
            fetcher,
            store,
            clock,
        }
    }

    fn harness(datasets: Vec<DatasetDescriptor>) -> Harness {
        harness_with_store(datasets, Arc::new(MemoryStore::new()))
    }

    fn gdp_records() -> Vec<RawRecord> {
        vec![
            json!({ "state": "KA", "gdp": "1,000", "year": 2023 }),
            json!({ "state": "TN", "gdp": 2000, "growth_rate": "8.1", "year": 2023 }),
        ]
    }

    async fn last_fetched(store: &dyn IndicatorStore, id: &str) -> Option<DateTime<Utc>> {
        store
            .registry_entries()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.id == id)
            .and_then(|e| e.last_fetched_at)
    }

    async fn stored(store: &dyn IndicatorStore, id: &str) -> Vec<Indicator> {
        store
            .query_indicators(&IndicatorQuery {
                source_dataset: Some(id.to_string()),
                ..IndicatorQuery::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn successful_fetch_stores_indicators_and_finalizes_run() {
        let h = harness(vec![descriptor("gdp", 60)]);
        h.fetcher.push_ok(gdp_records());

        let result = h.engine.fetch_dataset("gdp").await;

        assert_eq!(result.status, FetchStatus::Success);
        assert_eq!(result.records_fetched, 2);
        assert_eq!(result.indicators_created, 3);
        assert!(result.error.is_none());

        assert_eq!(stored(h.store.as_ref(), "gdp").await.len(), 3);
        assert_eq!(last_fetched(h.store.as_ref(), "gdp").await, Some(start()));

        let runs = h.store.fetch_runs("gdp", 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, FetchRunStatus::Success);
        assert_eq!(runs[0].records_fetched, 2);
        assert!(runs[0].completed_at.unwrap() >= runs[0].started_at);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let h = harness(vec![descriptor("gdp", 60)]);
        h.fetcher.push_err(500);
        h.fetcher.push_err(503);
        h.fetcher.push_ok(gdp_records());

        let result = h.engine.fetch_dataset("gdp").await;

        assert_eq!(result.status, FetchStatus::Success);
        assert_eq!(result.records_fetched, 2);
        assert_eq!(h.fetcher.calls(), 3);
        assert_eq!(
            h.clock.sleeps(),
            vec![Duration::from_millis(2000), Duration::from_millis(4000)]
        );
        assert_eq!(result.duration, Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn exhausted_retries_fail_and_keep_previous_state() {
        let h = harness(vec![descriptor("gdp", 60)]);
        h.fetcher.push_ok(gdp_records());
        assert!(h.engine.fetch_dataset("gdp").await.is_success());
        let before = stored(h.store.as_ref(), "gdp").await;

        h.clock.advance(chrono::Duration::hours(2));
        h.fetcher.push_err(500);
        h.fetcher.push_err(500);
        h.fetcher.push_err(500);

        let result = h.engine.fetch_dataset("gdp").await;

        assert_eq!(result.status, FetchStatus::Failed);
        assert_eq!(result.records_fetched, 0);
        assert!(result.error.unwrap().contains("500"));
        assert_eq!(last_fetched(h.store.as_ref(), "gdp").await, Some(start()));
        assert_eq!(stored(h.store.as_ref(), "gdp").await, before);

        let runs = h.store.fetch_runs("gdp", 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status, FetchRunStatus::Failed);
        assert!(runs[0].error_message.is_some());
        assert_eq!(runs[1].status, FetchRunStatus::Success);
    }

    #[tokio::test]
    async fn empty_response_is_a_zero_record_success() {
        let h = harness(vec![descriptor("gdp", 60)]);
        h.fetcher.push_ok(Vec::new());

        let result = h.engine.fetch_dataset("gdp").await;

        assert_eq!(result.status, FetchStatus::Success);
        assert_eq!(result.records_fetched, 0);
        assert_eq!(result.indicators_created, 0);
        assert_eq!(last_fetched(h.store.as_ref(), "gdp").await, Some(start()));

        let runs = h.store.fetch_runs("gdp", 10).await.unwrap();
        assert_eq!(runs[0].status, FetchRunStatus::Success);
        assert_eq!(runs[0].records_fetched, 0);
    }

    #[tokio::test]
    async fn refetch_with_identical_data_is_idempotent() {
        let h = harness(vec![descriptor("gdp", 60)]);
        h.fetcher.push_ok(gdp_records());
        h.fetcher.push_ok(gdp_records());

        h.engine.fetch_dataset("gdp").await;
        let first = stored(h.store.as_ref(), "gdp").await;
        h.engine.fetch_dataset("gdp").await;
        let second = stored(h.store.as_ref(), "gdp").await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_dataset_fails_without_side_effects() {
        let h = harness(vec![descriptor("gdp", 60)]);

        let result = h.engine.fetch_dataset("nope").await;

        assert_eq!(result.status, FetchStatus::Failed);
        assert_eq!(result.duration, Duration::ZERO);
        assert!(result.error.unwrap().contains("nope"));
        assert_eq!(h.fetcher.calls(), 0);
        assert!(h.store.registry_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_run_creation_failure_stops_early() {
        let store = Arc::new(FaultyStore {
            refuse_runs: true,
            ..FaultyStore::default()
        });
        let h = harness_with_store(vec![descriptor("gdp", 60)], store.clone());
        h.fetcher.push_ok(gdp_records());

        let result = h.engine.fetch_dataset("gdp").await;

        assert_eq!(result.status, FetchStatus::Failed);
        assert!(result.error.unwrap().contains("fetch_runs table unavailable"));
        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(store.replaces.load(Ordering::SeqCst), 0);
        assert!(last_fetched(h.store.as_ref(), "gdp").await.is_none());
    }

    #[tokio::test]
    async fn run_finalize_failure_after_commit_is_still_a_success() {
        let store = Arc::new(FaultyStore {
            refuse_success: true,
            ..FaultyStore::default()
        });
        let h = harness_with_store(vec![descriptor("gdp", 60)], store);
        h.fetcher.push_ok(gdp_records());

        let result = h.engine.fetch_dataset("gdp").await;

        assert_eq!(result.status, FetchStatus::Success);
        assert!(result.error.is_none());
        assert_eq!(last_fetched(h.store.as_ref(), "gdp").await, Some(start()));
        assert_eq!(stored(h.store.as_ref(), "gdp").await.len(), 3);

        let runs = h.store.fetch_runs("gdp", 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, FetchRunStatus::Running);

        h.clock.advance(chrono::Duration::minutes(30));
        assert!(h.engine.fetch_due_datasets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn population_dataset_end_to_end() {
        let h = harness(vec![descriptor_with(
            "pop-census",
            60,
            Category::Population,
            "population",
        )]);
        h.fetcher.push_ok(vec![
            json!({ "state": "UP", "population": "240000000", "year": 2024 }),
        ]);

        let result = h.engine.fetch_dataset("pop-census").await;

        assert_eq!(result.status, FetchStatus::Success);
        assert_eq!(result.records_fetched, 1);
        assert_eq!(result.indicators_created, 1);

        let indicators = stored(h.store.as_ref(), "pop-census").await;
        assert_eq!(indicators.len(), 1);
        let population = &indicators[0];
        assert_eq!(population.indicator_name, "Population");
        assert!((population.value - 240_000_000.0).abs() < f64::EPSILON);
        assert_eq!(population.unit, "persons");
        assert_eq!(population.geography, Geography::State);
        assert_eq!(population.geography_name, "Uttar Pradesh");
        assert_eq!(population.period, "2024");
        assert_eq!(population.period_type, PeriodType::Year);
        assert_eq!(population.source_dataset, "pop-census");
        assert_eq!(population.category, Category::Population);
    }

    #[tokio::test]
    async fn unknown_strategy_falls_back_to_generic() {
        let h = harness(vec![descriptor_with(
            "exports",
            60,
            Category::Trade,
            "no-such-strategy",
        )]);
        h.fetcher.push_ok(vec![
            json!({ "state": "GJ", "year": 2022, "exports": "42.5%", "commodity": "Cotton" }),
        ]);

        let result = h.engine.fetch_dataset("exports").await;

        assert_eq!(result.status, FetchStatus::Success);
        assert_eq!(result.indicators_created, 1);

        let indicators = stored(h.store.as_ref(), "exports").await;
        assert_eq!(indicators.len(), 1);
        assert_eq!(indicators[0].indicator_name, "Exports");
        assert_eq!(indicators[0].unit, "units");
        assert!((indicators[0].value - 42.5).abs() < f64::EPSILON);
        assert_eq!(indicators[0].category, Category::Trade);
    }

    #[tokio::test]
    async fn empty_response_skips_normalization_and_keeps_indicators() {
        let store = Arc::new(FaultyStore::default());
        let h = harness_with_store(vec![descriptor("gdp", 60)], store.clone());
        h.fetcher.push_ok(gdp_records());
        assert!(h.engine.fetch_dataset("gdp").await.is_success());
        let before = stored(h.store.as_ref(), "gdp").await;
        assert_eq!(store.replaces.load(Ordering::SeqCst), 1);

        h.clock.advance(chrono::Duration::hours(2));
        let refetched_at = h.clock.now();
        h.fetcher.push_ok(Vec::new());

        let result = h.engine.fetch_dataset("gdp").await;

        assert_eq!(result.status, FetchStatus::Success);
        assert_eq!(result.records_fetched, 0);
        assert_eq!(result.indicators_created, 0);
        assert_eq!(store.replaces.load(Ordering::SeqCst), 1);
        assert_eq!(stored(h.store.as_ref(), "gdp").await, before);
        assert_eq!(last_fetched(h.store.as_ref(), "gdp").await, Some(refetched_at));
    }

    #[tokio::test]
    async fn abandoned_fetch_run_is_finalized_as_failed() {
        let registry = Arc::new(DatasetRegistry::new(vec![descriptor("gdp", 60)]).unwrap());
        let store: Arc<dyn IndicatorStore> = Arc::new(MemoryStore::new());
        let engine = FetchEngine::new(
            registry,
            Arc::new(HangingFetcher),
            store.clone(),
            Arc::new(FakeClock::new(start())),
            config(),
        );

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), engine.fetch_dataset("gdp")).await;
        assert!(outcome.is_err());
        assert_eq!(
            store.fetch_runs("gdp", 10).await.unwrap()[0].status,
            FetchRunStatus::Running
        );

        engine.abandon_in_flight("shutdown").await;
        engine.abandon_in_flight("shutdown").await;

        let runs = store.fetch_runs("gdp", 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, FetchRunStatus::Failed);
        assert_eq!(runs[0].error_message.as_deref(), Some("shutdown"));
        assert!(last_fetched(store.as_ref(), "gdp").await.is_none());
    }

    #[tokio::test]
    async fn fetch_all_continues_past_failures_and_paces_between_datasets() {
        let h = harness(vec![
            descriptor("a", 60),
            descriptor("b", 60),
            descriptor("c", 60),
        ]);
        h.fetcher.push_ok(gdp_records());
        for _ in 0..3 {
            h.fetcher.push_err(500);
        }
        h.fetcher.push_ok(gdp_records());

        let results = h.engine.fetch_all_datasets().await;

        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![FetchStatus::Success, FetchStatus::Failed, FetchStatus::Success]
        );

        let dataset_delays = h
            .clock
            .sleeps()
            .into_iter()
            .filter(|d| *d == Duration::from_millis(1000))
            .count();
        assert_eq!(dataset_delays, 2);
    }

    #[tokio::test]
    async fn nothing_due_means_no_fetches() {
        let h = harness(vec![descriptor("gdp", 60)]);
        h.fetcher.push_ok(gdp_records());
        h.engine.fetch_dataset("gdp").await;
        let calls = h.fetcher.calls();

        h.clock.advance(chrono::Duration::minutes(30));
        let results = h.engine.fetch_due_datasets().await.unwrap();

        assert!(results.is_empty());
        assert_eq!(h.fetcher.calls(), calls);
        assert_eq!(h.store.fetch_runs("gdp", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn due_datasets_are_fetched() {
        let h = harness(vec![descriptor("fast", 15), descriptor("slow", 1440)]);
        h.fetcher.push_ok(gdp_records());
        h.fetcher.push_ok(gdp_records());
        assert_eq!(h.engine.fetch_all_datasets().await.len(), 2);

        h.clock.advance(chrono::Duration::minutes(20));
        h.fetcher.push_ok(gdp_records());
        let results = h.engine.fetch_due_datasets().await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].dataset_id, "fast");
        assert!(results[0].is_success());
    }

    #[tokio::test]
    async fn unreadable_store_aborts_the_cycle() {
        let h = harness(vec![descriptor("gdp", 60)]);
        h.store.close().await.unwrap();

        let err = h.engine.fetch_due_datasets().await.unwrap_err();

        assert!(matches!(err, FetchError::Storage(DbError::Closed)));
        assert_eq!(h.fetcher.calls(), 0);
    }
}
