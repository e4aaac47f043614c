#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pipeline configuration, fetch results, and progress reporting types.

pub mod config;
pub mod progress;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use config::{ConfigError, PipelineConfig, RetryPolicy};

/// Outcome of one dataset fetch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FetchStatus {
    /// Data was fetched and stored (possibly zero records).
    Success,
    /// Nothing was stored; see [`FetchResult::error`].
    Failed,
}

/// Result of a single `fetch_dataset` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
    /// Registry id of the dataset.
    pub dataset_id: String,
    /// Final outcome.
    pub status: FetchStatus,
    /// Raw records returned by the upstream API.
    pub records_fetched: u64,
    /// Indicators written to the store.
    pub indicators_created: u64,
    /// Wall time spent on this dataset.
    pub duration: Duration,
    /// Failure reason, for failed fetches.
    pub error: Option<String>,
}

impl FetchResult {
    /// A successful fetch.
    #[must_use]
    pub fn success(
        dataset_id: impl Into<String>,
        records_fetched: u64,
        indicators_created: u64,
        duration: Duration,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            status: FetchStatus::Success,
            records_fetched,
            indicators_created,
            duration,
            error: None,
        }
    }

    /// A failed fetch. Failed results never report records or indicators.
    #[must_use]
    pub fn failed(
        dataset_id: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            status: FetchStatus::Failed,
            records_fetched: 0,
            indicators_created: 0,
            duration,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }
}

/// Totals over the results of one batch of fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    /// Datasets attempted.
    pub processed: usize,
    /// Datasets that succeeded.
    pub successful: usize,
    /// Datasets that failed.
    pub failed: usize,
    /// Raw records fetched across all datasets.
    pub records_fetched: u64,
    /// Indicators created across all datasets.
    pub indicators_created: u64,
    /// `(dataset_id, error)` for every failed dataset, in fetch order.
    pub failures: Vec<(String, String)>,
}

impl CycleSummary {
    /// Tallies a batch of per-dataset results, keeping the error of every
    /// failed dataset.
    #[must_use]
    pub fn from_results(results: &[FetchResult]) -> Self {
        let mut summary = Self {
            processed: results.len(),
            ..Self::default()
        };

        for result in results {
            summary.records_fetched += result.records_fetched;
            summary.indicators_created += result.indicators_created;
            match result.status {
                FetchStatus::Success => summary.successful += 1,
                FetchStatus::Failed => {
                    summary.failed += 1;
                    summary.failures.push((
                        result.dataset_id.clone(),
                        result.error.clone().unwrap_or_default(),
                    ));
                }
            }
        }

        summary
    }

    /// Writes the summary to the log, one line per figure.
    pub fn log(&self, title: &str) {
        log::info!("{title}");
        log::info!("  Datasets processed: {}", self.processed);
        log::info!("  Successful: {}", self.successful);
        log::info!("  Failed: {}", self.failed);
        log::info!("  Records fetched: {}", self.records_fetched);
        log::info!("  Indicators created: {}", self.indicators_created);

        if self.failed > 0 {
            log::warn!("{} dataset(s) failed to fetch", self.failed);
            for (dataset_id, error) in &self.failures {
                log::warn!("  {dataset_id}: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_and_failures() {
        let results = vec![
            FetchResult::success("a", 10, 4, Duration::from_millis(5)),
            FetchResult::failed("b", "HTTP 500", Duration::ZERO),
            FetchResult::success("c", 0, 0, Duration::ZERO),
        ];

        let summary = CycleSummary::from_results(&results);

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.records_fetched, 10);
        assert_eq!(summary.indicators_created, 4);
        assert_eq!(
            summary.failures,
            vec![("b".to_string(), "HTTP 500".to_string())]
        );
    }

    #[test]
    fn failed_result_has_no_counts() {
        let result = FetchResult::failed("x", "boom", Duration::ZERO);
        assert!(!result.is_success());
        assert_eq!(result.records_fetched, 0);
        assert_eq!(result.indicators_created, 0);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn result_serializes_camel_case() {
        let json =
            serde_json::to_value(FetchResult::success("x", 1, 2, Duration::ZERO)).unwrap();
        assert_eq!(json["datasetId"], "x");
        assert_eq!(json["status"], "success");
        assert_eq!(json["indicatorsCreated"], 2);
    }
}
