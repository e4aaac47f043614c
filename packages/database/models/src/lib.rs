#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database row types and query parameter definitions.
//!
//! These types represent the shapes of data as stored in and retrieved from
//! the indicator store. The normalized [`govdata_indicator_models::Indicator`]
//! is stored as-is and has no separate row type.

use chrono::{DateTime, Utc};
use govdata_dataset::DatasetDescriptor;
use govdata_indicator_models::{Category, Geography};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Persisted state of one registry dataset.
///
/// Mirrors the descriptor and adds the scheduling state. Upserting an entry
/// never changes `last_fetched_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRegistryEntry {
    /// Dataset id (primary key).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Upstream resource id.
    pub resource_id: String,
    /// Dataset category.
    pub category: Category,
    /// Minutes between successful fetches.
    pub refresh_interval_minutes: u32,
    /// Normalization strategy key.
    pub normalization: String,
    /// Free-form description.
    pub description: String,
    /// Whether the dataset is scheduled.
    pub is_active: bool,
    /// Last definitive success, if any.
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Last time the entry was upserted.
    pub updated_at: DateTime<Utc>,
}

impl DatasetRegistryEntry {
    /// Builds an entry from a descriptor, with no recorded fetch.
    #[must_use]
    pub fn from_descriptor(descriptor: &DatasetDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            resource_id: descriptor.resource_id.clone(),
            category: descriptor.category,
            refresh_interval_minutes: descriptor.refresh_interval_minutes,
            normalization: descriptor.normalization.clone(),
            description: descriptor.description.clone(),
            is_active: descriptor.active,
            last_fetched_at: None,
            updated_at: now,
        }
    }
}

/// Lifecycle state of a fetch run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FetchRunStatus {
    /// In progress; the only non-final state.
    Running,
    /// Completed successfully.
    Success,
    /// Completed with an error.
    Failed,
    /// Completed with some data missing.
    Partial,
}

impl FetchRunStatus {
    /// Returns `true` for every state except [`Self::Running`].
    #[must_use]
    pub const fn is_final(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Audit record of one fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRun {
    /// Run id (UUID v4).
    pub id: String,
    /// Dataset this run fetched.
    pub dataset_id: String,
    /// Current state.
    pub status: FetchRunStatus,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
    /// When the run was finalized.
    pub completed_at: Option<DateTime<Utc>>,
    /// Raw records fetched.
    pub records_fetched: u64,
    /// Failure reason, for failed runs.
    pub error_message: Option<String>,
}

/// Final state written to a [`FetchRun`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRunCompletion {
    /// Final status; must not be [`FetchRunStatus::Running`].
    pub status: FetchRunStatus,
    /// Raw records fetched.
    pub records_fetched: u64,
    /// Failure reason, for failed runs.
    pub error_message: Option<String>,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

impl FetchRunCompletion {
    /// A successful completion.
    #[must_use]
    pub const fn success(records_fetched: u64, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: FetchRunStatus::Success,
            records_fetched,
            error_message: None,
            completed_at,
        }
    }

    /// A failed completion.
    #[must_use]
    pub fn failed(error_message: impl Into<String>, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: FetchRunStatus::Failed,
            records_fetched: 0,
            error_message: Some(error_message.into()),
            completed_at,
        }
    }
}

/// Filters for reading indicators. Every `None` field matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorQuery {
    /// Category filter.
    pub category: Option<Category>,
    /// Geographic level filter.
    pub geography: Option<Geography>,
    /// Geography name filter (exact match).
    pub geography_name: Option<String>,
    /// Period filter (exact match).
    pub period: Option<String>,
    /// Source dataset filter.
    pub source_dataset: Option<String>,
    /// Indicator name filter (exact match).
    pub indicator_name: Option<String>,
    /// Maximum number of rows to return.
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn only_running_is_not_final() {
        assert!(!FetchRunStatus::Running.is_final());
        assert!(FetchRunStatus::Success.is_final());
        assert!(FetchRunStatus::Failed.is_final());
        assert!(FetchRunStatus::Partial.is_final());
    }

    #[test]
    fn status_strings_are_lowercase() {
        assert_eq!(FetchRunStatus::Success.as_ref(), "success");
        assert_eq!(
            FetchRunStatus::from_str("failed").unwrap(),
            FetchRunStatus::Failed
        );
    }

    #[test]
    fn query_deserializes_with_defaults() {
        let query: IndicatorQuery =
            serde_json::from_str(r#"{"category":"economy","limit":10}"#).unwrap();
        assert_eq!(query.category, Some(Category::Economy));
        assert_eq!(query.limit, Some(10));
        assert!(query.source_dataset.is_none());
    }
}
