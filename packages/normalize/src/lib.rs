#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Normalization layer.
//!
//! Converts dataset-specific raw records into canonical [`Indicator`] rows.
//! Strategies are pure and deterministic. The set of strategies is closed
//! ([`NormalizationStrategy`]); any strategy key the registry doesn't know
//! resolves to [`NormalizationStrategy::Generic`].

pub mod coerce;
pub mod environment;
pub mod generic;
pub mod geography;
pub mod metrics;

use govdata_indicator_models::{Category, Indicator, RawRecord};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display, EnumString};

/// Errors that abort a whole strategy run.
///
/// Individual malformed records never produce an error; they degrade or are
/// skipped.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// None of the records in a non-empty batch is a JSON object.
    #[error("None of the {count} raw records is a JSON object")]
    NoObjectRecords {
        /// Number of records in the batch.
        count: usize,
    },
}

/// Where the indicators being produced come from.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    /// Registry id of the source dataset.
    pub source_dataset: &'a str,
    /// Category stamped on every indicator.
    pub category: Category,
}

/// Closed set of normalization strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum NormalizationStrategy {
    /// Census and demographic counts.
    Population,
    /// GDP, income, and employment figures.
    Economy,
    /// Budget, revenue, and expenditure figures.
    Government,
    /// Station and city level environmental readings.
    Environment,
    /// One indicator per numeric field.
    Generic,
}

impl NormalizationStrategy {
    /// Resolves a strategy key from a dataset descriptor.
    ///
    /// Never fails: categories without a dedicated strategy and unknown
    /// keys both resolve to [`Self::Generic`].
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "population" => Self::Population,
            "economy" => Self::Economy,
            "government" => Self::Government,
            "environment" => Self::Environment,
            "trade" | "industry" | "healthcare" | "generic" => Self::Generic,
            other => {
                log::debug!("Unknown normalization strategy {other:?}, using generic");
                Self::Generic
            }
        }
    }

    /// Runs this strategy.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError`] if the whole batch is unusable.
    pub fn apply(
        self,
        records: &[RawRecord],
        ctx: &NormalizeContext<'_>,
    ) -> Result<Vec<Indicator>, NormalizeError> {
        match self {
            Self::Population => metrics::normalize_table(&metrics::POPULATION, records, ctx),
            Self::Economy => metrics::normalize_table(&metrics::ECONOMY, records, ctx),
            Self::Government => metrics::normalize_table(&metrics::GOVERNMENT, records, ctx),
            Self::Environment => environment::normalize(records, ctx),
            Self::Generic => generic::normalize(records, ctx),
        }
    }
}

/// Normalizes `records` with the given strategy.
///
/// A whole-strategy failure is logged and yields no indicators; it is never
/// propagated.
#[must_use]
pub fn normalize(
    strategy: NormalizationStrategy,
    records: &[RawRecord],
    source_dataset: &str,
    category: Category,
) -> Vec<Indicator> {
    let ctx = NormalizeContext {
        source_dataset,
        category,
    };

    match strategy.apply(records, &ctx) {
        Ok(indicators) => {
            log::info!(
                "Normalized {} indicators from {} raw records (strategy: {strategy})",
                indicators.len(),
                records.len()
            );
            indicators
        }
        Err(e) => {
            log::error!("Normalization failed for {source_dataset} (strategy: {strategy}): {e}");
            Vec::new()
        }
    }
}

/// Yields the object records of a batch, skipping anything else.
///
/// # Errors
///
/// Returns [`NormalizeError::NoObjectRecords`] if the batch is non-empty
/// and contains no objects.
fn object_records(
    records: &[RawRecord],
) -> Result<impl Iterator<Item = &Map<String, Value>>, NormalizeError> {
    if !records.is_empty() && !records.iter().any(Value::is_object) {
        return Err(NormalizeError::NoObjectRecords {
            count: records.len(),
        });
    }

    Ok(records.iter().filter_map(|record| {
        let obj = record.as_object();
        if obj.is_none() {
            log::debug!("Skipping non-object raw record: {record}");
        }
        obj
    }))
}
