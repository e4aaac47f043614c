#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Canonical indicator schema and dataset category taxonomy.
//!
//! Every upstream dataset, whatever its raw shape, is normalized into
//! [`Indicator`] rows: one numeric observation for one geography and one
//! period. Downstream dashboards only ever read this shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A single raw row as returned by the upstream open-data API.
///
/// The shape varies per dataset and is not modeled further; normalizers
/// look fields up by name.
pub type RawRecord = serde_json::Value;

/// Dataset category groupings.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    /// Census and demographic counts
    Population,
    /// GDP, income, and employment figures
    Economy,
    /// Budget, revenue, and expenditure figures
    Government,
    /// Air quality, water, and waste readings
    Environment,
    /// Import/export statistics
    Trade,
    /// Industrial production statistics
    Industry,
    /// Health infrastructure and outcomes
    Healthcare,
    /// Anything not fitting the other categories
    Generic,
}

impl Category {
    /// All categories, in declaration order.
    pub const ALL: &[Self] = &[
        Self::Population,
        Self::Economy,
        Self::Government,
        Self::Environment,
        Self::Trade,
        Self::Industry,
        Self::Healthcare,
        Self::Generic,
    ];
}

/// Geographic level an indicator applies to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum Geography {
    /// Country-wide figure
    National,
    /// State or union territory figure
    State,
    /// District or city figure
    District,
}

/// Granularity of an indicator's period.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PeriodType {
    /// Calendar or fiscal year (e.g. `"2024"`, `"2023-24"`)
    Year,
    /// Quarter (e.g. `"2024-Q1"`)
    Quarter,
    /// Month or a dated reading
    Month,
}

/// A normalized time-series data point.
///
/// All normalization strategies produce this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicator {
    /// Human-readable indicator name (e.g. `"Population"`).
    pub indicator_name: String,
    /// Observed value.
    pub value: f64,
    /// Unit of measure (e.g. `"persons"`, `"crores"`, `"percentage"`).
    pub unit: String,
    /// Geographic level.
    pub geography: Geography,
    /// Name of the geography (e.g. `"Uttar Pradesh"`, `"India"`).
    pub geography_name: String,
    /// Period label (e.g. `"2024"`).
    pub period: String,
    /// Granularity of `period`.
    pub period_type: PeriodType,
    /// Registry id of the dataset this indicator came from.
    pub source_dataset: String,
    /// Category of the source dataset.
    pub category: Category,
    /// Optional free-form annotations (e.g. `{"source": "Census"}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl Indicator {
    /// Key that identifies an observation independent of its value.
    ///
    /// Used to compare indicator sets without depending on row order.
    #[must_use]
    pub fn observation_key(&self) -> (String, String, String, String) {
        (
            self.indicator_name.clone(),
            self.geography_name.clone(),
            self.period.clone(),
            self.source_dataset.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn category_round_trips_through_strings() {
        for category in Category::ALL {
            let s = category.to_string();
            assert_eq!(Category::from_str(&s).unwrap(), *category);
        }
        assert_eq!(Category::Healthcare.as_ref(), "healthcare");
    }

    #[test]
    fn indicator_serializes_camel_case() {
        let indicator = Indicator {
            indicator_name: "Population".to_string(),
            value: 1.0,
            unit: "persons".to_string(),
            geography: Geography::State,
            geography_name: "Kerala".to_string(),
            period: "2024".to_string(),
            period_type: PeriodType::Year,
            source_dataset: "pop".to_string(),
            category: Category::Population,
            metadata: None,
        };
        let json = serde_json::to_value(&indicator).unwrap();
        assert_eq!(json["indicatorName"], "Population");
        assert_eq!(json["geography"], "State");
        assert_eq!(json["periodType"], "year");
        assert_eq!(json["category"], "population");
        assert!(json.get("metadata").is_none());
    }
}
