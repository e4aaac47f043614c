//! Config-driven dataset descriptor.
//!
//! [`DatasetDescriptor`] captures everything unique about one upstream
//! dataset: where to fetch it, how often, and which normalization strategy
//! turns its raw rows into indicators.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use govdata_indicator_models::Category;
use serde::Deserialize;

use crate::RegistryError;

/// A complete, config-driven dataset definition.
///
/// Immutable once loaded; the registry hands out shared references.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasetDescriptor {
    /// Unique identifier (e.g., `"census_population"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Upstream resource id appended to the API base URL.
    pub resource_id: String,
    /// Dataset category.
    pub category: Category,
    /// Minimum minutes between successful fetches. Must be positive.
    pub refresh_interval_minutes: u32,
    /// Normalization strategy key (e.g., `"population"`). Unknown keys
    /// fall back to the generic strategy.
    pub normalization: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Upstream field filters, sent as `filters[field]=value`.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    /// Page size override for this dataset.
    #[serde(default)]
    pub page_size: Option<u64>,
    /// Inactive datasets are never scheduled. Defaults to `true`.
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl DatasetDescriptor {
    /// Returns the unique dataset identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the refresh interval as a [`Duration`].
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::minutes(i64::from(self.refresh_interval_minutes))
    }

    /// Returns `true` if this dataset should be fetched at `now`.
    ///
    /// A dataset that has never been fetched successfully is always due.
    /// Otherwise it is due once at least `refresh_interval_minutes` have
    /// elapsed since `last_fetched_at`.
    #[must_use]
    pub fn is_due(&self, last_fetched_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        last_fetched_at.is_none_or(|last| now.signed_duration_since(last) >= self.refresh_interval())
    }

    /// Checks constraints that TOML deserialization cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Invalid`] if a field is empty or the refresh
    /// interval is zero.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |message: &str| RegistryError::Invalid {
            id: self.id.clone(),
            message: message.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id is empty"));
        }
        if self.resource_id.trim().is_empty() {
            return Err(invalid("resource_id is empty"));
        }
        if self.refresh_interval_minutes == 0 {
            return Err(invalid("refresh_interval_minutes must be positive"));
        }
        if self.page_size == Some(0) {
            return Err(invalid("page_size must be positive"));
        }
        Ok(())
    }
}

/// Parses and validates a single descriptor from TOML text.
///
/// # Errors
///
/// Returns [`RegistryError`] if the TOML is malformed or the descriptor is
/// invalid.
pub fn parse_dataset_toml(name: &str, toml_str: &str) -> Result<DatasetDescriptor, RegistryError> {
    let descriptor: DatasetDescriptor =
        toml::from_str(toml_str).map_err(|source| RegistryError::Parse {
            name: name.to_string(),
            source,
        })?;
    descriptor.validate()?;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        id = "gdp"
        name = "GDP"
        resource_id = "abc"
        category = "economy"
        normalization = "economy"
        refresh_interval_minutes = 20
    "#;

    #[test]
    fn parses_minimal_descriptor_with_defaults() {
        let d = parse_dataset_toml("gdp", MINIMAL).unwrap();
        assert_eq!(d.category, Category::Economy);
        assert!(d.active);
        assert!(d.filters.is_empty());
        assert_eq!(d.page_size, None);
        assert_eq!(d.description, "");
    }

    #[test]
    fn parses_filters_table() {
        let toml_str = format!("{MINIMAL}\n[filters]\nstate = \"Kerala\"\n");
        let d = parse_dataset_toml("gdp", &toml_str).unwrap();
        assert_eq!(d.filters.get("state").map(String::as_str), Some("Kerala"));
    }

    #[test]
    fn rejects_zero_refresh_interval() {
        let toml_str = MINIMAL.replace("= 20", "= 0");
        let err = parse_dataset_toml("gdp", &toml_str).unwrap_err();
        assert!(matches!(err, RegistryError::Invalid { .. }));
    }

    #[test]
    fn rejects_unknown_category() {
        let toml_str = MINIMAL.replacen("\"economy\"", "\"sports\"", 1);
        let err = parse_dataset_toml("gdp", &toml_str).unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }));
    }

    #[test]
    fn never_fetched_is_due() {
        let d = parse_dataset_toml("gdp", MINIMAL).unwrap();
        assert!(d.is_due(None, Utc::now()));
    }

    #[test]
    fn due_exactly_at_interval_boundary() {
        let d = parse_dataset_toml("gdp", MINIMAL).unwrap();
        let now = Utc::now();
        assert!(d.is_due(Some(now - Duration::minutes(20)), now));
        assert!(!d.is_due(Some(now - Duration::minutes(19)), now));
    }

    #[test]
    fn inactive_dataset_is_never_due() {
        let toml_str = format!("{MINIMAL}\nactive = false\n");
        let d = parse_dataset_toml("gdp", &toml_str).unwrap();
        assert!(!d.is_due(None, Utc::now()));
    }
}
