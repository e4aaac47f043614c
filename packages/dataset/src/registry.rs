//! Dataset registry: loads all dataset descriptors from TOML configs.
//!
//! Each `.toml` file in `packages/dataset/datasets/` is baked into the
//! binary at compile time via [`include_str!`]. Adding a dataset is as
//! simple as creating a new TOML file and adding it to the list below, or
//! dropping it into a directory passed to [`DatasetRegistry::load`].

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use govdata_indicator_models::Category;

use crate::RegistryError;
use crate::descriptor::{DatasetDescriptor, parse_dataset_toml};

/// TOML configs embedded at compile time.
const DATASET_TOMLS: &[(&str, &str)] = &[
    // ── Population ───────────────────────────────────────────────────
    (
        "census_population",
        include_str!("../datasets/census_population.toml"),
    ),
    // ── Environment ──────────────────────────────────────────────────
    (
        "realtime_air_quality",
        include_str!("../datasets/realtime_air_quality.toml"),
    ),
];

/// Version of the embedded registry layout.
pub const REGISTRY_VERSION: &str = "1.0";

/// Total number of embedded datasets (used in tests).
#[cfg(test)]
const EXPECTED_DATASET_COUNT: usize = 2;

/// Summary information about a loaded registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryMetadata {
    /// Registry layout version.
    pub version: &'static str,
    /// Number of descriptors.
    pub total_datasets: usize,
    /// Distinct categories in registry order.
    pub categories: Vec<Category>,
}

/// Indexed, immutable set of dataset descriptors.
#[derive(Debug, Clone)]
pub struct DatasetRegistry {
    datasets: Vec<DatasetDescriptor>,
    by_id: BTreeMap<String, usize>,
}

impl DatasetRegistry {
    /// Builds a registry from already-parsed descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if any descriptor is invalid or two
    /// descriptors share an id.
    pub fn new(datasets: Vec<DatasetDescriptor>) -> Result<Self, RegistryError> {
        let mut by_id = BTreeMap::new();
        for (idx, dataset) in datasets.iter().enumerate() {
            dataset.validate()?;
            if by_id.insert(dataset.id.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateId {
                    id: dataset.id.clone(),
                });
            }
        }
        Ok(Self { datasets, by_id })
    }

    /// Loads only the descriptors embedded in the binary.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if an embedded config is malformed.
    pub fn embedded() -> Result<Self, RegistryError> {
        Self::new(embedded_descriptors()?)
    }

    /// Loads the embedded descriptors plus every `*.toml` file in
    /// `extra_dir`, if given.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the directory cannot be read, a file is
    /// malformed, or an id is repeated.
    pub fn load(extra_dir: Option<&Path>) -> Result<Self, RegistryError> {
        let mut datasets = embedded_descriptors()?;

        if let Some(dir) = extra_dir {
            let mut paths = Vec::new();
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                    paths.push(path);
                }
            }
            paths.sort();

            for path in &paths {
                let contents = std::fs::read_to_string(path)?;
                let name = path.display().to_string();
                datasets.push(parse_dataset_toml(&name, &contents)?);
            }
            log::info!(
                "Loaded {} additional dataset(s) from {}",
                paths.len(),
                dir.display()
            );
        }

        Self::new(datasets)
    }

    /// Returns every descriptor in registry order.
    #[must_use]
    pub fn all_datasets(&self) -> &[DatasetDescriptor] {
        &self.datasets
    }

    /// Looks up a descriptor by id.
    #[must_use]
    pub fn dataset(&self, id: &str) -> Option<&DatasetDescriptor> {
        self.by_id.get(id).map(|&idx| &self.datasets[idx])
    }

    /// Returns descriptors in the given category.
    #[must_use]
    pub fn datasets_by_category(&self, category: Category) -> Vec<&DatasetDescriptor> {
        self.datasets
            .iter()
            .filter(|d| d.category == category)
            .collect()
    }

    /// Returns the distinct categories present, in registry order.
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        let mut categories = Vec::new();
        for dataset in &self.datasets {
            if !categories.contains(&dataset.category) {
                categories.push(dataset.category);
            }
        }
        categories
    }

    /// Returns the descriptors that should be fetched at `now`.
    ///
    /// `last_fetch_times` maps dataset id to its last successful fetch. A
    /// dataset missing from the map has never succeeded and is always due.
    #[must_use]
    pub fn datasets_due_for_refresh(
        &self,
        last_fetch_times: &BTreeMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<&DatasetDescriptor> {
        self.datasets
            .iter()
            .filter(|d| d.is_due(last_fetch_times.get(&d.id).copied(), now))
            .collect()
    }

    /// Returns summary information about this registry.
    #[must_use]
    pub fn metadata(&self) -> RegistryMetadata {
        RegistryMetadata {
            version: REGISTRY_VERSION,
            total_datasets: self.datasets.len(),
            categories: self.categories(),
        }
    }
}

fn embedded_descriptors() -> Result<Vec<DatasetDescriptor>, RegistryError> {
    DATASET_TOMLS
        .iter()
        .map(|(name, toml)| parse_dataset_toml(&format!("{name}.toml"), toml))
        .collect()
}
