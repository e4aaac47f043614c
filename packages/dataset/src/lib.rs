#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Dataset registry for the open-data ingestion pipeline.
//!
//! Each upstream dataset is described by a [`DatasetDescriptor`] loaded from
//! a TOML file. The [`DatasetRegistry`] indexes descriptors by id and
//! category and decides which datasets are due for a refresh. Everything in
//! this crate is pure lookup logic; no network or database access happens
//! here.

pub mod descriptor;
pub mod registry;

pub use descriptor::{DatasetDescriptor, parse_dataset_toml};
pub use registry::{DatasetRegistry, RegistryMetadata};

/// Errors that can occur while loading the dataset registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A descriptor file is not valid TOML or is missing fields.
    #[error("Failed to parse {name}: {source}")]
    Parse {
        /// Name of the offending file or embedded config.
        name: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A descriptor parsed but violates a registry constraint.
    #[error("Invalid dataset {id}: {message}")]
    Invalid {
        /// Dataset id.
        id: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Two descriptors share the same id.
    #[error("Duplicate dataset id: {id}")]
    DuplicateId {
        /// The repeated id.
        id: String,
    },

    /// I/O error while reading an external registry directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
