//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{Defaults, InstanceSpec, ManagerSettings, RawDocument};
use crate::config::validation::{validate_defaults, validate_instance, validate_settings, ValidationError};

/// The instance document is malformed or incomplete.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing required top-level key `{0}`")]
    MissingKey(&'static str),

    #[error("`instances` must contain at least one entry")]
    EmptyInstances,

    #[error("Validation failed: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

/// Manager settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse an instance document into its defaults and ordered instance entries.
pub fn load(document: &str) -> Result<(Defaults, Vec<InstanceSpec>), SchemaError> {
    let raw: RawDocument = serde_yaml::from_str(document)?;

    let defaults = raw.defaults.ok_or(SchemaError::MissingKey("defaults"))?;
    let instances = raw.instances.ok_or(SchemaError::MissingKey("instances"))?;
    if instances.is_empty() {
        return Err(SchemaError::EmptyInstances);
    }

    let mut errors = validate_defaults(&defaults);
    for (index, entry) in instances.iter().enumerate() {
        errors.extend(validate_instance(index, entry));
    }
    if !errors.is_empty() {
        return Err(SchemaError::Invalid(errors));
    }

    let specs = instances
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            Some(InstanceSpec {
                index,
                user: entry.user?,
                symbols: entry.symbols?,
                overrides: entry.overrides,
            })
        })
        .collect();

    Ok((defaults, specs))
}

/// Read and parse the instance document at `path`.
pub fn load_document(path: &Path) -> Result<(Defaults, Vec<InstanceSpec>), SchemaError> {
    let content = fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load(&content)
}

/// Load and validate manager settings from a TOML file.
pub fn load_settings(path: &Path) -> Result<ManagerSettings, SettingsError> {
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let settings: ManagerSettings = toml::from_str(&content)?;

    validate_settings(&settings).map_err(SettingsError::Invalid)?;

    Ok(settings)
}
