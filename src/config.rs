//! Engine configuration, loaded from a JSON file.

use crate::schema::BASE_ENTITY_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("configuration error: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: String) -> Self {
        Self { message }
    }
}

/// How the backing store compares text. The in-memory evaluator reads the
/// same values, so both paths agree on what matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseSensitivity {
    /// `=` distinguishes case
    pub equal: bool,
    /// `LIKE` distinguishes case
    pub like: bool,
}

impl Default for CaseSensitivity {
    // PostgreSQL with a deterministic collation
    fn default() -> Self {
        Self {
            equal: true,
            like: true,
        }
    }
}

/// Names of the generic tables of the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreLayout {
    /// Every record, with its type and its search text
    pub entity_table: String,
    pub relation_table: String,
    pub property_table: String,
    /// Prefix prepended to the custom field side tables
    pub custom_field_table_prefix: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            entity_table: "creme_core_cremeentity".to_string(),
            relation_table: "creme_core_relation".to_string(),
            property_table: "creme_core_cremeproperty".to_string(),
            custom_field_table_prefix: "creme_core_".to_string(),
        }
    }
}

/// Configuration for SQL optimization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Number of OR-ed equality values from which an IN list is emitted
    pub max_or_conditions_for_in: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_or_conditions_for_in: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Record type id to table name
    pub table_mapping: HashMap<String, String>,
    pub store_layout: StoreLayout,
    pub case_sensitivity: CaseSensitivity,
    /// Maximum number of components of a field path (`image__name` is 2)
    pub max_field_depth: usize,
    pub optimization: OptimizationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut table_mapping = HashMap::new();
        table_mapping.insert("persons.contact".to_string(), "persons_contact".to_string());
        table_mapping.insert(
            "persons.organisation".to_string(),
            "persons_organisation".to_string(),
        );
        table_mapping.insert("documents.document".to_string(), "documents_document".to_string());
        table_mapping.insert("documents.folder".to_string(), "documents_folder".to_string());

        Self {
            table_mapping,
            store_layout: StoreLayout::default(),
            case_sensitivity: CaseSensitivity::default(),
            max_field_depth: 2,
            optimization: OptimizationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load the configuration from a JSON file; missing keys take their
    /// default value.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::new(format!(
                "configuration file not found: {}",
                path_ref.display()
            )));
        }

        let content = fs::read_to_string(path_ref).map_err(|e| {
            ConfigError::new(format!("cannot read {}: {}", path_ref.display(), e))
        })?;

        Self::from_json_str(&content).map_err(|e| {
            ConfigError::new(format!("{}: {}", path_ref.display(), e.message))
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(content)
            .map_err(|e| ConfigError::new(format!("invalid JSON: {}", e)))?;

        if config.max_field_depth == 0 {
            return Err(ConfigError::new(
                "max_field_depth must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    /// Table of a record type; unmapped types use their lower-cased id.
    pub fn get_table_name(&self, record_type: &str) -> String {
        self.table_mapping
            .get(record_type)
            .cloned()
            .unwrap_or_else(|| record_type.to_lowercase().replace('.', "_"))
    }

    /// Table holding the records of a type; the generic entity type lives
    /// in the entity table.
    pub fn record_table(&self, record_type: &str) -> String {
        if record_type == BASE_ENTITY_TYPE {
            self.store_layout.entity_table.clone()
        } else {
            self.get_table_name(record_type)
        }
    }

    pub fn custom_field_table(&self, side_table: &str) -> String {
        format!("{}{}", self.store_layout.custom_field_table_prefix, side_table)
    }
}
