//! Pipeline configuration.
//!
//! A [`Config`] is built once per run, either from [`get_default_config`] or
//! loaded from JSON, and is only ever read afterwards. Flows hand it to every
//! transform and sink by shared reference.
//!
//! ```json
//! {
//!   "incremental_column": { "name": "batch_id", "data_type": "int64" },
//!   "character_translation_map": { "&": "_and_" }
//! }
//! ```
//!
//! Fields left out of a JSON file keep their default values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{EtlError, EtlResult, StorageError};
use crate::frame::DataType;

// =============================================================================
// Column descriptors
// =============================================================================

/// The watermark column used for incremental extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalColumn {
    pub name: String,
    pub data_type: DataType,
}

impl IncrementalColumn {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Meaning of an audit column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditRole {
    CreatedAt,
    ModifiedAt,
    DeletedAt,
    ValidFrom,
    ValidTo,
}

impl fmt::Display for AuditRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditRole::CreatedAt => "created_at",
            AuditRole::ModifiedAt => "modified_at",
            AuditRole::DeletedAt => "deleted_at",
            AuditRole::ValidFrom => "valid_from",
            AuditRole::ValidTo => "valid_to",
        };
        f.write_str(name)
    }
}

/// How a freshly stamped audit column is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDefault {
    /// The run's clock value, identical for every row.
    CurrentTimestamp,
    Null,
}

/// A metadata column stamped onto every processed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditColumn {
    pub name: String,
    pub role: AuditRole,
    pub default: AuditDefault,
}

impl AuditColumn {
    pub fn new(name: impl Into<String>, role: AuditRole, default: AuditDefault) -> Self {
        Self {
            name: name.into(),
            role,
            default,
        }
    }
}

/// Column receiving dimension surrogate keys in fact lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurrogateKeyColumn {
    pub name: String,
    /// Key assigned to facts with no matching dimension row.
    pub default_value: i64,
}

// =============================================================================
// Config
// =============================================================================

/// Immutable pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub incremental_column: IncrementalColumn,
    pub audit_columns: Vec<AuditColumn>,
    /// Literal substring replacements applied before snake-casing names.
    pub character_translation_map: BTreeMap<String, String>,
    pub surrogate_key_column: SurrogateKeyColumn,
}

impl Default for Config {
    fn default() -> Self {
        get_default_config()
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> EtlResult<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> EtlResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| StorageError::io(path.display().to_string(), e))?;
        Self::from_json_str(&content)
    }

    pub fn to_json_pretty(&self) -> EtlResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// First audit column with the given role.
    pub fn audit_column(&self, role: AuditRole) -> Option<&AuditColumn> {
        self.audit_columns.iter().find(|c| c.role == role)
    }

    pub fn audit_column_name(&self, role: AuditRole) -> Option<&str> {
        self.audit_column(role).map(|c| c.name.as_str())
    }

    /// Names of all audit columns, in configured order.
    pub fn audit_column_names(&self) -> Vec<&str> {
        self.audit_columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_audit_column(&self, name: &str) -> bool {
        self.audit_columns.iter().any(|c| c.name == name)
    }

    /// Default column-name normalization: translation map, then snake_case.
    pub fn normalize_column_name(&self, name: &str) -> String {
        crate::transform::normalize::to_snake_case(&crate::transform::normalize::character_translation(
            name,
            &self.character_translation_map,
        ))
    }

    fn check(&self) -> EtlResult<()> {
        if self.incremental_column.name.is_empty() {
            return Err(EtlError::Configuration(
                "incremental column name must not be empty".into(),
            ));
        }
        for (i, column) in self.audit_columns.iter().enumerate() {
            if self.audit_columns[..i].iter().any(|c| c.name == column.name) {
                return Err(EtlError::Configuration(format!(
                    "audit column '{}' is configured twice",
                    column.name
                )));
            }
        }
        if self.character_translation_map.keys().any(String::is_empty) {
            return Err(EtlError::Configuration(
                "character translation keys must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// The standard configuration used by the preset flows.
pub fn get_default_config() -> Config {
    let translations = [
        ("&", "_and_"),
        ("%", "_percent_"),
        ("#", "_number_"),
        ("+", "_plus_"),
        ("@", "_at_"),
        ("/", "_or_"),
        ("\\", "_or_"),
        ("*", "_times_"),
        (".", "_"),
        ("(", "_"),
        (")", "_"),
        ("æ", "ae"),
        ("ø", "oe"),
        ("å", "aa"),
        ("Æ", "Ae"),
        ("Ø", "Oe"),
        ("Å", "Aa"),
    ];

    Config {
        incremental_column: IncrementalColumn::new("batch_id", DataType::Int64),
        audit_columns: vec![
            AuditColumn::new("__created_at", AuditRole::CreatedAt, AuditDefault::CurrentTimestamp),
            AuditColumn::new("__modified_at", AuditRole::ModifiedAt, AuditDefault::CurrentTimestamp),
            AuditColumn::new("__deleted_at", AuditRole::DeletedAt, AuditDefault::Null),
            AuditColumn::new("__valid_from", AuditRole::ValidFrom, AuditDefault::CurrentTimestamp),
            AuditColumn::new("__valid_to", AuditRole::ValidTo, AuditDefault::Null),
        ],
        character_translation_map: translations
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect(),
        surrogate_key_column: SurrogateKeyColumn {
            name: "surrogate_key".to_string(),
            default_value: -1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_audit_columns_in_order() {
        let config = get_default_config();
        assert_eq!(
            config.audit_column_names(),
            vec!["__created_at", "__modified_at", "__deleted_at", "__valid_from", "__valid_to"]
        );
        assert_eq!(config.audit_column_name(AuditRole::ValidTo), Some("__valid_to"));
        assert_eq!(config.incremental_column.name, "batch_id");
        assert_eq!(config.surrogate_key_column.default_value, -1);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json_str(
            r#"{ "incremental_column": { "name": "load_ts", "data_type": "timestamp" } }"#,
        )
        .unwrap();
        assert_eq!(config.incremental_column.data_type, DataType::Timestamp);
        assert_eq!(config.audit_columns.len(), 5);
        assert_eq!(config.character_translation_map.get("&").map(String::as_str), Some("_and_"));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = get_default_config();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(Config::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_duplicate_audit_column_rejected() {
        let json = r#"{
            "audit_columns": [
                { "name": "__ts", "role": "created_at", "default": "current_timestamp" },
                { "name": "__ts", "role": "modified_at", "default": "current_timestamp" }
            ]
        }"#;
        assert!(matches!(Config::from_json_str(json), Err(EtlError::Configuration(_))));
    }

    #[test]
    fn test_missing_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_json_file(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, EtlError::Storage(StorageError::NotFound(_))));
    }

    #[test]
    fn test_normalize_column_name() {
        let config = get_default_config();
        assert_eq!(config.normalize_column_name("CustomerID"), "customer_id");
        assert_eq!(config.normalize_column_name("Profit&Loss"), "profit_and_loss");
    }
}
