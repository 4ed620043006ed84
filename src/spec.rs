//! Specification input: the declarative description of the mart tables to
//! build.
//!
//! One [`UnitRecord`] describes one transformation unit; a group of records
//! sharing a final table name forms a transformation chain. Codes are
//! validated here, at the loading boundary, so the compiler downstream only
//! ever sees closed enums.

use crate::catalog::Projection;
use crate::error::{MartError, MartResult};
use crate::model::{Cardinality, RefStatus, TableRole};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One transformation-unit record, as loaded from a spec file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Table type: `m` (main) or `d` (dimension).
    pub table_type: String,
    /// The table this unit's join is rooted at.
    pub central_table: String,
    /// Reference direction: `exported` or `imported`.
    pub status: String,
    /// Overrides the resolver's primary key for this unit when set.
    #[serde(default)]
    pub primary_key: Option<String>,
    pub referenced_table: String,
    /// Cardinality code: `11`, `1n`, `n1`, `n1r` or `0n`.
    pub cardinality: String,
    #[serde(default)]
    pub central_extension: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    /// Order of this unit within its transformation.
    pub sequence: u32,
    #[serde(default)]
    pub central_columns: Vec<String>,
    #[serde(default)]
    pub central_aliases: Vec<String>,
    #[serde(default)]
    pub referenced_columns: Vec<String>,
    #[serde(default)]
    pub referenced_aliases: Vec<String>,
    /// User-facing name of the transformation's final table.
    pub final_table_name: String,
    /// For dimensions: fold this dimension's filter back onto the main table.
    #[serde(default)]
    pub include_central_filter: bool,
}

/// One dataset's specification: identity plus its unit records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    pub target_schema: String,
    /// The column every final table is keyed by.
    pub dataset_key: String,
    pub units: Vec<UnitRecord>,
}

/// A specification file: one or more datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecFile {
    pub datasets: Vec<DatasetSpec>,
}

impl SpecFile {
    /// Load from a JSON string.
    pub fn from_json(json: &str) -> MartResult<Self> {
        serde_json::from_str(json).map_err(|e| MartError::spec(format!("invalid spec JSON: {}", e)))
    }

    /// Load from a TOML string.
    pub fn from_toml(input: &str) -> MartResult<Self> {
        toml::from_str(input).map_err(|e| MartError::spec(format!("invalid spec TOML: {}", e)))
    }

    /// Load from a file path (format detected by extension; JSON default).
    pub fn from_file(path: &Path) -> MartResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MartError::spec(format!("cannot read '{}': {}", path.display(), e)))?;
        if path.extension().map(|e| e == "toml").unwrap_or(false) {
            Self::from_toml(&content)
        } else {
            Self::from_json(&content)
        }
    }
}

/// A unit record after boundary validation: codes become enums, projections
/// become [`Projection`] values.
#[derive(Debug, Clone)]
pub struct ValidatedRecord {
    pub role: TableRole,
    pub central_table: String,
    pub status: RefStatus,
    pub primary_key: Option<String>,
    pub referenced_table: String,
    pub cardinality: Cardinality,
    pub central_extension: Option<String>,
    pub extension: Option<String>,
    pub sequence: u32,
    pub central_projection: Projection,
    pub referenced_projection: Projection,
    pub final_table_name: String,
    pub include_central_filter: bool,
}

impl TryFrom<&UnitRecord> for ValidatedRecord {
    type Error = MartError;

    fn try_from(r: &UnitRecord) -> MartResult<Self> {
        if r.referenced_table.is_empty() {
            return Err(MartError::spec(format!(
                "unit {} of '{}' names no referenced table",
                r.sequence, r.final_table_name
            )));
        }
        Ok(Self {
            role: TableRole::from_code(&r.table_type)?,
            central_table: r.central_table.clone(),
            status: RefStatus::from_code(&r.status)?,
            primary_key: r.primary_key.clone().filter(|k| !k.is_empty()),
            referenced_table: r.referenced_table.clone(),
            cardinality: Cardinality::from_code(&r.cardinality)?,
            central_extension: r.central_extension.clone().filter(|e| !e.is_empty()),
            extension: r.extension.clone().filter(|e| !e.is_empty()),
            sequence: r.sequence,
            central_projection: Projection::from_lists(&r.central_columns, &r.central_aliases),
            referenced_projection: Projection::from_lists(
                &r.referenced_columns,
                &r.referenced_aliases,
            ),
            final_table_name: r.final_table_name.clone(),
            include_central_filter: r.include_central_filter,
        })
    }
}
