//! Schema entity model: tables, columns, and the closed code enums.
//!
//! These are plain value types. A new staging table is always derived from an
//! existing one with explicit overrides; nothing here shares mutable state.

use crate::error::{MartError, MartResult};
use serde::{Deserialize, Serialize};

/// Join cardinality between a staging table and a referenced table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// `11`: one-to-one.
    OneToOne,
    /// `1n`: one-to-many.
    OneToMany,
    /// `n1`: many-to-one; unmatched staging rows must be preserved.
    ManyToOne,
    /// `n1r`: recursive many-to-one (self-join).
    ManyToOneRecursive,
    /// `0n`: optional many.
    OptionalMany,
}

impl Cardinality {
    /// Parse a specification cardinality code. Unrecognized codes are a
    /// specification error, caught at the loading boundary.
    pub fn from_code(code: &str) -> MartResult<Self> {
        match code {
            "11" => Ok(Self::OneToOne),
            "1n" => Ok(Self::OneToMany),
            "n1" => Ok(Self::ManyToOne),
            "n1r" => Ok(Self::ManyToOneRecursive),
            "0n" => Ok(Self::OptionalMany),
            other => Err(MartError::spec(format!(
                "unrecognized cardinality code '{}' (expected 11, 1n, n1, n1r or 0n)",
                other
            ))),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::OneToOne => "11",
            Self::OneToMany => "1n",
            Self::ManyToOne => "n1",
            Self::ManyToOneRecursive => "n1r",
            Self::OptionalMany => "0n",
        }
    }
}

/// Direction of the foreign-key relationship a referenced table was found by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefStatus {
    /// The start table's primary key is referenced by the other table.
    Exported,
    /// The start table holds a foreign key into the other table.
    Imported,
}

impl RefStatus {
    pub fn from_code(code: &str) -> MartResult<Self> {
        match code {
            "exported" => Ok(Self::Exported),
            "imported" => Ok(Self::Imported),
            other => Err(MartError::spec(format!(
                "unrecognized reference status '{}' (expected exported or imported)",
                other
            ))),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Exported => "exported",
            Self::Imported => "imported",
        }
    }
}

/// Staging role of an intermediate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagingType {
    Temp,
    Interim,
    /// Single-column key reduction used by central-filter synthesis.
    Partition,
}

/// User-visible role of a transformation's final table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableRole {
    Main,
    Dimension,
}

impl TableRole {
    pub fn from_code(code: &str) -> MartResult<Self> {
        match code {
            "m" => Ok(Self::Main),
            "d" => Ok(Self::Dimension),
            other => Err(MartError::spec(format!(
                "unrecognized table type '{}' (expected m or d)",
                other
            ))),
        }
    }
}

/// A column descriptor carried through the staging chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Pending rename. Once a step finalizes its output table the alias is
    /// promoted into `name` and cleared; the two are never both active
    /// downstream.
    pub alias: Option<String>,
    pub original_table: String,
    pub original_name: String,
    pub final_table_name: Option<String>,
    pub deleted: bool,
    /// Marks a synthetic presence-indicator column added by a central filter.
    pub bool_flag: bool,
    /// The alias came from the user's column projection, not from collision
    /// resolution.
    pub user_alias: bool,
}

impl Column {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        let table = table.into();
        let name = name.into();
        Self {
            original_table: table,
            original_name: name.clone(),
            name,
            alias: None,
            final_table_name: None,
            deleted: false,
            bool_flag: false,
            user_alias: false,
        }
    }

    /// A column with a user-supplied alias from the specification projection.
    pub fn aliased(
        table: impl Into<String>,
        name: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        let mut col = Self::new(table, name);
        col.alias = Some(alias.into());
        col.user_alias = true;
        col
    }

    /// The name this column will carry in the next staging table.
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Promote a pending alias into the column name. Idempotent.
    pub fn promote_alias(&mut self) {
        if let Some(alias) = self.alias.take() {
            self.name = alias;
        }
    }

    /// Derive the copy of this column that lives in the next staging table.
    /// The alias (if any) becomes the name; provenance fields are kept.
    pub fn carried(&self) -> Self {
        let mut col = self.clone();
        col.promote_alias();
        col.user_alias = false;
        col
    }
}

/// A table descriptor: either a catalog table, a referenced-table view of one,
/// or a synthetic staging table produced by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub primary_key: Option<String>,
    pub foreign_key: Option<String>,
    pub cardinality: Option<Cardinality>,
    pub status: Option<RefStatus>,
    /// Row-restriction predicate ANDed into the step that joins this table.
    pub extension: Option<String>,
    /// Predicate applied to the start side of the transformation.
    pub central_extension: Option<String>,
    pub staging: Option<StagingType>,
    pub is_final: bool,
    /// The pre-rename staging name, once this table has been renamed.
    pub temp_name: Option<String>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: None,
            foreign_key: None,
            cardinality: None,
            status: None,
            extension: None,
            central_extension: None,
            staging: None,
            is_final: false,
            temp_name: None,
            columns: Vec::new(),
        }
    }

    /// Builder: set the column list.
    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    /// Builder: set the primary key.
    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = Some(key.into());
        self
    }

    /// Builder: set the row-restriction predicate.
    pub fn with_extension(mut self, predicate: impl Into<String>) -> Self {
        self.extension = Some(predicate.into());
        self
    }

    /// Derive a synthetic staging table from a merged column set. The key of
    /// the chain is carried forward so the next step can join against it.
    pub fn staged_from(name: impl Into<String>, key: Option<&str>, columns: Vec<Column>) -> Self {
        let name = name.into();
        Self {
            temp_name: Some(name.clone()),
            name,
            primary_key: key.map(str::to_string),
            foreign_key: None,
            cardinality: None,
            status: None,
            extension: None,
            central_extension: None,
            staging: Some(StagingType::Temp),
            is_final: false,
            columns,
        }
    }

    /// Whether this table holds the named column (post-alias names).
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| !c.deleted && c.name == name)
    }

    /// Names of the live columns, in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| !c.deleted)
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_codes_round_trip() {
        for code in ["11", "1n", "n1", "n1r", "0n"] {
            assert_eq!(Cardinality::from_code(code).unwrap().code(), code);
        }
    }

    #[test]
    fn test_unknown_cardinality_rejected() {
        let err = Cardinality::from_code("nn").unwrap_err();
        assert!(err.to_string().contains("unrecognized cardinality"));
    }

    #[test]
    fn test_alias_promotion_clears_alias() {
        let mut col = Column::aliased("feature", "feature_id", "feature_id_TEMP0");
        col.promote_alias();
        assert_eq!(col.name, "feature_id_TEMP0");
        assert_eq!(col.alias, None);
        assert_eq!(col.original_name, "feature_id");
        // promoting again is a no-op
        col.promote_alias();
        assert_eq!(col.name, "feature_id_TEMP0");
    }

    #[test]
    fn test_carried_column_drops_user_alias_flag() {
        let col = Column::aliased("cvterm", "name", "cvterm_name");
        let carried = col.carried();
        assert_eq!(carried.name, "cvterm_name");
        assert!(!carried.user_alias);
        assert_eq!(carried.original_table, "cvterm");
    }

    #[test]
    fn test_staged_table_carries_key() {
        let t = Table::staged_from("TEMP0", Some("feature_id"), vec![]);
        assert_eq!(t.primary_key.as_deref(), Some("feature_id"));
        assert_eq!(t.temp_name.as_deref(), Some("TEMP0"));
        assert_eq!(t.staging, Some(StagingType::Temp));
    }
}
