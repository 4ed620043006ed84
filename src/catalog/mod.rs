//! Schema catalog: snapshots of source-database metadata and the two
//! relation-resolution strategies that turn them into referenced-table
//! descriptors.
//!
//! A [`CatalogSnapshot`] is a deterministic, serializable picture of one
//! source schema. It can come from a live Postgres introspection
//! ([`postgres::PgIntrospector`]) or from a JSON file, so runs are
//! reproducible without a database.

pub mod postgres;

use crate::error::{MartError, MartResult};
use crate::model::{Column, RefStatus, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A column as seen in the source catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotColumn {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

/// A declared foreign key: `column` on this table references
/// `referenced_table.referenced_column`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// One table's worth of catalog metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTable {
    pub name: String,
    pub columns: Vec<SnapshotColumn>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyRef>,
}

impl SnapshotTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Builder: add a column.
    pub fn column(mut self, name: &str) -> Self {
        self.columns.push(SnapshotColumn {
            name: name.to_string(),
            data_type: None,
        });
        self
    }

    /// Builder: add a primary-key column (also added to the column list).
    pub fn pk(mut self, name: &str) -> Self {
        self.primary_key.push(name.to_string());
        self.column(name)
    }

    /// Builder: add a foreign-key column (also added to the column list).
    pub fn fk(mut self, column: &str, referenced_table: &str, referenced_column: &str) -> Self {
        self.foreign_keys.push(ForeignKeyRef {
            column: column.to_string(),
            referenced_table: referenced_table.to_string(),
            referenced_column: referenced_column.to_string(),
        });
        self.column(column)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Deterministic snapshot of one source schema's metadata.
///
/// Tables are keyed in a `BTreeMap` so iteration order, and therefore every
/// derived artifact, is stable across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// The source schema the snapshot was taken from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub tables: BTreeMap<String, SnapshotTable>,
}

impl CatalogSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: SnapshotTable) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn table(&self, name: &str) -> MartResult<&SnapshotTable> {
        self.tables
            .get(name)
            .ok_or_else(|| MartError::spec(format!("table '{}' does not exist in the catalog", name)))
    }

    /// Load a snapshot from a JSON string.
    pub fn from_json(json: &str) -> MartResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| MartError::Metadata(format!("invalid snapshot JSON: {}", e)))
    }

    pub fn to_json(&self) -> MartResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MartError::Metadata(format!("snapshot serialization failed: {}", e)))
    }

    /// Load a snapshot from a file path.
    pub fn from_file(path: &Path) -> MartResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MartError::Metadata(format!("cannot read '{}': {}", path.display(), e)))?;
        Self::from_json(&content)
    }
}

/// A column projection from the specification: either every column (`%`)
/// or an explicit list with optional aliases.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<ProjectedColumn>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedColumn {
    pub name: String,
    pub alias: Option<String>,
}

impl Projection {
    pub fn all() -> Self {
        Self::All
    }

    /// Build a projection from parallel name/alias lists. An empty name list
    /// or the single entry `%` selects every column; an empty alias string
    /// means "no alias" for that position.
    pub fn from_lists(names: &[String], aliases: &[String]) -> Self {
        if names.is_empty() || (names.len() == 1 && names[0] == "%") {
            return Self::All;
        }
        let cols = names
            .iter()
            .enumerate()
            .map(|(i, name)| ProjectedColumn {
                name: name.clone(),
                alias: aliases.get(i).filter(|a| !a.is_empty()).cloned(),
            })
            .collect();
        Self::Columns(cols)
    }

    /// Materialize this projection against a catalog table. Projected columns
    /// that do not exist are a specification error, surfaced before any SQL
    /// is emitted.
    pub fn apply(&self, table: &SnapshotTable) -> MartResult<Vec<Column>> {
        match self {
            Self::All => Ok(table
                .columns
                .iter()
                .map(|c| Column::new(&table.name, &c.name))
                .collect()),
            Self::Columns(cols) => {
                let mut out = Vec::with_capacity(cols.len());
                for pc in cols {
                    if !table.has_column(&pc.name) {
                        return Err(MartError::spec(format!(
                            "column '{}' does not exist in table '{}'",
                            pc.name, table.name
                        )));
                    }
                    out.push(match &pc.alias {
                        Some(alias) => Column::aliased(&table.name, &pc.name, alias),
                        None => Column::new(&table.name, &pc.name),
                    });
                }
                Ok(out)
            }
        }
    }
}

/// Resolution of one-FK-hop relationships over a snapshot.
///
/// Two strategies exist: [`DeclaredKeyResolver`] drives off native foreign-key
/// catalog metadata; [`InferredKeyResolver`] infers relationships on engines
/// without FK introspection by matching column names against each table's
/// single detected primary key.
pub trait RelationResolver {
    /// The single primary-key column of a table. Composite keys are rejected
    /// explicitly rather than silently picking one column.
    fn primary_key(&self, table: &str) -> MartResult<String>;

    /// Tables holding a foreign key that references `table`'s primary key.
    fn exported_key_tables(&self, table: &str, projection: &Projection) -> MartResult<Vec<Table>>;

    /// Tables whose primary key is referenced by a foreign key held on `table`.
    fn imported_key_tables(&self, table: &str, projection: &Projection) -> MartResult<Vec<Table>>;

    /// Union of both directions, sorted by table name.
    fn referenced_tables(&self, table: &str, projection: &Projection) -> MartResult<Vec<Table>> {
        let mut refs = self.exported_key_tables(table, projection)?;
        refs.extend(self.imported_key_tables(table, projection)?);
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    /// A plain descriptor for a named table, with its key when unambiguous.
    fn table(&self, name: &str, projection: &Projection) -> MartResult<Table>;
}

fn single_key(table: &SnapshotTable) -> MartResult<String> {
    match table.primary_key.len() {
        1 => Ok(table.primary_key[0].clone()),
        0 => Err(MartError::catalog(
            &table.name,
            "no primary key could be determined",
        )),
        n => Err(MartError::catalog(
            &table.name,
            format!("composite primary key ({} columns) is not supported", n),
        )),
    }
}

fn descriptor(
    source: &SnapshotTable,
    primary_key: &str,
    foreign_key: &str,
    status: RefStatus,
    projection: &Projection,
) -> MartResult<Table> {
    let mut t = Table::new(&source.name).with_columns(projection.apply(source)?);
    t.primary_key = Some(primary_key.to_string());
    t.foreign_key = Some(foreign_key.to_string());
    t.status = Some(status);
    Ok(t)
}

/// Relation resolution backed by declared foreign-key metadata.
pub struct DeclaredKeyResolver<'a> {
    snapshot: &'a CatalogSnapshot,
}

impl<'a> DeclaredKeyResolver<'a> {
    pub fn new(snapshot: &'a CatalogSnapshot) -> Self {
        Self { snapshot }
    }
}

impl RelationResolver for DeclaredKeyResolver<'_> {
    fn primary_key(&self, table: &str) -> MartResult<String> {
        single_key(self.snapshot.table(table)?)
    }

    fn exported_key_tables(&self, table: &str, projection: &Projection) -> MartResult<Vec<Table>> {
        self.snapshot.table(table)?;
        let mut out = Vec::new();
        for other in self.snapshot.tables.values() {
            for fk in &other.foreign_keys {
                if fk.referenced_table == table {
                    out.push(descriptor(
                        other,
                        &fk.referenced_column,
                        &fk.column,
                        RefStatus::Exported,
                        projection,
                    )?);
                }
            }
        }
        Ok(out)
    }

    fn imported_key_tables(&self, table: &str, projection: &Projection) -> MartResult<Vec<Table>> {
        let start = self.snapshot.table(table)?;
        let mut out = Vec::new();
        for fk in &start.foreign_keys {
            let referenced = self.snapshot.table(&fk.referenced_table)?;
            out.push(descriptor(
                referenced,
                &fk.referenced_column,
                &fk.column,
                RefStatus::Imported,
                projection,
            )?);
        }
        Ok(out)
    }

    /// Union of both directions, plus the starting table itself appended once
    /// more so recursive self-referencing joins can be expressed.
    fn referenced_tables(&self, table: &str, projection: &Projection) -> MartResult<Vec<Table>> {
        let mut refs = self.exported_key_tables(table, projection)?;
        refs.extend(self.imported_key_tables(table, projection)?);
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        let start = self.snapshot.table(table)?;
        let key = single_key(start).ok();
        if let Some(key) = key {
            refs.push(descriptor(
                start,
                &key,
                &key,
                RefStatus::Exported,
                projection,
            )?);
        }
        Ok(refs)
    }

    fn table(&self, name: &str, projection: &Projection) -> MartResult<Table> {
        let source = self.snapshot.table(name)?;
        let mut t = Table::new(name).with_columns(projection.apply(source)?);
        t.primary_key = single_key(source).ok();
        Ok(t)
    }
}

/// Relation resolution for engines without FK introspection.
///
/// A single detected primary key per table is treated as the join handle;
/// a same-named column on any other table is an implied foreign key.
pub struct InferredKeyResolver<'a> {
    snapshot: &'a CatalogSnapshot,
}

impl<'a> InferredKeyResolver<'a> {
    pub fn new(snapshot: &'a CatalogSnapshot) -> Self {
        Self { snapshot }
    }
}

impl RelationResolver for InferredKeyResolver<'_> {
    fn primary_key(&self, table: &str) -> MartResult<String> {
        single_key(self.snapshot.table(table)?)
    }

    fn exported_key_tables(&self, table: &str, projection: &Projection) -> MartResult<Vec<Table>> {
        let key = self.primary_key(table)?;
        let mut out = Vec::new();
        for other in self.snapshot.tables.values() {
            if other.name != table && other.has_column(&key) {
                out.push(descriptor(other, &key, &key, RefStatus::Exported, projection)?);
            }
        }
        Ok(out)
    }

    fn imported_key_tables(&self, table: &str, projection: &Projection) -> MartResult<Vec<Table>> {
        let start = self.snapshot.table(table)?;
        let mut out = Vec::new();
        for other in self.snapshot.tables.values() {
            if other.name == table {
                continue;
            }
            // Only tables with a single unambiguous key participate.
            let Ok(key) = single_key(other) else { continue };
            if start.has_column(&key) {
                out.push(descriptor(other, &key, &key, RefStatus::Imported, projection)?);
            }
        }
        Ok(out)
    }

    fn table(&self, name: &str, projection: &Projection) -> MartResult<Table> {
        let source = self.snapshot.table(name)?;
        let mut t = Table::new(name).with_columns(projection.apply(source)?);
        t.primary_key = single_key(source).ok();
        Ok(t)
    }
}
