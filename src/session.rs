//! A session owns one generation run: the catalog snapshot, the resolver
//! strategy, and the datasets built from the specification.
//!
//! There is no process-wide state; everything an emission needs is threaded
//! through this object.

use crate::catalog::{
    CatalogSnapshot, DeclaredKeyResolver, InferredKeyResolver, Projection, RelationResolver,
};
use crate::dataset::Dataset;
use crate::emitter::{self, ScriptItem};
use crate::error::{MartError, MartResult};
use crate::model::TableRole;
use crate::pipeline::Transformation;
use crate::spec::{SpecFile, ValidatedRecord};
use crate::step::{ColumnPolicy, Step};
use std::path::{Path, PathBuf};

/// Which relation-resolution strategy to use against the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverKind {
    /// Native foreign-key catalog metadata.
    #[default]
    Declared,
    /// Name-based inference for engines without FK introspection.
    Inferred,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub resolver: ResolverKind,
}

/// One mart-generation run.
pub struct Session {
    snapshot: CatalogSnapshot,
    options: SessionOptions,
    datasets: Vec<Dataset>,
}

impl Session {
    pub fn new(snapshot: CatalogSnapshot, options: SessionOptions) -> Self {
        Self {
            snapshot,
            options,
            datasets: Vec::new(),
        }
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    /// Resolve the specification against the snapshot and build the dataset
    /// transformations. Fails fast: unknown tables, columns or codes are
    /// surfaced here, before any SQL exists.
    pub fn load_spec(&mut self, spec: &SpecFile) -> MartResult<()> {
        let built = {
            let resolver: Box<dyn RelationResolver + '_> = match self.options.resolver {
                ResolverKind::Declared => Box::new(DeclaredKeyResolver::new(&self.snapshot)),
                ResolverKind::Inferred => Box::new(InferredKeyResolver::new(&self.snapshot)),
            };

            let mut built = Vec::new();
            for ds_spec in &spec.datasets {
                let mut dataset = Dataset::new(
                    &ds_spec.name,
                    &ds_spec.target_schema,
                    &ds_spec.dataset_key,
                );

                // group records by final table, preserving spec order
                let mut groups: Vec<(String, Vec<ValidatedRecord>)> = Vec::new();
                for record in &ds_spec.units {
                    let record = ValidatedRecord::try_from(record)?;
                    match groups.iter_mut().find(|(n, _)| *n == record.final_table_name) {
                        Some((_, records)) => records.push(record),
                        None => groups.push((record.final_table_name.clone(), vec![record])),
                    }
                }

                for (final_name, mut records) in groups {
                    records.sort_by_key(|r| r.sequence);
                    let first = &records[0];
                    if records.iter().any(|r| r.role != first.role) {
                        return Err(MartError::spec(format!(
                            "transformation '{}' mixes main and dimension records",
                            final_name
                        )));
                    }
                    // the start table is established once per transformation;
                    // a later record may leave the central side unspecified,
                    // but an explicit one must agree with the first
                    for record in &records[1..] {
                        let unspecified = record.central_projection == Projection::All
                            && record.central_extension.is_none();
                        if !unspecified
                            && (record.central_projection != first.central_projection
                                || record.central_extension != first.central_extension)
                        {
                            return Err(MartError::spec(format!(
                                "transformation '{}' has conflicting central projections across its units",
                                final_name
                            )));
                        }
                    }

                    let mut start =
                        resolver.table(&first.central_table, &first.central_projection)?;
                    start.central_extension = first.central_extension.clone();

                    let mut tr = Transformation::new(
                        &final_name,
                        first.role,
                        start,
                        &ds_spec.target_schema,
                    );
                    tr.central = first.role == TableRole::Dimension
                        && records.iter().any(|r| r.include_central_filter);

                    for record in &records {
                        let step = build_step(resolver.as_ref(), record, &ds_spec.target_schema)?;
                        tr.push_step(step);
                    }
                    dataset.push_transformation(tr);
                }
                built.push(dataset);
            }
            built
        };
        self.datasets.extend(built);
        Ok(())
    }

    /// Run every pipeline and both assembly passes. Staging numbers are
    /// threaded across datasets so one script never creates the same
    /// `TEMP<n>` twice. Safe to call more than once; compiled transformations
    /// and folded dimensions are skipped.
    pub fn compile(&mut self) -> MartResult<()> {
        let mut next_temp = 0;
        for dataset in &mut self.datasets {
            next_temp = dataset.transform_all_from(next_temp)?;
        }
        Ok(())
    }

    /// The ordered script, without writing it anywhere.
    pub fn emit_items(&self) -> MartResult<Vec<ScriptItem>> {
        emitter::emit(&self.datasets)
    }

    /// Compile if needed and append the full script to `path`.
    pub fn generate_ddl(&mut self, path: &Path) -> MartResult<PathBuf> {
        self.compile()?;
        emitter::generate_ddl(&self.datasets, path)
    }
}

/// Resolve one unit record into a join step against its referenced table.
fn build_step(
    resolver: &dyn RelationResolver,
    record: &ValidatedRecord,
    target_schema: &str,
) -> MartResult<Step> {
    let mut ref_table = if record.referenced_table == record.central_table {
        // self-referencing join: the start table appears as its own reference
        let key = match &record.primary_key {
            Some(key) => key.clone(),
            None => resolver.primary_key(&record.central_table)?,
        };
        let mut t = resolver.table(&record.referenced_table, &record.referenced_projection)?;
        t.primary_key = Some(key.clone());
        t.foreign_key = Some(key);
        t.status = Some(record.status);
        t
    } else {
        let candidates = match record.status {
            crate::model::RefStatus::Exported => {
                resolver.exported_key_tables(&record.central_table, &record.referenced_projection)?
            }
            crate::model::RefStatus::Imported => {
                resolver.imported_key_tables(&record.central_table, &record.referenced_projection)?
            }
        };
        candidates
            .into_iter()
            .find(|t| t.name == record.referenced_table)
            .ok_or_else(|| {
                MartError::spec(format!(
                    "table '{}' is not {} by '{}' in the catalog",
                    record.referenced_table,
                    record.status.code(),
                    record.central_table
                ))
            })?
    };

    if let Some(key) = &record.primary_key {
        ref_table.primary_key = Some(key.clone());
    }
    ref_table.cardinality = Some(record.cardinality);
    ref_table.extension = record.extension.clone();

    Ok(Step::join(
        ref_table,
        record.cardinality,
        ColumnPolicy::AddAll,
        target_schema,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::chado_snapshot;
    use crate::spec::{DatasetSpec, UnitRecord};

    fn unit(
        seq: u32,
        table_type: &str,
        status: &str,
        referenced: &str,
        cardinality: &str,
        final_name: &str,
    ) -> UnitRecord {
        UnitRecord {
            table_type: table_type.to_string(),
            central_table: "feature".to_string(),
            status: status.to_string(),
            primary_key: None,
            referenced_table: referenced.to_string(),
            cardinality: cardinality.to_string(),
            central_extension: None,
            extension: None,
            sequence: seq,
            central_columns: vec![],
            central_aliases: vec![],
            referenced_columns: vec![],
            referenced_aliases: vec![],
            final_table_name: final_name.to_string(),
            include_central_filter: false,
        }
    }

    fn fly_spec() -> SpecFile {
        SpecFile {
            datasets: vec![DatasetSpec {
                name: "fly".to_string(),
                target_schema: "mart".to_string(),
                dataset_key: "feature_id".to_string(),
                units: vec![
                    unit(1, "m", "imported", "cvterm", "n1", "fly__feature__main"),
                    unit(2, "m", "exported", "feature", "11", "fly__feature__main"),
                ],
            }],
        }
    }

    #[test]
    fn test_session_builds_and_compiles_fly_main() {
        let mut session = Session::new(chado_snapshot(), SessionOptions::default());
        session.load_spec(&fly_spec()).unwrap();
        session.compile().unwrap();

        let ds = &session.datasets()[0];
        assert_eq!(ds.transformations.len(), 1);
        let tr = &ds.transformations[0];
        assert!(tr.is_compiled());

        let first = tr.steps[0].sql.as_ref().unwrap();
        assert!(first.contains("LEFT JOIN cvterm"));
        let second = tr.steps[1].sql.as_ref().unwrap();
        assert!(second.contains("CREATE TABLE mart.fly__feature__main"));
        assert!(second.contains("feature_id_TEMP0"));
    }

    #[test]
    fn test_unknown_referenced_table_fails_before_sql() {
        let mut spec = fly_spec();
        spec.datasets[0].units[0].referenced_table = "nonexistent".to_string();
        let mut session = Session::new(chado_snapshot(), SessionOptions::default());
        let err = session.load_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
        assert!(session.datasets().is_empty() || session.datasets()[0].transformations.is_empty());
    }

    #[test]
    fn test_unknown_cardinality_fails_at_load() {
        let mut spec = fly_spec();
        spec.datasets[0].units[0].cardinality = "banana".to_string();
        let mut session = Session::new(chado_snapshot(), SessionOptions::default());
        assert!(session.load_spec(&spec).is_err());
    }

    #[test]
    fn test_inferred_resolver_reaches_the_same_tables() {
        let mut session = Session::new(
            chado_snapshot(),
            SessionOptions {
                resolver: ResolverKind::Inferred,
            },
        );
        session.load_spec(&fly_spec()).unwrap();
        session.compile().unwrap();
        assert!(session.datasets()[0].transformations[0].is_compiled());
    }

    #[test]
    fn test_conflicting_central_projections_rejected() {
        let mut spec = fly_spec();
        spec.datasets[0].units[0].central_columns =
            vec!["feature_id".to_string(), "name".to_string()];
        spec.datasets[0].units[1].central_columns = vec!["feature_id".to_string()];
        let mut session = Session::new(chado_snapshot(), SessionOptions::default());
        let err = session.load_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("conflicting central projections"));
    }

    #[test]
    fn test_later_unit_may_leave_central_side_unspecified() {
        let mut spec = fly_spec();
        spec.datasets[0].units[0].central_columns = vec![
            "feature_id".to_string(),
            "name".to_string(),
            "cvterm_id".to_string(),
        ];
        // second unit names no central columns at all; the first one governs
        let mut session = Session::new(chado_snapshot(), SessionOptions::default());
        session.load_spec(&spec).unwrap();
        session.compile().unwrap();
        let tr = &session.datasets()[0].transformations[0];
        assert!(tr.is_compiled());
        assert_eq!(tr.start_table.column_names().len(), 3);
    }

    #[test]
    fn test_mixed_roles_in_one_transformation_rejected() {
        let mut spec = fly_spec();
        spec.datasets[0].units[1].table_type = "d".to_string();
        let mut session = Session::new(chado_snapshot(), SessionOptions::default());
        let err = session.load_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("mixes main and dimension"));
    }
}
