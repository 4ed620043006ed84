//! Datasets and the two assembly passes run after every transformation has
//! compiled: main-variant unification and central-filter synthesis.

use crate::error::{MartError, MartResult};
use crate::model::{Cardinality, RefStatus, Table, TableRole};
use crate::pipeline::Transformation;
use crate::step::{ColumnPolicy, Step};
use std::collections::BTreeSet;

/// A group of transformations materializing one mart.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub target_schema: String,
    /// The column every final table is keyed by.
    pub dataset_key: String,
    pub transformations: Vec<Transformation>,
    /// Dimension tables already folded onto main; keeps central-filter
    /// synthesis idempotent.
    folded_dms: BTreeSet<String>,
    /// Main variants already unified with the canonical main.
    unified_mains: BTreeSet<String>,
}

impl Dataset {
    pub fn new(
        name: impl Into<String>,
        target_schema: impl Into<String>,
        dataset_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target_schema: target_schema.into(),
            dataset_key: dataset_key.into(),
            transformations: Vec::new(),
            folded_dms: BTreeSet::new(),
            unified_mains: BTreeSet::new(),
        }
    }

    pub fn push_transformation(&mut self, transformation: Transformation) {
        self.transformations.push(transformation);
    }

    /// Compile every transformation, run both assembly passes, then compile
    /// whatever the assembler synthesized. A failed transformation aborts the
    /// dataset; dependents are never silently skipped.
    pub fn transform_all(&mut self) -> MartResult<()> {
        self.transform_all_from(0).map(|_| ())
    }

    /// As [`transform_all`](Self::transform_all), numbering staging tables
    /// from `first_temp`. Returns the next free staging number, so chains
    /// across datasets in one script never collide on a `TEMP<n>` name.
    pub fn transform_all_from(&mut self, first_temp: usize) -> MartResult<usize> {
        if !self
            .transformations
            .iter()
            .any(|t| t.role == TableRole::Main)
        {
            return Err(MartError::spec(format!(
                "dataset '{}' declares no main transformation",
                self.name
            )));
        }
        self.assign_temp_offsets(first_temp);
        for tr in &mut self.transformations {
            tr.transform()?;
        }
        self.assemble()?;
        let next_temp = self.assign_temp_offsets(first_temp);
        for tr in &mut self.transformations {
            tr.transform()?;
        }
        Ok(next_temp)
    }

    /// Give every not-yet-compiled chain the next disjoint staging range.
    /// Compiled chains keep their baked names; the counter walks past them,
    /// which recomputes the same ranges they were assigned.
    fn assign_temp_offsets(&mut self, first_temp: usize) -> usize {
        let mut next = first_temp;
        for tr in &mut self.transformations {
            if !tr.is_compiled() {
                tr.temp_offset = next;
            }
            next += tr.steps.len().saturating_sub(1);
        }
        next
    }

    /// Both post-processing passes. Idempotent: re-running adds nothing for
    /// variants and dimensions already handled.
    pub fn assemble(&mut self) -> MartResult<()> {
        self.unify_mains()?;
        self.synthesize_central_filters()
    }

    fn main_index(&self) -> Option<usize> {
        self.transformations
            .iter()
            .position(|t| t.role == TableRole::Main && !t.synthetic)
    }

    /// Unify independently-built main variants: the first main is canonical;
    /// every further variant gets an append-policy transformation joining the
    /// canonical main to the variant's table by the shared dataset key.
    fn unify_mains(&mut self) -> MartResult<()> {
        let mains: Vec<usize> = self
            .transformations
            .iter()
            .enumerate()
            .filter(|(_, t)| t.role == TableRole::Main && !t.synthetic)
            .map(|(i, _)| i)
            .collect();
        if mains.len() < 2 {
            return Ok(());
        }

        let canonical = self.final_table_of(mains[0])?.clone();
        let mut synthesized = Vec::new();
        for &i in &mains[1..] {
            let variant = self.final_table_of(i)?.clone();
            if self.unified_mains.contains(&variant.name) {
                continue;
            }
            if !variant.has_column(&self.dataset_key) {
                return Err(MartError::catalog(
                    &variant.name,
                    format!(
                        "main variant does not carry the dataset key '{}'",
                        self.dataset_key
                    ),
                ));
            }

            let mut ref_table = variant.clone();
            ref_table.primary_key = Some(self.dataset_key.clone());
            ref_table.foreign_key = Some(self.dataset_key.clone());
            ref_table.status = Some(RefStatus::Exported);

            let mut tr = Transformation::new(
                format!("{}__unified", variant.name),
                TableRole::Main,
                canonical.clone(),
                &self.target_schema,
            );
            tr.synthetic = true;
            tr.push_step(Step::join(
                ref_table,
                Cardinality::OneToOne,
                ColumnPolicy::Append,
                &self.target_schema,
            ));
            synthesized.push(tr);
            self.unified_mains.insert(variant.name.clone());
        }
        self.transformations.extend(synthesized);
        Ok(())
    }

    /// Fold every dimension flagged central back onto main: one synthesized
    /// transformation whose chain alternates a single-column key reduction of
    /// the dimension's final table with an indicator-adding left join. All
    /// intermediates are staging tables; only the fully augmented table,
    /// named `<main>_cf`, survives the drop pass.
    fn synthesize_central_filters(&mut self) -> MartResult<()> {
        let main_idx = self.main_index().ok_or_else(|| {
            MartError::spec(format!("dataset '{}' has no main transformation", self.name))
        })?;
        if !self.transformations[main_idx].is_compiled() {
            return Err(MartError::transformation(
                &self.transformations[main_idx].final_table_name,
                "main transformation is not compiled; aborting central-filter synthesis",
            ));
        }
        let main_final = self.final_table_of(main_idx)?.clone();

        let centrals: Vec<usize> = self
            .transformations
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.role == TableRole::Dimension
                    && t.central
                    && !t.synthetic
                    && !self.folded_dms.contains(&t.final_table_name)
            })
            .map(|(i, _)| i)
            .collect();
        if centrals.is_empty() {
            return Ok(());
        }

        let filter_name = format!("{}_cf", main_final.name);
        let mut tr = Transformation::new(
            &filter_name,
            TableRole::Main,
            main_final,
            &self.target_schema,
        );
        tr.synthetic = true;

        for i in centrals {
            let dm_name = self.transformations[i].final_table_name.clone();
            let dm_final = self.final_table_of(i)?.clone();
            if !dm_final.has_column(&self.dataset_key) {
                return Err(MartError::catalog(
                    &dm_final.name,
                    format!(
                        "central dimension does not carry the dataset key '{}'",
                        self.dataset_key
                    ),
                ));
            }

            let indicator = format!("{}_bool", dm_base_name(&dm_name));
            let mut reduction_src = dm_final;
            reduction_src.primary_key = Some(self.dataset_key.clone());
            reduction_src.foreign_key = None;
            reduction_src.status = None;

            tr.push_step(Step::reduce(reduction_src, &self.target_schema));
            // the ref side of this step is wired to the reduction at fold time
            tr.push_step(Step::add_one(
                Table::new(&filter_name),
                &indicator,
                &self.target_schema,
            ));
            self.folded_dms.insert(dm_name);
        }
        self.transformations.push(tr);
        Ok(())
    }

    fn final_table_of(&self, index: usize) -> MartResult<&Table> {
        let tr = &self.transformations[index];
        tr.final_table().ok_or_else(|| {
            MartError::transformation(&tr.final_table_name, "transformation is not compiled")
        })
    }

    /// Number of synthesized central-filter transformations.
    pub fn central_filter_count(&self) -> usize {
        self.transformations
            .iter()
            .filter(|t| t.synthetic && t.final_table_name.ends_with("_cf"))
            .count()
    }
}

/// The logical name of a dimension, taken from the middle segment of a
/// `dataset__name__dm` style final table name.
fn dm_base_name(final_name: &str) -> &str {
    let parts: Vec<&str> = final_name.split("__").collect();
    if parts.len() >= 3 { parts[1] } else { final_name }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Column;

    fn start_table(name: &str, key: &str, extra: &[&str]) -> Table {
        let mut cols = vec![Column::new(name, key)];
        for c in extra {
            cols.push(Column::new(name, *c));
        }
        Table::new(name).with_primary_key(key).with_columns(cols)
    }

    fn ref_table(name: &str, status: RefStatus, pk: &str, fk: &str) -> Table {
        let mut t = Table::new(name).with_columns(vec![Column::new(name, "value")]);
        t.primary_key = Some(pk.to_string());
        t.foreign_key = Some(fk.to_string());
        t.status = Some(status);
        t
    }

    fn main_transformation(final_name: &str) -> Transformation {
        let mut tr = Transformation::new(
            final_name,
            TableRole::Main,
            start_table("feature", "feature_id", &["name", "cvterm_id"]),
            "mart",
        );
        tr.push_step(Step::join(
            ref_table("cvterm", RefStatus::Imported, "cvterm_id", "cvterm_id"),
            Cardinality::ManyToOne,
            ColumnPolicy::AddAll,
            "mart",
        ));
        tr
    }

    fn central_dm(final_name: &str) -> Transformation {
        let mut tr = Transformation::new(
            final_name,
            TableRole::Dimension,
            start_table("feature", "feature_id", &["type"]),
            "mart",
        );
        tr.central = true;
        tr.push_step(Step::join(
            ref_table("featureloc", RefStatus::Exported, "feature_id", "feature_id"),
            Cardinality::OneToMany,
            ColumnPolicy::AddAll,
            "mart",
        ));
        tr
    }

    fn dataset_with_central_dm() -> Dataset {
        let mut ds = Dataset::new("fly", "mart", "feature_id");
        ds.push_transformation(main_transformation("fly__feature__main"));
        ds.push_transformation(central_dm("fly__chromosome_band__dm"));
        ds
    }

    #[test]
    fn test_central_filter_adds_indicator_transformation() {
        let mut ds = dataset_with_central_dm();
        ds.transform_all().unwrap();

        assert_eq!(ds.central_filter_count(), 1);
        let cf = ds
            .transformations
            .iter()
            .find(|t| t.synthetic)
            .expect("central-filter transformation");
        assert_eq!(cf.steps.len(), 2);

        let add_one_sql = cf.steps[1].sql.as_ref().unwrap();
        assert!(add_one_sql.contains("LEFT JOIN mart.TEMP0"));
        assert!(add_one_sql.contains("IS NOT NULL AS chromosome_band_bool"));
        // the augmented table carries the indicator
        let out = cf.final_table().unwrap();
        assert!(out.has_column("chromosome_band_bool"));
        assert!(out.columns.iter().any(|c| c.bool_flag));
    }

    #[test]
    fn test_central_filter_synthesis_is_idempotent() {
        let mut ds = dataset_with_central_dm();
        ds.transform_all().unwrap();
        let once = ds.central_filter_count();
        ds.assemble().unwrap();
        ds.assemble().unwrap();
        assert_eq!(ds.central_filter_count(), once);
    }

    #[test]
    fn test_two_central_filters_fold_into_one_stable_table() {
        let mut ds = Dataset::new("fly", "mart", "feature_id");
        ds.push_transformation(main_transformation("fly__feature__main"));
        ds.push_transformation(central_dm("fly__band_a__dm"));
        ds.push_transformation(central_dm("fly__band_b__dm"));
        ds.transform_all().unwrap();

        // no compounding _cf__cf names; one augmented table survives
        let mut finals: Vec<&str> = ds
            .transformations
            .iter()
            .filter_map(|t| t.final_table())
            .filter(|f| f.is_final)
            .map(|f| f.name.as_str())
            .collect();
        finals.sort();
        assert_eq!(
            finals,
            vec![
                "fly__band_a__dm",
                "fly__band_b__dm",
                "fly__feature__main",
                "fly__feature__main_cf",
            ]
        );

        assert_eq!(ds.central_filter_count(), 1);
        let cf = ds.transformations.iter().find(|t| t.synthetic).unwrap();
        let out = cf.final_table().unwrap();
        assert!(out.has_column("band_a_bool"));
        assert!(out.has_column("band_b_bool"));
        // every intermediate of the filter chain is staging, so the drop
        // pass removes it
        assert_eq!(cf.staging_tables().len(), 3);
    }

    #[test]
    fn test_unify_rejects_variant_missing_dataset_key() {
        let mut ds = Dataset::new("fly", "mart", "feature_id");
        ds.push_transformation(main_transformation("fly__feature__main"));
        let mut variant = Transformation::new(
            "fly__gene__main",
            TableRole::Main,
            start_table("gene", "gene_id", &["symbol"]),
            "mart",
        );
        variant.push_step(Step::join(
            ref_table("genotype", RefStatus::Exported, "gene_id", "gene_id"),
            Cardinality::OneToOne,
            ColumnPolicy::AddAll,
            "mart",
        ));
        ds.push_transformation(variant);

        let err = ds.transform_all().unwrap_err();
        assert!(err.to_string().contains("does not carry the dataset key"));
        // nothing synthesized, so no invalid join SQL can reach the emitter
        assert!(!ds.transformations.iter().any(|t| t.synthetic));
    }

    #[test]
    fn test_main_unification_appends_variant() {
        let mut ds = Dataset::new("fly", "mart", "feature_id");
        ds.push_transformation(main_transformation("fly__feature__main"));
        ds.push_transformation(main_transformation("fly__feature_x__main"));
        ds.transform_all().unwrap();

        let unified: Vec<&Transformation> = ds
            .transformations
            .iter()
            .filter(|t| t.synthetic && t.final_table_name.ends_with("__unified"))
            .collect();
        assert_eq!(unified.len(), 1);
        let sql = unified[0].steps[0].sql.as_ref().unwrap();
        assert!(sql.contains("FROM mart.fly__feature__main"));
        assert!(sql.contains("fly__feature_x__main"));

        // idempotent as well
        ds.assemble().unwrap();
        let again = ds
            .transformations
            .iter()
            .filter(|t| t.final_table_name.ends_with("__unified"))
            .count();
        assert_eq!(again, 1);
    }

    #[test]
    fn test_staging_numbers_are_disjoint_across_chains() {
        let mut ds = dataset_with_central_dm();
        // a second join gives the main chain a TEMP0 staging table
        ds.transformations[0].push_step(Step::join(
            ref_table("featureloc", RefStatus::Exported, "feature_id", "feature_id"),
            Cardinality::OneToOne,
            ColumnPolicy::AddAll,
            "mart",
        ));
        let next = ds.transform_all_from(0).unwrap();

        let mut staging: Vec<String> = ds
            .transformations
            .iter()
            .flat_map(|t| t.staging_tables())
            .map(|t| t.name.clone())
            .collect();
        staging.sort();
        assert_eq!(staging, vec!["TEMP0", "TEMP1"]);
        assert_eq!(next, 2);
    }

    #[test]
    fn test_dataset_without_main_is_rejected() {
        let mut ds = Dataset::new("fly", "mart", "feature_id");
        ds.push_transformation(central_dm("fly__chromosome_band__dm"));
        assert!(ds.transform_all().is_err());
    }

    #[test]
    fn test_failed_main_aborts_central_filters() {
        let mut ds = dataset_with_central_dm();
        ds.transformations[0].steps[0].ref_table.primary_key = None;
        let err = ds.transform_all().unwrap_err();
        assert!(err.to_string().contains("fly__feature__main"));
        assert_eq!(ds.central_filter_count(), 0);
    }
}
