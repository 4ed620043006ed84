//! Transformation step compiler.
//!
//! One [`Step`] joins a referenced table onto the current staging table and
//! produces the next staging table plus the `CREATE TABLE ... AS SELECT`
//! statement that materializes it. Join strategy and column policy are plain
//! data selected from the specification, not a class hierarchy.

use crate::error::{MartError, MartResult};
use crate::model::{Cardinality, Column, RefStatus, StagingType, Table};

/// How the step's SQL joins the two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Inner join rendered in `WHERE ref.fk = start.key` form.
    Inner,
    /// Staging rows without a match are preserved.
    LeftJoin,
    /// Left join of a table back onto itself.
    RecursiveSelf,
    /// `SELECT DISTINCT key ... WHERE key IS NOT NULL` reduction.
    SingleColumnReduce,
}

impl JoinStrategy {
    /// Cardinality-dependent strategy selection: `n1` and `n1r` must preserve
    /// unmatched staging rows; everything else joins inner.
    pub fn for_cardinality(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::ManyToOne => Self::LeftJoin,
            Cardinality::ManyToOneRecursive => Self::RecursiveSelf,
            _ => Self::Inner,
        }
    }
}

/// How the referenced table's columns merge into the output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnPolicy {
    /// All start columns followed by all referenced columns.
    AddAll,
    /// Fixed start-then-ref concatenation, used when unifying main variants.
    Append,
    /// A single derived indicator column, used by central-filter synthesis.
    AddOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Compiled,
}

/// One unit of a transformation chain.
#[derive(Debug, Clone)]
pub struct Step {
    /// Input staging table; wired in by the pipeline before compilation.
    pub temp_start: Option<Table>,
    pub ref_table: Table,
    pub cardinality: Cardinality,
    pub strategy: JoinStrategy,
    pub policy: ColumnPolicy,
    /// Name of the output table; the pipeline assigns `TEMP<i>` or, for the
    /// last step, the final table name.
    pub temp_name: String,
    pub target_schema: String,
    /// Name of the indicator column, for [`ColumnPolicy::AddOne`] steps.
    pub indicator: Option<String>,
    /// Join keys, resolved during compilation.
    pub ts_key: Option<String>,
    pub rf_key: Option<String>,
    pub temp_end: Option<Table>,
    pub sql: Option<String>,
    pub state: StepState,
}

impl Step {
    /// A join step against a referenced table.
    pub fn join(
        ref_table: Table,
        cardinality: Cardinality,
        policy: ColumnPolicy,
        target_schema: impl Into<String>,
    ) -> Self {
        Self {
            temp_start: None,
            ref_table,
            cardinality,
            strategy: JoinStrategy::for_cardinality(cardinality),
            policy,
            temp_name: String::new(),
            target_schema: target_schema.into(),
            indicator: None,
            ts_key: None,
            rf_key: None,
            temp_end: None,
            sql: None,
            state: StepState::Pending,
        }
    }

    /// A single-column key reduction of `ref_table` (central-filter pass 1).
    pub fn reduce(ref_table: Table, target_schema: impl Into<String>) -> Self {
        let mut step = Self::join(
            ref_table,
            Cardinality::ManyToOne,
            ColumnPolicy::AddOne,
            target_schema,
        );
        step.strategy = JoinStrategy::SingleColumnReduce;
        step
    }

    /// An indicator-adding left join (central-filter pass 2).
    pub fn add_one(
        ref_table: Table,
        indicator: impl Into<String>,
        target_schema: impl Into<String>,
    ) -> Self {
        let mut step = Self::join(
            ref_table,
            Cardinality::ManyToOne,
            ColumnPolicy::AddOne,
            target_schema,
        );
        step.indicator = Some(indicator.into());
        step
    }

    /// Resolve the two sides of the join key from the referenced table's
    /// descriptor. A missing key fails loudly; the enclosing transformation
    /// must not proceed with a bad join.
    fn resolve_keys(&self) -> MartResult<(String, String)> {
        let pk = self.ref_table.primary_key.clone();
        let fk = self.ref_table.foreign_key.clone();
        let missing = |what: &str| {
            MartError::catalog(
                &self.ref_table.name,
                format!("{} could not be determined for the join", what),
            )
        };
        match self.ref_table.status {
            // start.pk is referenced by ref.fk
            Some(RefStatus::Exported) => Ok((
                pk.ok_or_else(|| missing("primary key"))?,
                fk.ok_or_else(|| missing("foreign key"))?,
            )),
            // start holds ref.fk referencing ref.pk
            Some(RefStatus::Imported) => Ok((
                fk.ok_or_else(|| missing("foreign key"))?,
                pk.ok_or_else(|| missing("primary key"))?,
            )),
            // reductions and synthetic re-joins key on the table's own key
            None => {
                let key = pk.ok_or_else(|| missing("key column"))?;
                Ok((key.clone(), key))
            }
        }
    }

    /// SQL-side name of a table: staging and final tables live in the target
    /// schema, source tables are referenced bare.
    fn sql_name(&self, table: &Table) -> String {
        if table.staging.is_some() || table.is_final {
            format!("{}.{}", self.target_schema, table.name)
        } else {
            table.name.clone()
        }
    }

    /// Index statement on the input staging table's join key, emitted by the
    /// emitter for every non-first step.
    pub fn index_sql(&self, seq: usize) -> Option<String> {
        let start = self.temp_start.as_ref()?;
        let key = self.ts_key.as_ref()?;
        Some(format!(
            "CREATE INDEX I_{} ON {} ({})",
            seq,
            self.sql_name(start),
            key
        ))
    }

    /// Compile this step: derive the output staging table and its SQL.
    pub fn compile(&mut self) -> MartResult<()> {
        let start = self
            .temp_start
            .take()
            .ok_or_else(|| MartError::catalog(&self.ref_table.name, "step has no input table"))?;
        let (ts_key, rf_key) = self.resolve_keys()?;

        let result = match self.strategy {
            JoinStrategy::SingleColumnReduce => self.compile_reduce(&rf_key),
            _ => self.compile_join(&start, &ts_key, &rf_key),
        };
        self.temp_start = Some(start);
        let (temp_end, sql) = result?;

        self.ts_key = Some(ts_key);
        self.rf_key = Some(rf_key);
        self.temp_end = Some(temp_end);
        self.sql = Some(sql);
        self.state = StepState::Compiled;
        Ok(())
    }

    fn compile_reduce(&self, key: &str) -> MartResult<(Table, String)> {
        if !self.ref_table.has_column(key) && self.ref_table.primary_key.as_deref() != Some(key) {
            return Err(MartError::catalog(
                &self.ref_table.name,
                format!("reduction key '{}' is not present", key),
            ));
        }
        let mut sql = format!(
            "CREATE TABLE {}.{} AS SELECT DISTINCT {} FROM {} WHERE {} IS NOT NULL",
            self.target_schema,
            self.temp_name,
            key,
            self.sql_name(&self.ref_table),
            key
        );
        if let Some(ext) = &self.ref_table.extension {
            sql.push_str(&format!(" AND ({})", ext));
        }

        let mut end = Table::staged_from(
            &self.temp_name,
            Some(key),
            vec![Column::new(&self.ref_table.name, key)],
        );
        end.staging = Some(StagingType::Partition);
        // the reduction's restriction travels with it onto the next start side
        end.central_extension = self.ref_table.central_extension.clone();
        Ok((end, sql))
    }

    fn compile_join(&self, start: &Table, ts_key: &str, rf_key: &str) -> MartResult<(Table, String)> {
        if !start.has_column(ts_key) {
            return Err(MartError::catalog(
                &start.name,
                format!("join key '{}' is not present in the staging table", ts_key),
            ));
        }

        let start_qual = start.name.clone();
        // A self-join needs a distinguishing qualifier on the ref side.
        let ref_qual = if self.ref_table.name == start.name {
            format!("{}_r", self.ref_table.name)
        } else {
            self.ref_table.name.clone()
        };

        // Collision suffix: the input staging table's temp name, or this
        // step's own name on the very first step.
        let suffix = start
            .temp_name
            .clone()
            .unwrap_or_else(|| self.temp_name.clone());

        let mut select_items: Vec<String> = Vec::new();
        let mut merged: Vec<Column> = Vec::new();
        let mut taken: Vec<String> = Vec::new();

        for col in start.columns.iter().filter(|c| !c.deleted) {
            match &col.alias {
                Some(alias) => select_items.push(format!(
                    "{}.{} AS {}",
                    start_qual, col.name, alias
                )),
                None => select_items.push(format!("{}.{}", start_qual, col.name)),
            }
            taken.push(col.effective_name().to_string());
            merged.push(col.carried());
        }

        match self.policy {
            ColumnPolicy::AddAll | ColumnPolicy::Append => {
                for col in self.ref_table.columns.iter().filter(|c| !c.deleted) {
                    let mut col = col.clone();
                    if taken.iter().any(|n| n == col.effective_name()) {
                        let base = col.effective_name().to_string();
                        let mut candidate = format!("{}_{}", base, suffix);
                        let mut n = 1;
                        while taken.iter().any(|t| *t == candidate) {
                            candidate = format!("{}_{}{}", base, suffix, n);
                            n += 1;
                        }
                        col.alias = Some(candidate);
                        col.user_alias = false;
                    }
                    match &col.alias {
                        Some(alias) => select_items.push(format!(
                            "{}.{} AS {}",
                            ref_qual, col.name, alias
                        )),
                        None => select_items.push(format!("{}.{}", ref_qual, col.name)),
                    }
                    taken.push(col.effective_name().to_string());
                    merged.push(col.carried());
                }
            }
            ColumnPolicy::AddOne => {
                let indicator = self.indicator.clone().ok_or_else(|| {
                    MartError::catalog(&self.ref_table.name, "addone step has no indicator name")
                })?;
                select_items.push(format!(
                    "{}.{} IS NOT NULL AS {}",
                    ref_qual, rf_key, indicator
                ));
                let mut col = Column::new(&self.ref_table.name, &indicator);
                col.bool_flag = true;
                taken.push(indicator);
                merged.push(col);
            }
        }

        debug_assert_eq!(
            taken.len(),
            taken
                .iter()
                .collect::<std::collections::BTreeSet<_>>()
                .len(),
            "collision resolution must leave column names unique"
        );

        let join_predicate = format!("{}.{} = {}.{}", ref_qual, rf_key, start_qual, ts_key);
        let ref_from = if ref_qual == self.ref_table.name {
            self.sql_name(&self.ref_table)
        } else {
            format!("{} {}", self.sql_name(&self.ref_table), ref_qual)
        };

        let mut predicates: Vec<String> = Vec::new();
        if let Some(ext) = &self.ref_table.extension {
            predicates.push(format!("({})", ext));
        }
        if let Some(ext) = &start.extension {
            predicates.push(format!("({})", ext));
        }
        if let Some(ext) = &start.central_extension {
            predicates.push(format!("({})", ext));
        }

        let sql = match self.strategy {
            JoinStrategy::LeftJoin | JoinStrategy::RecursiveSelf => {
                let mut on_clause = join_predicate;
                if let Some(ext) = &self.ref_table.extension {
                    on_clause.push_str(&format!(" AND ({})", ext));
                }
                let mut sql = format!(
                    "CREATE TABLE {}.{} AS SELECT {} FROM {} LEFT JOIN {} ON {}",
                    self.target_schema,
                    self.temp_name,
                    select_items.join(", "),
                    self.sql_name(start),
                    ref_from,
                    on_clause
                );
                let start_side: Vec<String> = [&start.extension, &start.central_extension]
                    .into_iter()
                    .flatten()
                    .map(|e| format!("({})", e))
                    .collect();
                if !start_side.is_empty() {
                    sql.push_str(&format!(" WHERE {}", start_side.join(" AND ")));
                }
                sql
            }
            _ => {
                let mut where_clause = join_predicate;
                for p in &predicates {
                    where_clause.push_str(&format!(" AND {}", p));
                }
                format!(
                    "CREATE TABLE {}.{} AS SELECT {} FROM {}, {} WHERE {}",
                    self.target_schema,
                    self.temp_name,
                    select_items.join(", "),
                    self.sql_name(start),
                    ref_from,
                    where_clause
                )
            }
        };

        let key = start.primary_key.clone().unwrap_or_else(|| ts_key.to_string());
        let end = Table::staged_from(&self.temp_name, Some(&key), merged);
        Ok((end, sql))
    }
}
