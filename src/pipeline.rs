//! Transformation pipeline: an ordered chain of steps folded left to right.

use crate::error::{MartError, MartResult};
use crate::model::{StagingType, Table, TableRole};
use crate::step::{Step, StepState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformState {
    Unstarted,
    Compiling,
    Compiled,
}

/// A linear chain of steps that materializes one mart table.
#[derive(Debug, Clone)]
pub struct Transformation {
    pub final_table_name: String,
    pub role: TableRole,
    pub start_table: Table,
    pub steps: Vec<Step>,
    /// For dimensions: this table's filter must be folded back onto main.
    pub central: bool,
    /// Set on transformations synthesized by the dataset assembler.
    pub synthetic: bool,
    /// First staging number this chain may use. Staging names are global to
    /// a script; the dataset assigns disjoint ranges so no two chains ever
    /// create the same `TEMP<n>` table.
    pub temp_offset: usize,
    pub state: TransformState,
    pub target_schema: String,
}

impl Transformation {
    pub fn new(
        final_table_name: impl Into<String>,
        role: TableRole,
        start_table: Table,
        target_schema: impl Into<String>,
    ) -> Self {
        Self {
            final_table_name: final_table_name.into(),
            role,
            start_table,
            steps: Vec::new(),
            central: false,
            synthetic: false,
            temp_offset: 0,
            state: TransformState::Unstarted,
            target_schema: target_schema.into(),
        }
    }

    pub fn push_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Fold the steps left to right. Each step's output becomes the next
    /// step's input; the last step's output is created under the final table
    /// name directly and marked final. Any failure aborts the whole chain
    /// with no SQL retained for later steps.
    pub fn transform(&mut self) -> MartResult<()> {
        if self.state == TransformState::Compiled {
            return Ok(());
        }
        if self.steps.is_empty() {
            return Err(MartError::transformation(
                &self.final_table_name,
                "transformation has no steps",
            ));
        }
        self.state = TransformState::Compiling;

        let last = self.steps.len() - 1;
        let mut carry: Option<Table> = None;
        // last non-partition output; a reduction detours off the chain and
        // the step after it resumes from here
        let mut resumed: Option<Table> = None;
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.temp_name = if i == last {
                self.final_table_name.clone()
            } else {
                format!("TEMP{}", self.temp_offset + i)
            };
            match carry.take() {
                // A partition reduction does not continue the chain itself:
                // it becomes the ref side of the next step, and its key and
                // restriction travel onto the start side.
                Some(prev) if prev.staging == Some(StagingType::Partition) => {
                    let mut start = resumed
                        .clone()
                        .unwrap_or_else(|| self.start_table.clone());
                    if start.central_extension.is_none() {
                        start.central_extension = prev.central_extension.clone();
                    }
                    let mut reduction = prev;
                    reduction.central_extension = None;
                    step.ref_table = reduction;
                    step.temp_start = Some(start);
                }
                Some(prev) => step.temp_start = Some(prev),
                None => step.temp_start = Some(self.start_table.clone()),
            }
            step.compile().map_err(|e| {
                MartError::transformation(&self.final_table_name, e.to_string())
            })?;
            carry = step.temp_end.clone();
            if let Some(end) = &carry {
                if end.staging != Some(StagingType::Partition) {
                    resumed = Some(end.clone());
                }
            }
        }

        if let Some(end) = self.steps[last].temp_end.as_mut() {
            end.is_final = true;
            end.staging = None;
        }
        self.state = TransformState::Compiled;
        Ok(())
    }

    /// The final table produced by this chain, once compiled.
    pub fn final_table(&self) -> Option<&Table> {
        self.steps.last().and_then(|s| s.temp_end.as_ref())
    }

    /// The intermediate staging tables this chain creates and later drops.
    pub fn staging_tables(&self) -> Vec<&Table> {
        self.steps
            .iter()
            .filter_map(|s| s.temp_end.as_ref())
            .filter(|t| !t.is_final)
            .collect()
    }

    pub fn is_compiled(&self) -> bool {
        self.state == TransformState::Compiled
            && self.steps.iter().all(|s| s.state == StepState::Compiled)
    }
}
