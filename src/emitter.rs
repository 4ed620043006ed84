//! Ordered DDL emission.
//!
//! Statement order is a correctness requirement: every CREATE for a
//! transformation precedes its DROPs, and key renames plus final indexes come
//! after all CREATE and DROP statements system-wide, once final table names
//! are stable.

use crate::dataset::Dataset;
use crate::error::{MartError, MartResult};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One line of the output script: either a transformation banner or a
/// `;`-terminated SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptItem {
    Banner { number: usize, table: String },
    Sql(String),
}

impl ScriptItem {
    pub fn render(&self) -> String {
        match self {
            Self::Banner { number, table } => format!(
                "\n--\n--   TRANSFORMATION NO {}   TARGET TABLE: {}\n--\n",
                number,
                table.to_uppercase()
            ),
            Self::Sql(sql) => format!("{};\n", sql),
        }
    }
}

/// Walk all transformations of all datasets and produce the ordered
/// statement list. Produces a complete, internally consistent script or
/// nothing: any uncompiled transformation fails the whole emission before a
/// single statement is generated.
pub fn emit(datasets: &[Dataset]) -> MartResult<Vec<ScriptItem>> {
    for ds in datasets {
        for tr in &ds.transformations {
            if !tr.is_compiled() {
                return Err(MartError::transformation(
                    &tr.final_table_name,
                    "not compiled; refusing to emit a partial script",
                ));
            }
        }
    }

    let mut items = Vec::new();
    let mut number = 0;
    let mut index_seq = 0;

    // pass 1: per step, index on the input staging table (skip the first
    // step: select-distinct staging tables should not be pre-indexed),
    // then the step's join SQL
    for ds in datasets {
        for tr in &ds.transformations {
            number += 1;
            items.push(ScriptItem::Banner {
                number,
                table: tr.final_table_name.clone(),
            });
            for (i, step) in tr.steps.iter().enumerate() {
                if i > 0 {
                    index_seq += 1;
                    if let Some(idx) = step.index_sql(index_seq) {
                        items.push(ScriptItem::Sql(idx));
                    }
                }
                let sql = step.sql.as_ref().ok_or_else(|| {
                    MartError::transformation(&tr.final_table_name, "step has no compiled SQL")
                })?;
                items.push(ScriptItem::Sql(sql.clone()));
            }
        }
    }

    // pass 2: drop every non-final staging table
    for ds in datasets {
        for tr in &ds.transformations {
            for staging in tr.staging_tables() {
                items.push(ScriptItem::Sql(format!(
                    "DROP TABLE {}.{}",
                    ds.target_schema, staging.name
                )));
            }
        }
    }

    // pass 3: rename each final table's key column and index it
    for ds in datasets {
        let key_name = format!("{}_key", ds.dataset_key);
        for tr in &ds.transformations {
            for step in &tr.steps {
                let Some(end) = step.temp_end.as_ref() else { continue };
                if !end.is_final {
                    continue;
                }
                let key = end.primary_key.as_deref().unwrap_or(&ds.dataset_key);
                items.push(ScriptItem::Sql(format!(
                    "ALTER TABLE {}.{} RENAME COLUMN {} TO {}",
                    ds.target_schema, end.name, key, key_name
                )));
                index_seq += 1;
                items.push(ScriptItem::Sql(format!(
                    "CREATE INDEX I_{} ON {}.{} ({})",
                    index_seq, ds.target_schema, end.name, key_name
                )));
            }
        }
    }

    Ok(items)
}

/// Render the whole script as one string.
pub fn render_script(items: &[ScriptItem]) -> String {
    items.iter().map(ScriptItem::render).collect()
}

/// Append the script to `path` as UTF-8 text.
pub fn write_script(path: &Path, items: &[ScriptItem]) -> MartResult<PathBuf> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(render_script(items).as_bytes())?;
    Ok(path.to_path_buf())
}

/// Emit and append in one call: the library-level entry point.
pub fn generate_ddl(datasets: &[Dataset], path: &Path) -> MartResult<PathBuf> {
    let items = emit(datasets)?;
    write_script(path, &items)
}
