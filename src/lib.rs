//! # martgen — denormalized mart generation
//!
//! martgen compiles a declarative mart specification plus introspected
//! relational metadata into an ordered SQL script of `CREATE TABLE AS
//! SELECT` statements, staging-table drops, key renames and indexes.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use martgen::prelude::*;
//!
//! let snapshot = CatalogSnapshot::from_file(Path::new("snapshot.json"))?;
//! let spec = SpecFile::from_file(Path::new("fly.toml"))?;
//!
//! let mut session = Session::new(snapshot, SessionOptions::default());
//! session.load_spec(&spec)?;
//! session.generate_ddl(Path::new("fly_mart.sql"))?;
//! ```
//!
//! ## Pipeline
//!
//! | Stage     | Input                      | Output                     |
//! |-----------|----------------------------|----------------------------|
//! | catalog   | live database or JSON file | [`catalog::CatalogSnapshot`] |
//! | spec      | JSON/TOML unit records     | validated transformations  |
//! | pipeline  | step chains                | staged `CREATE TABLE` SQL  |
//! | dataset   | compiled transformations   | unified mains, central filters |
//! | emitter   | compiled datasets          | the ordered DDL script     |

pub mod catalog;
pub mod dataset;
pub mod emitter;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod session;
pub mod spec;
pub mod step;

pub mod prelude {
    pub use crate::catalog::{
        CatalogSnapshot, DeclaredKeyResolver, InferredKeyResolver, Projection, RelationResolver,
    };
    pub use crate::dataset::Dataset;
    pub use crate::emitter::{generate_ddl, render_script, ScriptItem};
    pub use crate::error::{MartError, MartResult};
    pub use crate::model::{Cardinality, Column, RefStatus, Table, TableRole};
    pub use crate::pipeline::Transformation;
    pub use crate::session::{ResolverKind, Session, SessionOptions};
    pub use crate::spec::{DatasetSpec, SpecFile, UnitRecord};
    pub use crate::step::{ColumnPolicy, JoinStrategy, Step};
}
