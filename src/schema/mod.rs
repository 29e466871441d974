//! Schema-driven storage layout.
//!
//! - [`descriptor`] — normalized type descriptors and their JSON / JSON Schema sources
//! - [`compiler`] — descriptor → table definition (columns and child tables)
//! - [`migrate`] — additive reconciliation of live tables with compiled definitions

pub mod compiler;
pub mod descriptor;
pub mod migrate;

pub use compiler::{compile, quote_ident, ChildTable, Column, SqlType, TableDefinition, TableRole};
pub use descriptor::{canonicalize_kind, Field, FieldKind, ScalarKind, TypeDescriptor};
pub use migrate::{apply, check_compatible, reconcile, MigrationPlan, MigrationStep, OrphanedColumn};
