pub mod catalog;
mod types;

pub use catalog::{ColumnDef, TableDef, CATALOG};
pub use types::*;
