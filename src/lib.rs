//! Incremental sync of the ANBIMA daily yield-curve (ETTJ) tables into a
//! spreadsheet dataset.

pub mod config;
pub mod fetch;
pub mod history;
pub mod process;
pub mod sync;
