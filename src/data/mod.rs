//! Export of finished result series.

pub mod export;

pub use export::{write_csv, write_json, CSV_HEADER};
