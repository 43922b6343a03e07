//! Persistence of readings.

pub mod storage;

pub use storage::{csv_record, ensure_csv_extension, CsvLogger, CSV_HEADER};
