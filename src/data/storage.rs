//! Reading log writers with clean feature flag handling.
use crate::error::AppResult;
use crate::measurement::Reading;
use std::path::{Path, PathBuf};

/// Column names of the reading log, in order.
pub const CSV_HEADER: [&str; 8] = [
    "timestamp",
    "measurement_slot",
    "device_name",
    "device_idn",
    "function",
    "value",
    "unit",
    "raw_response",
];

/// Appends `.csv` unless `path` already ends with it (any case).
pub fn ensure_csv_extension(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let has_extension = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));
    if has_extension {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".csv");
        PathBuf::from(name)
    }
}

/// Formats one reading as a log row matching [`CSV_HEADER`].
pub fn csv_record(reading: &Reading) -> [String; 8] {
    [
        reading.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
        reading.slot_number().to_string(),
        reading.instrument.label().to_string(),
        reading.device_identity.clone(),
        reading.function.label().to_string(),
        reading
            .value
            .map_or(String::new(), |v| crate::measurement::format_significant(v, 12)),
        reading.unit.clone(),
        reading.raw_response.clone(),
    ]
}

// ============================================================================
// CSV Logger
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::{File, OpenOptions};
    use tracing::info;

    /// Append-only CSV log of readings, flushed after every record.
    pub struct CsvLogger {
        path: PathBuf,
        writer: csv::Writer<File>,
    }

    impl CsvLogger {
        /// Opens `path` for appending, creating parent directories.
        ///
        /// The header row is written only when the file is new or empty.
        pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
            let path = path.as_ref().to_path_buf();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }

            let has_content = std::fs::metadata(&path).map_or(false, |m| m.len() > 0);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);

            if !has_content {
                writer.write_record(CSV_HEADER)?;
                writer.flush()?;
            }

            info!("CSV logger writing to '{}'", path.display());
            Ok(Self { path, writer })
        }

        /// File being written.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Appends one reading and flushes it to disk.
        pub fn write_reading(&mut self, reading: &Reading) -> AppResult<()> {
            self.writer.write_record(csv_record(reading))?;
            self.writer.flush()?;
            Ok(())
        }

        /// Flushes and closes the file.
        pub fn close(mut self) -> AppResult<()> {
            self.writer.flush()?;
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use crate::error::DaqError;

    /// Placeholder used when the `storage_csv` feature is off.
    pub struct CsvLogger {
        path: PathBuf,
    }

    impl CsvLogger {
        /// Always fails: CSV support was not compiled in.
        pub fn open(_path: impl AsRef<Path>) -> AppResult<Self> {
            Err(feature_disabled())
        }

        /// File being written.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Always fails: CSV support was not compiled in.
        pub fn write_reading(&mut self, _reading: &Reading) -> AppResult<()> {
            Err(feature_disabled())
        }

        /// Always fails: CSV support was not compiled in.
        pub fn close(self) -> AppResult<()> {
            Err(feature_disabled())
        }
    }

    fn feature_disabled() -> DaqError {
        DaqError::Storage("CSV logging requires the storage_csv feature".to_string())
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvLogger;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvLogger;
