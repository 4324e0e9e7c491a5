//! Result persistence.
//!
//! A [`ResultSink`] stores one sweep result per call. Each save produces one
//! file named `<device>_<tag>_<timestamp>.<ext>` inside a per-device
//! directory under the run directory. Files are written to a temporary
//! sibling and renamed into place, so a failed save leaves nothing behind.
//!
//! Backends:
//! - [`CsvSink`] (feature `storage_csv`, default)
//! - `Hdf5Sink` (feature `storage_hdf5`): datasets `data1`/`data2` with
//!   `device_name` and `timestamp` attributes
//! - [`MemorySink`]: keeps results in memory (tests, dry runs)

#[cfg(feature = "storage_csv")]
pub mod csv;
#[cfg(feature = "storage_hdf5")]
pub mod hdf5;
pub mod memory;

#[cfg(feature = "storage_csv")]
pub use self::csv::CsvSink;
#[cfg(feature = "storage_hdf5")]
pub use self::hdf5::Hdf5Sink;
pub use memory::{MemorySink, SavedResult};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp format used in file and directory names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Failure to persist a result.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem failure
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Encoder failure (CSV or HDF5)
    #[error("failed to encode {}: {reason}", .path.display())]
    Encode {
        /// Path being written
        path: PathBuf,
        /// Cause
        reason: String,
    },

    /// Backend rejected the save (e.g. a test double told to fail)
    #[error("sink rejected save: {0}")]
    Rejected(String),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn encode(path: &Path, reason: impl ToString) -> Self {
        StorageError::Encode {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// On-disk result format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// One CSV file per save
    Csv,
    /// One HDF5 file per save
    Hdf5,
}

impl StorageFormat {
    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            StorageFormat::Csv => "csv",
            StorageFormat::Hdf5 => "h5",
        }
    }
}

/// Persists sweep results.
pub trait ResultSink {
    /// Store `primary` (and `secondary` if present) for `device` under
    /// `tag`. Returns the path written. Must not leave partial output.
    fn save(
        &mut self,
        device: &str,
        primary: &[f64],
        secondary: Option<&[f64]>,
        tag: &str,
    ) -> Result<PathBuf, StorageError>;
}

impl<S: ResultSink + ?Sized> ResultSink for Box<S> {
    fn save(
        &mut self,
        device: &str,
        primary: &[f64],
        secondary: Option<&[f64]>,
        tag: &str,
    ) -> Result<PathBuf, StorageError> {
        (**self).save(device, primary, secondary, tag)
    }
}

/// Open the sink for `format` writing under `run_dir`.
pub fn open_sink(format: StorageFormat, run_dir: &Path) -> Result<Box<dyn ResultSink>, StorageError> {
    match format {
        #[cfg(feature = "storage_csv")]
        StorageFormat::Csv => Ok(Box::new(CsvSink::new(run_dir))),
        #[cfg(feature = "storage_hdf5")]
        StorageFormat::Hdf5 => Ok(Box::new(Hdf5Sink::new(run_dir))),
        #[allow(unreachable_patterns)]
        other => Err(StorageError::Rejected(format!(
            "format '{}' requires the storage_{} feature",
            other.extension(),
            match other {
                StorageFormat::Csv => "csv",
                StorageFormat::Hdf5 => "hdf5",
            }
        ))),
    }
}

/// Create `results_<timestamp>` under `root` and return its path.
pub fn create_run_directory(root: &Path, now: DateTime<Local>) -> Result<PathBuf, StorageError> {
    let dir = root.join(format!("results_{}", now.format(TIMESTAMP_FORMAT)));
    std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
    tracing::info!("Run output directory: {}", dir.display());
    Ok(dir)
}

/// Make a device name safe to use as a single path component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "unnamed".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Pick `<run_dir>/<device>/<device>_<tag>_<timestamp>.<ext>`, creating
/// the device directory. A numeric suffix avoids clobbering an existing file.
pub fn result_path(
    run_dir: &Path,
    device: &str,
    tag: &str,
    now: DateTime<Local>,
    format: StorageFormat,
) -> Result<PathBuf, StorageError> {
    let device = sanitize_component(device);
    let dir = run_dir.join(&device);
    std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

    let stem = format!("{}_{}_{}", device, tag, now.format(TIMESTAMP_FORMAT));
    let ext = format.extension();
    let mut path = dir.join(format!("{}.{}", stem, ext));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.{}", stem, n, ext));
        n += 1;
    }
    Ok(path)
}

/// Run `write` against a temporary sibling of `path`, then rename it into
/// place. The temporary file is removed if `write` fails.
pub fn write_atomically<F>(path: &Path, write: F) -> Result<(), StorageError>
where
    F: FnOnce(&Path) -> Result<(), StorageError>,
{
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    if let Err(e) = write(&tmp) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        StorageError::io(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    #[test]
    fn test_result_path_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let path = result_path(tmp.path(), "dut_a", "iv_data", fixed_time(), StorageFormat::Csv).unwrap();
        assert_eq!(
            path,
            tmp.path().join("dut_a").join("dut_a_iv_data_2024-03-05_14-07-09.csv")
        );
        assert!(tmp.path().join("dut_a").is_dir());
    }

    #[test]
    fn test_result_path_does_not_clobber() {
        let tmp = tempfile::tempdir().unwrap();
        let first = result_path(tmp.path(), "d", "iv_data", fixed_time(), StorageFormat::Hdf5).unwrap();
        std::fs::write(&first, b"x").unwrap();
        let second = result_path(tmp.path(), "d", "iv_data", fixed_time(), StorageFormat::Hdf5).unwrap();
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("_1.h5"));
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_component(".."), "unnamed");
        assert_eq!(sanitize_component("dut 7"), "dut 7");
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out.csv");
        let result = write_atomically(&target, |p| {
            std::fs::write(p, b"half").map_err(|e| StorageError::io(p, e))?;
            Err(StorageError::Rejected("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_run_directory_name() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = create_run_directory(tmp.path(), fixed_time()).unwrap();
        assert!(dir.ends_with("results_2024-03-05_14-07-09"));
        assert!(dir.is_dir());
    }

    #[test]
    fn test_format_names() {
        let format: StorageFormat = serde_json::from_str("\"hdf5\"").unwrap();
        assert_eq!(format, StorageFormat::Hdf5);
        assert_eq!(format.extension(), "h5");
    }
}
