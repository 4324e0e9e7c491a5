//! CSV result files.
//!
//! Layout:
//!
//! ```text
//! # device_name: dut_a
//! # timestamp: 2024-03-05_14-07-09
//! index,data1,data2
//! 0,-0.5,0.000001
//! ```
//!
//! `data2` is omitted for single-array results. When the arrays differ in
//! length the shorter column is left blank.

use super::{result_path, write_atomically, ResultSink, StorageError, StorageFormat, TIMESTAMP_FORMAT};
use chrono::Local;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes one CSV file per saved result.
#[derive(Debug, Clone)]
pub struct CsvSink {
    run_dir: PathBuf,
}

impl CsvSink {
    /// Sink writing below `run_dir`.
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    /// Run directory.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

fn write_csv(
    path: &Path,
    device: &str,
    timestamp: &str,
    primary: &[f64],
    secondary: Option<&[f64]>,
) -> Result<(), StorageError> {
    let mut file = File::create(path).map_err(|e| StorageError::io(path, e))?;
    writeln!(file, "# device_name: {}", device)
        .and_then(|_| writeln!(file, "# timestamp: {}", timestamp))
        .map_err(|e| StorageError::io(path, e))?;

    let mut writer = ::csv::Writer::from_writer(file);
    let header: &[&str] = if secondary.is_some() {
        &["index", "data1", "data2"]
    } else {
        &["index", "data1"]
    };
    writer
        .write_record(header)
        .map_err(|e| StorageError::encode(path, e))?;

    let rows = primary.len().max(secondary.map_or(0, <[f64]>::len));
    for i in 0..rows {
        let cell = |values: &[f64]| values.get(i).map(f64::to_string).unwrap_or_default();
        let mut record = vec![i.to_string(), cell(primary)];
        if let Some(secondary) = secondary {
            record.push(cell(secondary));
        }
        writer
            .write_record(&record)
            .map_err(|e| StorageError::encode(path, e))?;
    }

    let file = writer
        .into_inner()
        .map_err(|e| StorageError::encode(path, e))?;
    file.sync_all().map_err(|e| StorageError::io(path, e))
}

impl ResultSink for CsvSink {
    fn save(
        &mut self,
        device: &str,
        primary: &[f64],
        secondary: Option<&[f64]>,
        tag: &str,
    ) -> Result<PathBuf, StorageError> {
        let now = Local::now();
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let path = result_path(&self.run_dir, device, tag, now, StorageFormat::Csv)?;

        write_atomically(&path, |tmp| write_csv(tmp, device, &timestamp, primary, secondary))?;

        tracing::info!("Saved data to {}", path.display());
        Ok(path)
    }
}
