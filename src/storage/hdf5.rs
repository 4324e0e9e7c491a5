//! HDF5 result files.
//!
//! Each file holds dataset `data1`, optional dataset `data2`, and string
//! attributes `device_name` and `timestamp` on the root group, matching the
//! layout analysis notebooks already read.

use super::{result_path, write_atomically, ResultSink, StorageError, StorageFormat, TIMESTAMP_FORMAT};
use chrono::Local;
use hdf5::types::VarLenUnicode;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Writes one HDF5 file per saved result.
#[derive(Debug, Clone)]
pub struct Hdf5Sink {
    run_dir: PathBuf,
}

impl Hdf5Sink {
    /// Sink writing below `run_dir`.
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }
}

fn write_string_attr(file: &hdf5::File, name: &str, value: &str) -> hdf5::Result<()> {
    let value = VarLenUnicode::from_str(value).map_err(|e| hdf5::Error::from(e.to_string()))?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)
}

fn write_h5(
    path: &Path,
    device: &str,
    timestamp: &str,
    primary: &[f64],
    secondary: Option<&[f64]>,
) -> hdf5::Result<()> {
    let file = hdf5::File::create(path)?;
    file.new_dataset_builder().with_data(primary).create("data1")?;
    if let Some(secondary) = secondary {
        file.new_dataset_builder().with_data(secondary).create("data2")?;
    }
    write_string_attr(&file, "device_name", device)?;
    write_string_attr(&file, "timestamp", timestamp)?;
    file.flush()?;
    file.close()
}

impl ResultSink for Hdf5Sink {
    fn save(
        &mut self,
        device: &str,
        primary: &[f64],
        secondary: Option<&[f64]>,
        tag: &str,
    ) -> Result<PathBuf, StorageError> {
        let now = Local::now();
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let path = result_path(&self.run_dir, device, tag, now, StorageFormat::Hdf5)?;

        write_atomically(&path, |tmp| {
            write_h5(tmp, device, &timestamp, primary, secondary).map_err(|e| StorageError::encode(tmp, e))
        })?;

        tracing::info!("Saved data to {}", path.display());
        Ok(path)
    }
}
