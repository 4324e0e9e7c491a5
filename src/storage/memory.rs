//! In-memory sink.

use super::{ResultSink, StorageError};
use std::collections::HashSet;
use std::path::PathBuf;

/// One result held by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SavedResult {
    /// Device name
    pub device: String,
    /// Result tag (e.g. `iv_data`)
    pub tag: String,
    /// First array
    pub primary: Vec<f64>,
    /// Second array, if any
    pub secondary: Option<Vec<f64>>,
}

/// Keeps saved results in memory. Individual tags can be made to fail.
#[derive(Debug, Default)]
pub struct MemorySink {
    saved: Vec<SavedResult>,
    failing_tags: HashSet<String>,
    attempts: usize,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every save with `tag`.
    pub fn fail_tag(mut self, tag: &str) -> Self {
        self.failing_tags.insert(tag.to_string());
        self
    }

    /// Results saved so far, in order.
    pub fn saved(&self) -> &[SavedResult] {
        &self.saved
    }

    /// Tags saved for `device`, in order.
    pub fn tags_for(&self, device: &str) -> Vec<&str> {
        self.saved
            .iter()
            .filter(|r| r.device == device)
            .map(|r| r.tag.as_str())
            .collect()
    }

    /// Number of save calls, including rejected ones.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl ResultSink for MemorySink {
    fn save(
        &mut self,
        device: &str,
        primary: &[f64],
        secondary: Option<&[f64]>,
        tag: &str,
    ) -> Result<PathBuf, StorageError> {
        self.attempts += 1;
        if self.failing_tags.contains(tag) {
            return Err(StorageError::Rejected(format!("{} for {}", tag, device)));
        }
        self.saved.push(SavedResult {
            device: device.to_string(),
            tag: tag.to_string(),
            primary: primary.to_vec(),
            secondary: secondary.map(<[f64]>::to_vec),
        });
        Ok(PathBuf::from(format!("memory://{}/{}", device, tag)))
    }
}
