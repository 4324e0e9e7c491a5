//! # Bench DAQ Library
//!
//! Automated characterization of devices on a shared lab bench: an SMU,
//! function generator, DMM, electronic load and oscilloscope, plus a
//! 32-channel Modbus relay bank that routes signals between them.
//!
//! ## Crate Structure
//!
//! - **`relay`**: the relay bank. `RelayStateWriter` applies a change set with a
//!   read-modify-write-verify transaction and bounded retries, so relays owned
//!   by other users of the bank are never disturbed.
//! - **`procedures`**: `DeviceTestOrchestrator`, which runs each device's configured
//!   sweeps, isolates per-device failures, keeps partial data and returns a
//!   `RunSummary`.
//! - **`sweep`**: the `SweepRunner` trait and its SCPI implementation.
//! - **`instrument`**: SCPI sessions over raw TCP sockets or VISA, a scripted
//!   mock and oscilloscope setup.
//! - **`storage`**: `ResultSink` backends (CSV, HDF5, in-memory).
//! - **`devices`**: the YAML device list.
//! - **`bench`**: opening and safely closing the whole bench.
//! - **`config`** / **`tracing_setup`** / **`error`**: the usual plumbing.
//! - **`retry`**: bounded retry with a fixed delay between attempts.

pub mod bench;
pub mod config;
pub mod devices;
pub mod error;
pub mod instrument;
pub mod procedures;
pub mod relay;
pub mod retry;
pub mod storage;
pub mod sweep;
pub mod tracing_setup;

pub use bench::Bench;
pub use config::BenchConfig;
pub use devices::{DeviceSpec, SweepMode};
pub use error::{AppResult, DaqError};
pub use procedures::{DeviceTestOrchestrator, RunSummary};
pub use relay::{ChangeSet, CoilVector, RelayChannel, RelayError, RelayStateWriter};
pub use storage::ResultSink;
pub use sweep::{SweepData, SweepError, SweepRunner};
