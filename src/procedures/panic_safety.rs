//! Panic Safety for Bench Procedures
//!
//! Converts panics from instrument drivers, relay channels and result sinks
//! into ordinary error values at two boundaries.
//!
//! # Boundaries
//!
//! - Relay transactions wrap each bus primitive in [`catch_fault`]; a panic
//!   there becomes `RelayError::Internal` and is never retried.
//! - The orchestrator wraps each device in [`catch_fault`]; a panic there
//!   marks the device failed and the loop continues.
//!
//! The panic hook still runs, so the original message reaches stderr.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run `f`, converting a panic into `Err(message)`.
///
/// Any state `f` touched is suspect after an `Err`. Both boundaries discard
/// or re-read it.
pub fn catch_fault<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!("[PANIC SAFETY] caught panic: {}", message);
        message
    })
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
