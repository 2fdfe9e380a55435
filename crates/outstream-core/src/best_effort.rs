//! Best-effort SDK calls
//!
//! Some SDK calls are allowed to fail under browser policy (the display-container handshake
//! outside a user gesture, disposing a half-built engine). They run through [`best_effort`],
//! which catches errors and panics, logs them, and hands back a [`BestEffortFailure`] for
//! reporting. Callers never propagate it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

/// A best-effort operation that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestEffortFailure {
    pub operation: &'static str,
    pub reason: String,
}

impl std::fmt::Display for BestEffortFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.reason)
    }
}

/// Run `f`, converting an error or panic into a logged [`BestEffortFailure`]
pub fn best_effort<T, F>(operation: &'static str, f: F) -> Result<T, BestEffortFailure>
where
    F: FnOnce() -> Result<T, String>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => {
            debug!(operation, "Best-effort call succeeded");
            Ok(value)
        }
        Ok(Err(reason)) => {
            warn!(operation, reason = %reason, "Best-effort call failed");
            Err(BestEffortFailure { operation, reason })
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            warn!(operation, reason = %reason, "Best-effort call panicked");
            Err(BestEffortFailure { operation, reason })
        }
    }
}

/// Extract the message from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
