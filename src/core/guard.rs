//! Purpose: Convert the allocation-failure signal during full materialization
//! into a typed, recoverable outcome.
//! Exports: `MaterializeOutcome`, `run`.
//! Role: The boundary between "the process dies" and "the caller sees a value".
//! Invariants: On failure no partially built table reaches the caller; the
//! wrapped engine stays usable (preview keeps working after an OOM outcome).
//! Invariants: Non-allocation errors and panics pass through untouched.
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::core::ceiling::resident_memory_bytes;
use crate::core::error::{Error, ErrorKind};
use crate::core::table::Table;

#[derive(Clone, Debug)]
pub enum MaterializeOutcome {
    Table(Table),
    /// Allocation failed mid-materialization. Carries the resident-memory
    /// reading taken at the moment of failure.
    OutOfMemory { rss_bytes: u64 },
}

/// Run a full-materialization closure under the guard.
///
/// The engine's allocation-failure signal is either a typed `OutOfMemory`
/// error (from a failed `try_reserve`) or an allocator/capacity panic; both
/// collapse into `MaterializeOutcome::OutOfMemory`. Everything else is
/// returned exactly as `materialize()` produced it.
pub fn run<F>(materialize: F) -> Result<MaterializeOutcome, Error>
where
    F: FnOnce() -> Result<Table, Error>,
{
    match panic::catch_unwind(AssertUnwindSafe(materialize)) {
        Ok(Ok(table)) => Ok(MaterializeOutcome::Table(table)),
        Ok(Err(err)) if err.kind() == ErrorKind::OutOfMemory => {
            let rss_bytes = resident_memory_bytes();
            tracing::warn!(rss_bytes, error = %err, "materialization hit the memory ceiling");
            Ok(MaterializeOutcome::OutOfMemory { rss_bytes })
        }
        Ok(Err(err)) => Err(err),
        Err(payload) => {
            if is_allocation_panic(payload.as_ref()) {
                let rss_bytes = resident_memory_bytes();
                tracing::warn!(rss_bytes, "allocation panic during materialization");
                Ok(MaterializeOutcome::OutOfMemory { rss_bytes })
            } else {
                panic::resume_unwind(payload)
            }
        }
    }
}

fn is_allocation_panic(payload: &(dyn Any + Send)) -> bool {
    let message = if let Some(text) = payload.downcast_ref::<&str>() {
        *text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.as_str()
    } else {
        return false;
    };
    message.contains("allocat") || message.contains("capacity overflow")
}
