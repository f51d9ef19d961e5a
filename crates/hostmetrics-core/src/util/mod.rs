//! Utility modules for hostmetrics.

mod duration;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use duration::{DurationParseError, format_duration, parse_duration};

/// Locks a mutex, recovering the guard if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
