//! Process-wide backend runtime
//!
//! Backends keep their runtime in a `static RuntimeCell`; the first successful
//! initializer wins and every later caller gets the same value back.

use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;

use crate::inference::backend::BackendError;

/// One-time, fallible initialization slot for backend runtime state
pub struct RuntimeCell<T> {
    cell: OnceCell<T>,
    inits: AtomicUsize,
}

impl<T> RuntimeCell<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            inits: AtomicUsize::new(0),
        }
    }

    /// Returns the runtime, running `init` if no call has succeeded yet.
    ///
    /// Concurrent callers block until the running initializer finishes. A failed
    /// initializer leaves the cell empty so a later call can retry.
    pub fn get_or_init<F>(&self, init: F) -> Result<&T, BackendError>
    where
        F: FnOnce() -> Result<T, BackendError>,
    {
        self.cell.get_or_try_init(|| {
            let value = init()?;
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        })
    }

    /// Number of successful initializations (0 or 1)
    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }
}

impl<T> Default for RuntimeCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
