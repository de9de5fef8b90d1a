//! Once-per-instance lazy construction
//!
//! Readers take the lock-free path through [`OnceLock::get`]; only callers
//! that observe an empty cell contend on the init lock, and they re-check
//! under it before constructing.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    OnceLock,
};

use parking_lot::Mutex;

pub struct LazyClient<T> {
    value: OnceLock<T>,
    init_lock: Mutex<()>,
    constructions: AtomicUsize,
}

impl<T> LazyClient<T> {
    pub fn new() -> Self {
        Self {
            value: OnceLock::new(),
            init_lock: Mutex::new(()),
            constructions: AtomicUsize::new(0),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.value.get().is_some()
    }

    /// Number of times `init` actually ran to completion
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::Acquire)
    }

    /// Return the value, running `init` if no caller has yet
    ///
    /// A failed `init` leaves the cell empty so a later call can retry.
    pub fn get_or_try_init<E, F>(&self, init: F) -> Result<&T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }

        let _guard = self.init_lock.lock();
        if let Some(value) = self.value.get() {
            return Ok(value);
        }

        let value = init()?;
        self.constructions.fetch_add(1, Ordering::AcqRel);
        Ok(self.value.get_or_init(|| value))
    }
}

impl<T> LazyClient<T> {
    /// Run `f` on the value once no initialization is in progress
    ///
    /// Holds the init lock for the duration of `f`, so an `init` racing
    /// with this call either finished before `f` sees the value or starts
    /// after `f` returns.
    pub fn with_settled<R, F>(&self, f: F) -> R
    where
        F: FnOnce(Option<&T>) -> R,
    {
        let _guard = self.init_lock.lock();
        f(self.value.get())
    }
}

impl<T> Default for LazyClient<T> {
    fn default() -> Self {
        Self::new()
    }
}
