//! Small lock ergonomics shared across the engine.

use std::sync::{Mutex, MutexGuard};

/// copy from https://github.com/tikv/tikv/blob/b15ea3b1cd766375cb52019e35c195ed797124df/components/tikv_util/src/lib.rs#L171-L186
///
/// A handy shortcut to replace the `Mutex` `.lock().unwrap()` pattern with
/// `.ml()`, recovering from poisoning instead of propagating it. Used by the
/// lock manager's single global mutex.
pub trait HandyLock<T> {
    fn ml(&self) -> MutexGuard<'_, T>;
}

impl<T> HandyLock<T> for Mutex<T> {
    fn ml(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}
