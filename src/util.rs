use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

/// A poisoned mutex means some thread panicked while holding it. The data structures guarded
///  by mutexes in this crate stay consistent across panics (push / pop / insert / remove are
///  atomic with regard to the guarded collection), so the poison flag is ignored.
pub fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// single non-blocking lock attempt, `None` if the mutex is held by someone else
pub fn try_lock_ignoring_poison<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::WouldBlock) => None,
        Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
    }
}
