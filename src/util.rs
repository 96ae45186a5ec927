use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking body poisoned it.
///
/// Node bodies run user code that may panic while holding engine-owned locks
/// (cleanup stack, writer), so poisoning carries no meaning here.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
