use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Locks `lock`, recovering the guard when a previous holder panicked.
pub fn lock_mutex<'a, T>(lock: &'a Mutex<T>, name: &'static str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(event = "reception_lock_poisoned", lock = name, access = "mutex");
            poisoned.into_inner()
        }
    }
}

pub fn read_lock<'a, T>(lock: &'a RwLock<T>, name: &'static str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(event = "reception_lock_poisoned", lock = name, access = "read");
            poisoned.into_inner()
        }
    }
}

pub fn write_lock<'a, T>(lock: &'a RwLock<T>, name: &'static str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(event = "reception_lock_poisoned", lock = name, access = "write");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
#[path = "../tests/sync/lock_tests.rs"]
mod tests;
