//! Lock helpers that recover from poisoning.
//!
//! A panicked writer leaves the map in whatever state it reached; serving
//! slightly stale monitoring state beats refusing every later read.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn read<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::error!(lock = name, "lock poisoned, recovering with stale state");
        poisoned.into_inner()
    })
}

pub(crate) fn write<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::error!(lock = name, "lock poisoned, recovering with stale state");
        poisoned.into_inner()
    })
}

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::error!(lock = name, "lock poisoned, recovering with stale state");
        poisoned.into_inner()
    })
}
