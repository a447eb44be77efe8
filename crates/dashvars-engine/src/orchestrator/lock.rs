//! One-shot initialization locks.
//!
//! Every variable gets a lock when initialization starts. Dependents wait on
//! the locks of the variables they reference; the owner releases its lock
//! exactly once, whether it resolved, took a URL value or failed.

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Completes when the lock it was taken from is released (or dropped).
pub type LockWaiter = Shared<BoxFuture<'static, ()>>;

pub(crate) struct InitLock {
    release: Option<oneshot::Sender<()>>,
    released: LockWaiter,
}

impl InitLock {
    pub(crate) fn new() -> Self {
        let (tx, rx) = oneshot::channel::<()>();
        // a dropped sender counts as a release
        let released = rx.map(|_| ()).boxed().shared();
        Self {
            release: Some(tx),
            released,
        }
    }

    pub(crate) fn waiter(&self) -> LockWaiter {
        self.released.clone()
    }

    fn release(&mut self) {
        if let Some(tx) = self.release.take() {
            let _ = tx.send(());
        }
    }
}

/// Locks of the variables still initializing, keyed by name.
#[derive(Default)]
pub(crate) struct LockTable {
    locks: Mutex<FxHashMap<String, InitLock>>,
}

impl LockTable {
    /// Take a fresh lock for each name, dropping any left over.
    pub(crate) fn acquire_all<'n>(&self, names: impl IntoIterator<Item = &'n str>) {
        let mut locks = self.locks.lock();
        for (_, mut lock) in locks.drain() {
            lock.release();
        }
        for name in names {
            locks.insert(name.to_string(), InitLock::new());
        }
    }

    pub(crate) fn waiter(&self, name: &str) -> Option<LockWaiter> {
        self.locks.lock().get(name).map(InitLock::waiter)
    }

    pub(crate) fn is_locked(&self, name: &str) -> bool {
        self.locks.lock().contains_key(name)
    }

    pub(crate) fn release(&self, name: &str) {
        if let Some(mut lock) = self.locks.lock().remove(name) {
            lock.release();
        }
    }

    pub(crate) fn release_all(&self) {
        let mut locks = self.locks.lock();
        for (_, mut lock) in locks.drain() {
            lock.release();
        }
    }
}
