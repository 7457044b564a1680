//! Per-user write serialization
//!
//! Profile read-merge-write cycles and memory upserts for one user may come
//! from the foreground turn, the action router and background
//! post-processing at the same time. Each takes the user's lock for its scope
//! so concurrent writers queue instead of overwriting each other.
//!
//! Locks are not reentrant: never hold one scope's guard while calling code
//! that takes the same scope.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// What a lock protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    Profile,
    Memory,
}

const SWEEP_AT: usize = 1024;

#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<(String, LockScope), Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, user_id: &str, scope: LockScope) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() >= SWEEP_AT {
                // Only this map holds an idle lock
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks
                .entry((user_id.to_string(), scope))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub async fn profile(&self, user_id: &str) -> OwnedMutexGuard<()> {
        self.lock(user_id, LockScope::Profile).await
    }

    pub async fn memory(&self, user_id: &str) -> OwnedMutexGuard<()> {
        self.lock(user_id, LockScope::Memory).await
    }
}
