//! Shared, hot-reloadable config state.
//!
//! A single writer lock serializes merges (the watcher) and per-request
//! nonce updates against render-time reads; readers take a cloned snapshot
//! so a merge can never tear a response that is being rendered.

use domain::AppEnv;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct EnvState {
    inner: Arc<RwLock<AppEnv>>,
}

impl EnvState {
    pub fn new(env: AppEnv) -> Self {
        Self {
            inner: Arc::new(RwLock::new(env)),
        }
    }

    pub fn merge(&self, incoming: BTreeMap<String, Option<String>>) {
        self.inner.write().merge(incoming);
    }

    pub fn update(&self, key: &str, value: &str) {
        self.inner.write().update(key, value);
    }

    /// Consistent copy of the current state for one render.
    pub fn snapshot(&self) -> AppEnv {
        self.inner.read().clone()
    }
}
