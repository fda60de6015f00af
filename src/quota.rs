use parking_lot::RwLock;
use std::sync::Arc;

use crate::models::{Quota, Subject};

/// Read on every fingerprint computation, so it must be cheap and synchronous.
pub trait QuotaProvider: Send + Sync {
    fn quota(&self, subject: &Subject) -> Quota;
}

/// Same quota for every subject.
#[derive(Debug, Clone, Copy)]
pub struct StaticQuota(pub Quota);

impl QuotaProvider for StaticQuota {
    fn quota(&self, _subject: &Subject) -> Quota {
        self.0
    }
}

/// Quota that can be swapped while synchronizers are running (plan changes).
#[derive(Debug, Clone, Default)]
pub struct SharedQuota {
    inner: Arc<RwLock<Quota>>,
}

impl SharedQuota {
    pub fn new(quota: Quota) -> Self {
        Self {
            inner: Arc::new(RwLock::new(quota)),
        }
    }

    pub fn set(&self, quota: Quota) {
        *self.inner.write() = quota;
    }
}

impl QuotaProvider for SharedQuota {
    fn quota(&self, _subject: &Subject) -> Quota {
        *self.inner.read()
    }
}
