//! Scoped store transaction.
//!
//! `TransactionScope` is the explicit replacement for an ambient
//! transaction: it is acquired with [`TransactionScope::begin`] and released
//! by exactly one of `commit`, `rollback` or `abort`, all of which consume
//! it. A scope dropped without being released (panic, early `?`) schedules
//! a rollback on the current runtime.

use std::sync::Arc;

use tracing::warn;

use crate::domain::TransactionId;
use crate::error::{CourierError, Result};
use crate::ports::DurableStore;

pub struct TransactionScope {
    store: Arc<dyn DurableStore>,
    id: TransactionId,
    released: bool,
}

impl TransactionScope {
    pub async fn begin(store: Arc<dyn DurableStore>) -> Result<Self> {
        let id = store.begin().await?;
        Ok(Self {
            store,
            id,
            released: false,
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub async fn savepoint(&self) -> Result<()> {
        self.store.savepoint(self.id).await
    }

    pub async fn rollback_to_savepoint(&self) -> Result<()> {
        self.store.rollback_to_savepoint(self.id).await
    }

    /// Commit; a failed commit is rolled back before the error is returned.
    pub async fn commit(mut self) -> Result<()> {
        self.released = true;
        match self.store.commit(self.id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(self.id).await {
                    warn!(txn = %self.id, error = %rollback_err, "rollback after failed commit failed");
                }
                Err(err)
            }
        }
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.released = true;
        self.store.rollback(self.id).await
    }

    /// Roll back and hand `err` back to the caller, for `return Err(scope.abort(e).await)`.
    pub async fn abort(self, err: CourierError) -> CourierError {
        let id = self.id;
        if let Err(rollback_err) = self.rollback().await {
            warn!(txn = %id, error = %rollback_err, "rollback failed");
        }
        err
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = Arc::clone(&self.store);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = store.rollback(id).await {
                        warn!(txn = %id, error = %err, "rollback of dropped transaction failed");
                    }
                });
            }
            Err(_) => warn!(txn = %id, "transaction dropped outside a runtime; left open"),
        }
    }
}
