//! Worker pool running the dispatcher.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::app::dispatcher::Dispatcher;
use crate::error::ErrorKind;
use crate::recoverability::InfrastructureBackoff;

/// Worker group handle.
/// - dropping `shutdown_tx` stops every worker
/// - `shutdown_and_join()` waits for all of them
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers over the same dispatcher.
    pub fn spawn(n: usize, dispatcher: Arc<Dispatcher>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let d = Arc::clone(&dispatcher);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, d, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new messages. A message already being processed is
    /// finished, never cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(err) = j.await {
                error!(error = %err, "worker task panicked");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    dispatcher: Arc<Dispatcher>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut backoff = InfrastructureBackoff::default();
    debug!(worker_id, queue = %dispatcher.input_queue(), "worker started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // process_next is not raced against shutdown: once a message is
        // received it runs to commit or rollback
        match dispatcher.process_next().await {
            Ok(Some(outcome)) => {
                backoff.reset();
                trace!(worker_id, ?outcome, "message handled");
            }
            Ok(None) => {
                backoff.reset();
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = dispatcher.wait_for_message() => {}
                }
            }
            Err(err) => match err.kind() {
                ErrorKind::Infrastructure => {
                    let delay = backoff.next_delay();
                    warn!(
                        worker_id,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "infrastructure error, backing off"
                    );
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                // already moved to the error queue by the dispatcher
                ErrorKind::Configuration => {
                    error!(worker_id, error = %err, "configuration error");
                }
                _ => error!(worker_id, error = %err, "unexpected dispatch error"),
            },
        }
    }

    debug!(worker_id, "worker stopped");
}
