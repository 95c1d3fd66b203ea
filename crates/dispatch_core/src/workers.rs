//! Named supervised workers. Each worker owns a shutdown receiver; the
//! supervisor signals once and joins them all, so process drain is
//! deterministic.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            workers: Vec::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a named worker. The factory receives its own shutdown receiver.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, factory: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = factory(self.shutdown_tx.subscribe());
        let handle = tokio::spawn(async move {
            tracing::debug!(worker = name, "worker started");
            task.await;
            tracing::debug!(worker = name, "worker stopped");
        });
        self.workers.push((name, handle));
    }

    /// Signal shutdown and wait for every worker to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.workers {
            if let Err(err) = handle.await {
                tracing::error!(worker = name, error = %err, "worker terminated abnormally");
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
