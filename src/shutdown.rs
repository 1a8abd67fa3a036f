//! Process-wide shutdown broadcast
//!
//! A single watch channel fans the shutdown signal out to every task:
//! dispatchers stop claiming, the sweeper and registrar finish their current
//! tick, and in-flight job executions get a bounded grace period to unwind.
//! All other coordination between tasks goes through the backing database.

use tokio::sync::watch;

/// Trigger side of the shutdown broadcast
#[derive(Clone)]
pub struct Shutdown {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// Obtain a listener for a task
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Broadcast shutdown to every listener
    pub fn trigger(&self) {
        // Send only fails when every listener is gone, which is fine here.
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side, cloned into each task
#[derive(Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been triggered.
    ///
    /// A dropped trigger counts as shutdown so orphaned tasks never hang.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        loop {
            if self.rx.changed().await.is_err() {
                return;
            }
            if *self.rx.borrow() {
                return;
            }
        }
    }
}
