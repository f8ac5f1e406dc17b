//! Cooperative cancellation for a pipeline run
//!
//! A [`CancellationHandle`] is held by whoever owns the request (the HTTP
//! handler, a deadline timer). The orchestrator observes the matching
//! [`CancellationSignal`] before and during every gate invocation.

use tokio::sync::watch;

/// Owner side: triggers cancellation with a reason
#[derive(Debug)]
pub struct CancellationHandle {
    sender: watch::Sender<Option<String>>,
}

/// Observer side: cheap to clone, never cancelled if created with [`never`](CancellationSignal::never)
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    receiver: Option<watch::Receiver<Option<String>>>,
}

/// Create a linked handle and signal
pub fn pair() -> (CancellationHandle, CancellationSignal) {
    let (sender, receiver) = watch::channel(None);
    (
        CancellationHandle { sender },
        CancellationSignal {
            receiver: Some(receiver),
        },
    )
}

impl CancellationHandle {
    /// Cancel the run; the first reason wins
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.sender.borrow().is_some()
    }

    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            receiver: Some(self.sender.subscribe()),
        }
    }
}

impl CancellationSignal {
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn reason(&self) -> Option<String> {
        self.receiver
            .as_ref()
            .and_then(|receiver| receiver.borrow().clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolve with the reason once cancelled; pends forever otherwise
    pub async fn cancelled(&self) -> String {
        let Some(receiver) = &self.receiver else {
            return std::future::pending::<String>().await;
        };
        let mut receiver = receiver.clone();
        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            if receiver.changed().await.is_err() {
                // Handle dropped without cancelling
                return std::future::pending::<String>().await;
            }
        }
    }
}
