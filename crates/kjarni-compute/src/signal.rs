//! One-shot completion signals.
//!
//! A signal is a pair: the `CompletionNotifier` is handed to whatever fires
//! on the device timeline (a queue work-done callback), the
//! `CompletionSignal` stays with the single waiter. Notifying consumes the
//! notifier, so a signal resolves at most once.

use futures::channel::oneshot;

use crate::error::{ComputeError, ComputeResult};

/// Sending half. Consumed by `notify`.
#[derive(Debug)]
pub struct CompletionNotifier {
    sender: oneshot::Sender<()>,
}

impl CompletionNotifier {
    pub fn notify(self) {
        // The waiter may have given up (timeout, cancellation); nothing to do then.
        let _ = self.sender.send(());
    }
}

/// Receiving half, observed by exactly one waiter.
#[derive(Debug)]
pub struct CompletionSignal {
    receiver: oneshot::Receiver<()>,
    label: String,
    resolved: bool,
}

/// Creates a linked notifier/signal pair.
pub fn completion_signal(label: impl Into<String>) -> (CompletionNotifier, CompletionSignal) {
    let (sender, receiver) = oneshot::channel();
    (
        CompletionNotifier { sender },
        CompletionSignal {
            receiver,
            label: label.into(),
            resolved: false,
        },
    )
}

impl CompletionSignal {
    /// Non-blocking check. `Ok(false)` means still pending.
    pub fn try_resolve(&mut self) -> ComputeResult<bool> {
        if self.resolved {
            return Ok(true);
        }
        match self.receiver.try_recv() {
            Ok(Some(())) => {
                self.resolved = true;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(oneshot::Canceled) => Err(ComputeError::SignalDropped {
                operation: self.label.clone(),
            }),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}
