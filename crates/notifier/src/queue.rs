//! Producer bridge and the dispatcher's two queues.
//!
//! Producers write into an unbounded multi-producer channel that exists from
//! the moment the notifier is built, so nothing is lost if they enqueue before
//! the dispatcher thread is up. The retry queue is a plain `VecDeque` because
//! only the dispatcher ever touches it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use algomate_common::types::Notification;

use crate::lifecycle::Control;

/// Cloneable handle given to producers (one per strategy thread).
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::UnboundedSender<Notification>,
    control: Arc<Control>,
}

impl NotifierHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Notification>, control: Arc<Control>) -> Self {
        Self { tx, control }
    }

    /// Queue a text notification for delivery. Never blocks.
    ///
    /// Once the notifier has been stopped the notification is dropped and a
    /// warning is logged; producers are never handed an error.
    pub fn enqueue(&self, text: impl Into<String>) {
        let notification = Notification::new(text);

        if self.control.is_stopped() {
            tracing::warn!(
                notification_id = %notification.id,
                "Notifier is stopped — dropping notification"
            );
            return;
        }

        if let Err(mpsc::error::SendError(notification)) = self.tx.send(notification) {
            tracing::warn!(
                notification_id = %notification.id,
                "Dispatcher has exited — dropping notification"
            );
        }
    }
}

/// Outcome of waiting for the next notification.
#[derive(Debug)]
pub(crate) enum Next {
    Ready(Notification),
    /// Nothing arrived within the wait window.
    Idle,
    /// A force stop woke the wait.
    Interrupted,
    /// Every producer handle is gone and both queues are empty.
    Closed,
}

/// Consumer side: retry queue first, then the incoming channel.
pub(crate) struct DispatchQueues {
    retry: VecDeque<Notification>,
    incoming: mpsc::UnboundedReceiver<Notification>,
}

impl DispatchQueues {
    pub(crate) fn new(incoming: mpsc::UnboundedReceiver<Notification>) -> Self {
        Self {
            retry: VecDeque::new(),
            incoming,
        }
    }

    /// Next notification to attempt: retry head, else the oldest new one.
    pub(crate) async fn next(&mut self, window: Duration, control: &Control) -> Next {
        if let Some(notification) = self.retry.pop_front() {
            return Next::Ready(notification);
        }

        tokio::select! {
            biased;
            _ = control.woken() => Next::Interrupted,
            received = tokio::time::timeout(window, self.incoming.recv()) => match received {
                Ok(Some(notification)) => Next::Ready(notification),
                Ok(None) => Next::Closed,
                Err(_) => Next::Idle,
            },
        }
    }

    /// Throttled notifications go back to the head of the retry queue.
    pub(crate) fn retry_first(&mut self, notification: Notification) {
        self.retry.push_front(notification);
    }

    /// Failed notifications wait behind earlier retries.
    pub(crate) fn retry_later(&mut self, notification: Notification) {
        self.retry.push_back(notification);
    }

    /// Notifications still held in either queue.
    pub(crate) fn pending(&self) -> usize {
        self.retry.len() + self.incoming.len()
    }
}
