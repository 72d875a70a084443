//! Dispatcher loop — the single consumer that delivers notifications.
//!
//! Each iteration:
//! 1. Waits for work: retry queue head, else message queue head, within the
//!    idle window (stop requests are honoured when the window expires empty)
//! 2. Splits text too long for the sender into parts; the first part is sent
//!    now, the rest go to the head of the retry queue
//! 3. Sleeps off whatever remains of the rate limiter's interval
//! 4. Sends, then classifies the outcome:
//!    - success: stamp the send time, reset the interval
//!    - throttled: raise the interval, sleep `retry_after`, retry first
//!    - failed: log, retry after earlier failures, one base interval later
//! 5. Exits if a stop was requested, whatever is still queued
//!
//! A send that has started always runs to completion; force stop only cuts
//! short the idle wait and the throttle sleeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use algomate_common::types::Notification;

use crate::lifecycle::{Control, DispatcherConfig};
use crate::queue::{DispatchQueues, Next};
use crate::rate_limiter::RateLimiter;
use crate::sender::{MessageSender, SendError, split_text};

pub(crate) struct Dispatcher<S> {
    sender: S,
    queues: DispatchQueues,
    limiter: RateLimiter,
    idle_wait: Duration,
    control: Arc<Control>,
}

impl<S: MessageSender> Dispatcher<S> {
    pub(crate) fn new(
        sender: S,
        queues: DispatchQueues,
        config: &DispatcherConfig,
        control: Arc<Control>,
    ) -> Self {
        Self {
            sender,
            queues,
            limiter: RateLimiter::new(config.base_interval),
            idle_wait: config.idle_wait,
            control,
        }
    }

    /// Run until stopped or until every producer handle is dropped.
    pub(crate) async fn run(mut self) {
        self.control.mark_ready();

        tracing::info!(
            base_interval_ms = self.limiter.base_interval().as_millis() as u64,
            idle_wait_ms = self.idle_wait.as_millis() as u64,
            "Notification dispatcher started"
        );

        loop {
            let notification = match self.queues.next(self.idle_wait, &self.control).await {
                Next::Ready(notification) => notification,
                Next::Idle if self.control.is_stopped() => break,
                Next::Idle => continue,
                Next::Interrupted => break,
                Next::Closed => {
                    tracing::info!("All notifier handles dropped — nothing left to deliver");
                    break;
                }
            };
            let notification = self.fit_to_sender(notification);

            if let Some(delay) = self.limiter.delay_before_send(Instant::now()) {
                if !self.pause(delay).await {
                    self.queues.retry_first(notification);
                    break;
                }
            }

            if !self.attempt(notification).await {
                break;
            }

            if self.control.is_stopped() {
                break;
            }
        }

        let abandoned = self.queues.pending();
        if abandoned > 0 {
            tracing::warn!(abandoned, "Notification dispatcher stopped with undelivered notifications");
        } else {
            tracing::info!("Notification dispatcher stopped");
        }
    }

    /// One send attempt. Returns `false` if a force stop cut the throttle sleep.
    async fn attempt(&mut self, notification: Notification) -> bool {
        match self.sender.send(&notification.text).await {
            Ok(()) => {
                self.limiter.record_success(Instant::now());
                tracing::debug!(
                    notification_id = %notification.id,
                    queued_ms = notification.queued_for().num_milliseconds(),
                    "Notification delivered"
                );
                true
            }
            Err(SendError::Throttled { retry_after }) => {
                self.limiter.record_throttle(retry_after);
                tracing::warn!(
                    notification_id = %notification.id,
                    retry_after_ms = retry_after.as_millis() as u64,
                    interval_ms = self.limiter.current_interval().as_millis() as u64,
                    "Rate limit exceeded — backing off"
                );
                let completed = self.pause(retry_after).await;
                self.queues.retry_first(notification);
                completed
            }
            Err(SendError::Failed(reason)) => {
                tracing::error!(
                    notification_id = %notification.id,
                    error = %reason,
                    "Failed to send notification — queued for retry"
                );
                self.limiter.record_failure(Instant::now());
                self.queues.retry_later(notification);
                true
            }
        }
    }

    /// Cut a notification the sender cannot take in one piece. Parts keep the
    /// notification's id and are delivered in order before anything else.
    fn fit_to_sender(&mut self, notification: Notification) -> Notification {
        let Some(max_chars) = self.sender.max_text_len() else {
            return notification;
        };
        if notification.text.chars().count() <= max_chars {
            return notification;
        }

        let mut parts: Vec<Notification> = split_text(&notification.text, max_chars)
            .into_iter()
            .map(|text| Notification {
                text,
                ..notification.clone()
            })
            .collect();
        tracing::debug!(
            notification_id = %notification.id,
            parts = parts.len(),
            max_chars,
            "Notification split to fit the sender"
        );

        let first = parts.remove(0);
        for part in parts.into_iter().rev() {
            self.queues.retry_first(part);
        }
        first
    }

    /// Sleep for `duration`; returns `false` if a force stop woke us early.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.control.woken() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use crate::queue::NotifierHandle;

    const BASE: Duration = Duration::from_millis(500);

    /// Scripted sender: per-text list of outcomes, `Ok` once exhausted.
    #[derive(Clone, Default)]
    struct ScriptedSender {
        script: Arc<Mutex<HashMap<String, Vec<Result<(), SendError>>>>>,
        calls: Arc<Mutex<Vec<(String, Instant)>>>,
        max_len: Option<usize>,
    }

    impl ScriptedSender {
        /// Rejects anything longer than `max_len`, like the Bot API does.
        fn limited(max_len: usize) -> Self {
            Self {
                max_len: Some(max_len),
                ..Self::default()
            }
        }

        fn on(&self, text: &str, outcomes: Vec<Result<(), SendError>>) {
            self.script.lock().unwrap().insert(text.to_string(), outcomes);
        }

        fn calls(&self) -> Vec<(String, Instant)> {
            self.calls.lock().unwrap().clone()
        }

        fn texts(&self) -> Vec<String> {
            self.calls().into_iter().map(|(text, _)| text).collect()
        }
    }

    impl MessageSender for ScriptedSender {
        async fn send(&self, text: &str) -> Result<(), SendError> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), Instant::now()));
            if self.max_len.is_some_and(|max| text.chars().count() > max) {
                return Err(SendError::Failed("Bad Request: message is too long".into()));
            }
            let mut script = self.script.lock().unwrap();
            match script.get_mut(text) {
                Some(outcomes) if !outcomes.is_empty() => outcomes.remove(0),
                _ => Ok(()),
            }
        }

        fn max_text_len(&self) -> Option<usize> {
            self.max_len
        }
    }

    fn dispatcher(
        sender: ScriptedSender,
    ) -> (Dispatcher<ScriptedSender>, NotifierHandle, Arc<Control>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = Arc::new(Control::default());
        let config = DispatcherConfig {
            base_interval: BASE,
            idle_wait: BASE,
        };
        (
            Dispatcher::new(sender, DispatchQueues::new(rx), &config, control.clone()),
            NotifierHandle::new(tx, control.clone()),
            control,
        )
    }

    /// Enqueue `texts`, drop the handle and run the loop until it drains.
    async fn drain(sender: &ScriptedSender, texts: &[&str]) {
        let (dispatcher, handle, _control) = dispatcher(sender.clone());
        for text in texts {
            handle.enqueue(*text);
        }
        drop(handle);
        dispatcher.run().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_in_fifo_order() {
        let sender = ScriptedSender::default();
        drain(&sender, &["a", "b", "c", "d"]).await;
        assert_eq!(sender.texts(), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_are_spaced_by_base_interval() {
        let sender = ScriptedSender::default();
        drain(&sender, &["1", "2", "3", "4", "5"]).await;

        let calls = sender.calls();
        assert_eq!(calls.len(), 5);
        for pair in calls.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= BASE);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_message_retried_before_new_work() {
        let sender = ScriptedSender::default();
        sender.on("b", vec![Err(SendError::Failed("connection reset".into()))]);
        drain(&sender, &["a", "b", "c", "d"]).await;

        assert_eq!(sender.texts(), vec!["a", "b", "b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_their_relative_order() {
        let sender = ScriptedSender::default();
        sender.on(
            "a",
            vec![
                Err(SendError::Failed("timeout".into())),
                Err(SendError::Failed("timeout".into())),
            ],
        );
        drain(&sender, &["a", "b"]).await;

        assert_eq!(sender.texts(), vec!["a", "a", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_retries_are_spaced_by_base_interval() {
        let sender = ScriptedSender::default();
        sender.on(
            "a",
            vec![
                Err(SendError::Failed("network down".into())),
                Err(SendError::Failed("network down".into())),
            ],
        );
        drain(&sender, &["a"]).await;

        let calls = sender.calls();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= BASE);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_message_is_split_and_does_not_starve_later_ones() {
        let sender = ScriptedSender::limited(4096);
        let long = "x".repeat(5000);
        drain(&sender, &[long.as_str(), "PnL update"]).await;

        let texts = sender.texts();
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[0].len(), 4096);
        assert_eq!(texts[1].len(), 904);
        assert_eq!(texts[2], "PnL update");
        assert_eq!(texts[..2].concat(), long);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_part_is_retried_alone() {
        let sender = ScriptedSender::limited(4);
        sender.on("cc", vec![Err(SendError::Failed("timeout".into()))]);
        drain(&sender, &["bbbbcc", "d"]).await;

        assert_eq!(sender.texts(), vec!["bbbb", "cc", "cc", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_message_waits_then_goes_first() {
        let retry_after = Duration::from_secs(3);
        let sender = ScriptedSender::default();
        sender.on("b", vec![Err(SendError::Throttled { retry_after })]);
        drain(&sender, &["a", "b", "c"]).await;

        let calls = sender.calls();
        let texts: Vec<_> = calls.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "b", "c"]);

        // Retry only after `retry_after`
        assert!(calls[2].1 - calls[1].1 >= retry_after);
        // Interval back to base after the successful retry
        assert!(calls[3].1 - calls[2].1 >= BASE);
        assert!(calls[3].1 - calls[2].1 < retry_after);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_takes_effect_after_current_send() {
        let sender = ScriptedSender::default();
        let (dispatcher, handle, control) = dispatcher(sender.clone());
        for text in ["a", "b", "c"] {
            handle.enqueue(text);
        }
        control.stop();

        dispatcher.run().await;
        assert_eq!(sender.texts(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_idle_exits_after_window() {
        let sender = ScriptedSender::default();
        let (dispatcher, _handle, control) = dispatcher(sender.clone());

        let started = Instant::now();
        tokio::join!(dispatcher.run(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            control.stop();
        });

        assert!(sender.calls().is_empty());
        assert!(started.elapsed() >= BASE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_stop_interrupts_throttle_sleep() {
        let sender = ScriptedSender::default();
        sender.on(
            "a",
            vec![Err(SendError::Throttled {
                retry_after: Duration::from_secs(600),
            })],
        );
        let (dispatcher, handle, control) = dispatcher(sender.clone());
        handle.enqueue("a");

        let started = Instant::now();
        tokio::join!(dispatcher.run(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            control.force_stop();
        });

        assert_eq!(sender.texts(), vec!["a"]);
        assert!(started.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_marks_ready() {
        let sender = ScriptedSender::default();
        let (dispatcher, handle, control) = dispatcher(sender);
        assert!(!control.is_ready());
        drop(handle);
        dispatcher.run().await;
        assert!(control.is_ready());
    }
}
