//! Lifecycle of the notification dispatcher.
//!
//! `Notifier` owns the dispatcher until `start()` moves it onto a dedicated
//! OS thread running a current-thread tokio runtime. Producers get cheap
//! `NotifierHandle` clones; the owning process keeps the `Notifier` to stop
//! and join it. A panic on the dispatcher thread is not recovered: `join()`
//! reports it and the owner decides whether to build a new notifier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio::sync::mpsc;

use algomate_common::config::AppConfig;
use algomate_common::error::AppError;

use crate::dispatcher::Dispatcher;
use crate::queue::{DispatchQueues, NotifierHandle};
use crate::sender::MessageSender;

/// Name of the dispatcher thread.
const THREAD_NAME: &str = "notifier-dispatch";

/// Pacing settings for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Minimum spacing between two successful sends.
    pub base_interval: Duration,
    /// How long an empty dispatcher waits before re-checking for a stop.
    pub idle_wait: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(500),
            idle_wait: Duration::from_millis(500),
        }
    }
}

impl From<&AppConfig> for DispatcherConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_interval: Duration::from_millis(config.base_interval_ms),
            idle_wait: Duration::from_millis(config.idle_wait_ms),
        }
    }
}

/// Stop and readiness signals shared by the notifier, its handles and the
/// dispatcher loop.
#[derive(Debug, Default)]
pub(crate) struct Control {
    stopped: AtomicBool,
    wake: Notify,
    ready: Mutex<bool>,
    ready_changed: Condvar,
}

impl Control {
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub(crate) fn force_stop(&self) {
        self.stop();
        self.wake.notify_one();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves when `force_stop` is called (or was called while nobody waited).
    pub(crate) fn woken(&self) -> Notified<'_> {
        self.wake.notified()
    }

    pub(crate) fn mark_ready(&self) {
        *self.ready.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.ready_changed.notify_all();
    }

    pub(crate) fn is_ready(&self) -> bool {
        *self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_ready(&self, timeout: Duration) -> bool {
        let guard = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .ready_changed
            .wait_timeout_while(guard, timeout, |ready| !*ready)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Rate-limited, single-consumer notification dispatcher.
pub struct Notifier<S> {
    handle: NotifierHandle,
    control: Arc<Control>,
    dispatcher: Mutex<Option<Dispatcher<S>>>,
    worker: Mutex<Option<JoinHandle<Result<(), AppError>>>>,
}

impl<S: MessageSender> Notifier<S> {
    /// Build a notifier around `sender`. Nothing runs until `start()`, but
    /// notifications may already be enqueued.
    pub fn new(sender: S, config: DispatcherConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = Arc::new(Control::default());
        let dispatcher = Dispatcher::new(sender, DispatchQueues::new(rx), &config, control.clone());

        Self {
            handle: NotifierHandle::new(tx, control.clone()),
            control,
            dispatcher: Mutex::new(Some(dispatcher)),
            worker: Mutex::new(None),
        }
    }

    /// A producer handle; clone it into every strategy thread.
    pub fn handle(&self) -> NotifierHandle {
        self.handle.clone()
    }

    /// Shorthand for `self.handle().enqueue(text)`.
    pub fn enqueue(&self, text: impl Into<String>) {
        self.handle.enqueue(text);
    }

    /// Spawn the dispatcher thread and return immediately.
    ///
    /// Readiness is asynchronous; see [`Notifier::wait_ready`].
    pub fn start(&self) -> Result<(), AppError> {
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(AppError::AlreadyStarted)?;

        let worker = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || -> Result<(), AppError> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(dispatcher.run());
                Ok(())
            })?;

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
        tracing::debug!(thread = THREAD_NAME, "Dispatcher thread spawned");
        Ok(())
    }

    /// Whether the dispatcher loop is running (or has run).
    pub fn is_ready(&self) -> bool {
        self.control.is_ready()
    }

    /// Block until the dispatcher loop is running, up to `timeout`.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        self.control.wait_ready(timeout)
    }

    /// Ask the dispatcher to stop at its next loop boundary. Does not block.
    ///
    /// Notifications still queued at that point are abandoned.
    pub fn stop(&self) {
        tracing::info!("Notifier stop requested");
        self.control.stop();
    }

    /// Stop, and also cut short an idle wait or throttle sleep. An in-flight
    /// send still runs to completion.
    pub fn force_stop(&self) {
        tracing::info!("Notifier force stop requested");
        self.control.force_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }

    /// Block until the dispatcher thread has exited.
    ///
    /// Returns `ConsumerPanicked` if the thread died from a panic. Joining an
    /// already joined notifier returns `Ok(())`.
    pub fn join(&self) -> Result<(), AppError> {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(worker) = worker else {
            let started = self
                .dispatcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_none();
            return if started { Ok(()) } else { Err(AppError::NotStarted) };
        };

        match worker.join() {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(error = %reason, "Dispatcher thread panicked");
                Err(AppError::ConsumerPanicked(reason))
            }
        }
    }
}

impl<S> Drop for Notifier<S> {
    fn drop(&mut self) {
        // A detached dispatcher thread must not outlive its owner.
        self.control.force_stop();
    }
}
