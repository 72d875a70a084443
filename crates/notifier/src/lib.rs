//! Notification delivery for AlgoMate trading strategies.
//!
//! Strategy threads enqueue text through a [`NotifierHandle`]; a single
//! dispatcher thread delivers it, one message at a time, through a
//! [`MessageSender`] such as [`TelegramSender`]. Sends are spaced by a base
//! interval, throttling replies stretch that interval, and failed messages
//! are retried ahead of new ones.

pub(crate) mod dispatcher;
pub mod lifecycle;
pub mod queue;
pub mod rate_limiter;
pub mod sender;
pub mod telegram;

pub use lifecycle::{DispatcherConfig, Notifier};
pub use queue::NotifierHandle;
pub use sender::{MessageSender, SendError};
pub use telegram::TelegramSender;
