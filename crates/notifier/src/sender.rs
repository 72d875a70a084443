//! The send operation the dispatcher delivers through.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Why a single delivery attempt did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The messaging API asked us to wait before sending again.
    #[error("throttled, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },

    /// Network, timeout or any other unclassified failure. The dispatcher
    /// retries it after earlier failures, at most once per base interval.
    #[error("send failed: {0}")]
    Failed(String),
}

/// A client able to deliver one text message to the messaging API.
///
/// Only the dispatcher thread calls `send`, and never concurrently.
pub trait MessageSender: Send + 'static {
    fn send(&self, text: &str) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Longest text, in characters, a single `send` accepts. Longer
    /// notifications are split by the dispatcher with [`split_text`].
    fn max_text_len(&self) -> Option<usize> {
        None
    }
}

/// Split `text` into parts of at most `max_chars` characters, cutting after
/// the last newline of a part when there is one. Joining the parts gives
/// back `text`.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut rest = text;
    while let Some((limit, _)) = rest.char_indices().nth(max_chars) {
        let window = &rest[..limit];
        let cut = match window.rfind('\n') {
            Some(newline) if newline > 0 => newline + 1,
            _ => limit,
        };
        parts.push(window[..cut].to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() || parts.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}
