use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A text notification queued for delivery.
///
/// Immutable once created; it lives in memory until it is delivered or the
/// process exits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub text: String,
    pub enqueued_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            enqueued_at: Utc::now(),
        }
    }

    /// Time spent waiting since the notification was enqueued.
    pub fn queued_for(&self) -> chrono::Duration {
        Utc::now() - self.enqueued_at
    }
}
