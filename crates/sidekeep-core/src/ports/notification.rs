//! Notification service port (driven/secondary port)
//!
//! Transient, non-fatal notices for the user (successes, conflicts and
//! per-file failures) plus a request to redraw whatever view shows the
//! store.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because notification delivery is adapter-specific.
//! - Notifications are fire-and-forget; the engine logs and ignores
//!   delivery failures.

use serde::{Deserialize, Serialize};

// ============================================================================
// Notification struct and NotificationPriority enum
// ============================================================================

/// Priority level for a notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// A notice to display to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Short title
    pub title: String,
    /// Details, usually naming the affected paths
    pub body: String,
    pub priority: NotificationPriority,
    /// Category for grouping/filtering (`"sync"`, `"conflict"`, `"error"`)
    pub category: String,
}

impl Notification {
    /// Creates a new notification with `Normal` priority and no category
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority: NotificationPriority::Normal,
            category: String::new(),
        }
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Creates a sync-related notification
    pub fn sync(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body).with_category("sync")
    }

    /// Creates an error notification with High priority
    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body)
            .with_priority(NotificationPriority::High)
            .with_category("error")
    }

    /// Creates a conflict notification with High priority
    pub fn conflict(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body)
            .with_priority(NotificationPriority::High)
            .with_category("conflict")
    }
}

// ============================================================================
// INotificationService trait
// ============================================================================

/// Port trait for user-facing notices and view refreshes
#[async_trait::async_trait]
pub trait INotificationService: Send + Sync {
    /// Show a transient notice
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;

    /// Redraw the view of the store
    ///
    /// Called by the refresh debouncer, at most once per quiet period.
    async fn refresh_view(&self) -> anyhow::Result<()>;
}
