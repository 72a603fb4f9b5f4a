//! Debounced view refresh
//!
//! Every mutation asks for the view of the store to be redrawn. Requests
//! arriving within the quiet period collapse into one call to
//! [`INotificationService::refresh_view`]; a new request aborts the pending
//! one and restarts the timer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sidekeep_core::ports::INotificationService;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

pub struct RefreshDebouncer {
    notifier: Arc<dyn INotificationService>,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshDebouncer {
    pub fn new(notifier: Arc<dyn INotificationService>, delay: Duration) -> Self {
        Self {
            notifier,
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Schedule a refresh, superseding any pending one
    ///
    /// Must be called from within a Tokio runtime.
    pub fn request(&self) {
        let notifier = Arc::clone(&self.notifier);
        let delay = self.delay;

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trace!("Refreshing view");
            if let Err(e) = notifier.refresh_view().await {
                warn!(error = %e, "View refresh failed");
            }
        }));
    }

    /// Drop a pending refresh without running it
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = pending.take() {
            handle.abort();
        }
    }
}

impl Drop for RefreshDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
