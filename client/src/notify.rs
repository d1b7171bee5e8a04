use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A message that must reach the operator before they continue editing.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    pub detail: Option<String>,
    pub raised_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(severity: Severity, message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            detail,
            raised_at: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>, detail: impl ToString) -> Self {
        Self::new(Severity::Error, message, Some(detail.to_string()))
    }

    pub fn warning(message: impl Into<String>, detail: impl ToString) -> Self {
        Self::new(Severity::Warning, message, Some(detail.to_string()))
    }
}

/// Synchronous sink for operator-facing notifications.
///
/// Called on the view's thread while the triggering event is being handled,
/// so an implementation that blocks (a modal dialog) pauses the view.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let detail = notification.detail.as_deref().unwrap_or("");
        match notification.severity {
            Severity::Info => info!(detail, "{}", notification.message),
            Severity::Warning => warn!(detail, "{}", notification.message),
            Severity::Error => error!(detail, "{}", notification.message),
        }
    }
}
