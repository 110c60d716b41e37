//! Notification sink (spec §4.15). Strategies report halts, reconcile
//! actions and ladder exhaustion through a `Notifier` rather than calling
//! `log::*` directly, so an operator can plug in a webhook without touching
//! strategy code.
//!
//! Grounded on the teacher's `publisher.rs` status-push idiom — the shape
//! (session id, a short reason, severity) mirrors `MmStatusPublisher::publish_status`,
//! but the Redis transport is dropped in favour of a `reqwest` webhook
//! (no Python-side subscriber exists in this domain).

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub session_id: String,
    pub severity: Severity,
    pub message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, note: Notification);
}

/// Always available; every other notifier composes with this one so a
/// notification is never lost purely because a webhook failed.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, note: Notification) {
        match note.severity {
            Severity::Info => log::info!("[{}] {}", note.session_id, note.message),
            Severity::Warn => log::warn!("[{}] {}", note.session_id, note.message),
            Severity::Critical => log::error!("[{}] {}", note.session_id, note.message),
        }
    }
}

/// Posts the same payload shape to an operator-configured webhook. Failures
/// are logged, never propagated — a broken webhook must not stop trading.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, note: Notification) {
        if let Err(e) = self.client.post(&self.url).json(&note).send().await {
            log::warn!("[NOTIFY] webhook delivery failed: {e}");
        }
    }
}

/// Fans a notification out to every configured sink.
pub struct CompositeNotifier {
    sinks: Vec<Box<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new(sinks: Vec<Box<dyn Notifier>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    async fn notify(&self, note: Notification) {
        for sink in &self.sinks {
            sink.notify(note.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_does_not_panic_on_any_severity() {
        let notifier = LogNotifier;
        notifier
            .notify(Notification {
                session_id: "s1".to_string(),
                severity: Severity::Critical,
                message: "stop price breached".to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn composite_notifier_dispatches_to_all_sinks() {
        let composite = CompositeNotifier::new(vec![Box::new(LogNotifier), Box::new(LogNotifier)]);
        composite
            .notify(Notification {
                session_id: "s1".to_string(),
                severity: Severity::Info,
                message: "ladder advanced".to_string(),
            })
            .await;
    }
}
