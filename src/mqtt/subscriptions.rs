//! Subscription Manager
//!
//! Issues the configured topic filters on every transition into a subscribed
//! session, in configuration order. A rejected filter is reported and skipped.

use tracing::{debug, info};

use super::transport::Connection;
use crate::error::SubscriptionError;
use crate::events::{DiagnosticKind, EventSink};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionReport {
    pub accepted: Vec<String>,
    pub failed: Vec<SubscriptionError>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    patterns: Vec<String>,
}

impl SubscriptionManager {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// One request per pattern; failures become diagnostics and never abort the rest
    pub async fn subscribe_all<C: Connection>(
        &self,
        connection: &mut C,
        events: &EventSink,
    ) -> SubscriptionReport {
        let mut report = SubscriptionReport::default();

        for pattern in &self.patterns {
            debug!("Subscribing to {}", pattern);
            match connection.subscribe(pattern).await {
                Ok(()) => report.accepted.push(pattern.clone()),
                Err(e) => {
                    events.diagnostic(DiagnosticKind::SubscriptionFailed, e.to_string());
                    report.failed.push(e);
                }
            }
        }

        info!(
            "Subscribed to {}/{} topic patterns",
            report.accepted.len(),
            self.patterns.len()
        );
        report
    }
}
