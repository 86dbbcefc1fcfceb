//! Transport seam between the dispatcher and an MQTT client library
//!
//! The dispatcher only needs four operations: connect, subscribe, pull the
//! next delivery, disconnect. [`crate::mqtt::mqtt_handler`] implements them on
//! rumqttc; tests implement them with scripted in-memory sessions.

use chrono::{DateTime, Local};
use std::fmt;
use std::future::Future;

use crate::error::{ConnectionError, SubscriptionError};
use crate::mqtt::config::BrokerSettings;

/// One publish received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = String::from_utf8_lossy(&self.payload).chars().take(40).collect();
        write!(f, "{}: {} - {}", self.received_at.format("%H:%M:%S"), self.topic, preview)
    }
}

/// Something the open stream produced
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Message(InboundMessage),
    /// The broker refused a subscription after it was sent
    SubscriptionRejected(SubscriptionError),
}

/// Opens broker sessions
pub trait Transport: Send + 'static {
    type Connection: Connection;

    fn connect(
        &mut self,
        settings: &BrokerSettings,
    ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send;
}

/// An open broker session.
///
/// Implementations must release the underlying socket on drop as well as on
/// [`Connection::disconnect`], so that a cancelled or panicking dispatcher
/// never leaks it.
pub trait Connection: Send + 'static {
    fn subscribe(
        &mut self,
        pattern: &str,
    ) -> impl Future<Output = Result<(), SubscriptionError>> + Send;

    /// Next delivery; an error means the stream is gone and the session is over
    fn next_delivery(&mut self) -> impl Future<Output = Result<Delivery, ConnectionError>> + Send;

    /// Closes the session. Safe to call more than once.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}
