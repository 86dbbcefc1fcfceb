//! Core of a dashboard for Tasmota devices speaking MQTT.
//!
//! Messages from the broker are classified by topic, decoded, and folded into
//! an in-memory [`registry::DeviceRegistry`]. Observers receive one
//! [`events::DashboardEvent`] per processed message over a broadcast channel.

pub mod config;
pub mod error;
pub mod events;
pub mod mqtt;
pub mod payload;
pub mod registry;

pub use mqtt::dispatcher::{ConnectionState, Dispatcher, DispatcherHandle, SessionStatus};
pub use mqtt::mqtt_handler::RumqttcTransport;
