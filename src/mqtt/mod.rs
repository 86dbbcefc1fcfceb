//! # MQTT Integration Module
//!
//! Everything between the broker socket and the device registry. One tokio
//! task owns the session; it reads deliveries strictly in arrival order and
//! pushes each one through the router before pulling the next.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs         - Broker settings, subscriptions and backoff
//! ├── topic.rs          - Topic shape table and device id extraction
//! ├── transport.rs      - Connect/subscribe/receive seam
//! ├── mqtt_handler.rs   - rumqttc implementation of the seam
//! ├── subscriptions.rs  - Issues the subscription set per session
//! ├── router.rs         - Decode, apply to registry, emit events
//! └── dispatcher.rs     - Session state machine with reconnect loop
//! ```
//!
//! ## Failure Handling
//!
//! A bad message never ends the session. Decode failures, unknown devices and
//! unrecognized topics become diagnostics. Only a broken stream drops the
//! connection, and the dispatcher retries that after a fixed backoff until it
//! is told to stop.

pub mod config;
pub mod dispatcher;
pub mod mqtt_handler;
pub mod router;
pub mod subscriptions;
pub mod topic;
pub mod transport;

pub use topic::{classify, device_id_from_topic, MessageKind};
