//! # Payload Decoders
//!
//! One decoder per recognised message kind. Each is a pure function from the
//! raw payload bytes to a typed record or a [`DecodeError`]; nothing here
//! touches the device registry.
//!
//! JSON payloads are checked in three stages so the error says what went
//! wrong: UTF-8, JSON syntax (must be an object), then the record schema.
//! Fields the firmware adds later are ignored.

pub mod discovery;
pub mod duration;
pub mod last_will;
pub mod state;
pub mod telemetry;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{DecodeError, DecodeErrorKind};

pub use discovery::DiscoveryRecord;
pub use duration::TasmotaDuration;
pub use last_will::{Availability, LastWillLiterals};
pub use state::{PowerState, StateSnapshot, WifiLink};
pub use telemetry::{EnergyReading, TelemetrySnapshot};

fn decode_text<'a>(topic: &str, payload: &'a [u8]) -> Result<&'a str, DecodeError> {
    std::str::from_utf8(payload).map_err(|e| {
        DecodeError::new(
            topic,
            DecodeErrorKind::Encoding,
            format!("payload is not valid UTF-8: {}", e),
        )
    })
}

fn decode_json<T: DeserializeOwned>(topic: &str, payload: &[u8]) -> Result<T, DecodeError> {
    let text = decode_text(topic, payload)?;

    let value: Value = serde_json::from_str(text)
        .map_err(|e| DecodeError::new(topic, DecodeErrorKind::Syntax, e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::new(
            topic,
            DecodeErrorKind::Schema,
            "expected a JSON object",
        ));
    }

    T::deserialize(value)
        .map_err(|e| DecodeError::new(topic, DecodeErrorKind::Schema, e.to_string()))
}

pub fn decode_state(topic: &str, payload: &[u8]) -> Result<StateSnapshot, DecodeError> {
    let snapshot: StateSnapshot = decode_json(topic, payload)?;
    debug!("Decoded state report on {}: power {}", topic, snapshot.power);
    Ok(snapshot)
}

pub fn decode_telemetry(topic: &str, payload: &[u8]) -> Result<TelemetrySnapshot, DecodeError> {
    decode_json(topic, payload)
}

pub fn decode_discovery(topic: &str, payload: &[u8]) -> Result<DiscoveryRecord, DecodeError> {
    decode_json(topic, payload)
}

/// Matches a last-will payload against the device's announced literals
pub fn decode_last_will(
    topic: &str,
    payload: &[u8],
    literals: &LastWillLiterals,
) -> Result<Availability, DecodeError> {
    let text = decode_text(topic, payload)?.trim();

    if text == literals.online {
        Ok(Availability::Online)
    } else if text == literals.offline {
        Ok(Availability::Offline)
    } else {
        Err(DecodeError::new(
            topic,
            DecodeErrorKind::Schema,
            format!(
                "unknown availability '{}', expected '{}' or '{}'",
                text, literals.online, literals.offline
            ),
        ))
    }
}
