//! `tele/<id>/STATE` payload: periodic device status

use chrono::NaiveDateTime;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fmt;

use super::duration::TasmotaDuration;

/// Relay state as last reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    On,
    Off,
    /// The device did not report a relay (sensor-only modules)
    #[default]
    Unknown,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
            PowerState::Unknown => write!(f, "unknown"),
        }
    }
}

fn deserialize_power<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PowerState, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(PowerState::Unknown),
        Some(raw) if raw.eq_ignore_ascii_case("ON") => Ok(PowerState::On),
        Some(raw) if raw.eq_ignore_ascii_case("OFF") => Ok(PowerState::Off),
        Some(raw) => Err(de::Error::custom(format!(
            "unknown power state '{}', expected ON or OFF",
            raw
        ))),
    }
}

/// Point-in-time device status
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateSnapshot {
    #[serde(rename = "Time")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "Uptime")]
    pub uptime: TasmotaDuration,
    #[serde(rename = "UptimeSec", default)]
    pub uptime_secs: Option<u64>,
    #[serde(rename = "Heap")]
    pub heap: u32,
    #[serde(rename = "SleepMode", default)]
    pub sleep_mode: Option<String>,
    #[serde(rename = "Sleep", default)]
    pub sleep: Option<u32>,
    #[serde(rename = "LoadAvg", default)]
    pub load_avg: Option<u32>,
    /// MQTT reconnects since boot
    #[serde(rename = "MqttCount")]
    pub mqtt_count: u32,
    #[serde(rename = "POWER", default, deserialize_with = "deserialize_power")]
    pub power: PowerState,
    #[serde(rename = "Wifi")]
    pub wifi: WifiLink,
}

/// Wi-Fi link quality block of a state report
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WifiLink {
    #[serde(rename = "AP")]
    pub access_point: u8,
    #[serde(rename = "SSId")]
    pub ssid: String,
    #[serde(rename = "BSSId")]
    pub bssid: String,
    #[serde(rename = "Channel")]
    pub channel: u16,
    #[serde(rename = "Mode", default)]
    pub mode: Option<String>,
    /// Signal quality in percent
    #[serde(rename = "RSSI")]
    pub rssi: i32,
    /// Received signal strength in dBm
    #[serde(rename = "Signal")]
    pub signal: i32,
    #[serde(rename = "LinkCount")]
    pub link_count: u32,
    #[serde(rename = "Downtime")]
    pub downtime: TasmotaDuration,
}
