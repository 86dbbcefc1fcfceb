//! `tele/<id>/SENSOR` payload: energy and sensor readings

use chrono::NaiveDateTime;
use serde::Deserialize;

/// Point-in-time sensor reading
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetrySnapshot {
    #[serde(rename = "Time")]
    pub timestamp: NaiveDateTime,
    /// Absent on devices without a power metering chip
    #[serde(rename = "ENERGY", default)]
    pub energy: Option<EnergyReading>,
}

/// Electrical metrics of a metering plug; consumption in kWh
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnergyReading {
    #[serde(rename = "TotalStartTime")]
    pub total_start_time: NaiveDateTime,
    #[serde(rename = "Total")]
    pub total: f64,
    #[serde(rename = "Yesterday")]
    pub yesterday: f64,
    #[serde(rename = "Today")]
    pub today: f64,
    /// Energy consumed during the last telemetry period (Wh)
    #[serde(rename = "Period")]
    pub period: f64,
    #[serde(rename = "Power")]
    pub power: f64,
    #[serde(rename = "ApparentPower")]
    pub apparent_power: f64,
    #[serde(rename = "ReactivePower")]
    pub reactive_power: f64,
    #[serde(rename = "Factor")]
    pub factor: f64,
    #[serde(rename = "Voltage")]
    pub voltage: f64,
    #[serde(rename = "Current")]
    pub current: f64,
}
