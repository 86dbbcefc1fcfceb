//! `tasmota/discovery/<id>/config` payload: device self-announcement
//!
//! Most of the record is passed through untouched. The dispatcher only reads
//! the topic identifier, addresses, names and the last-will literals.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiscoveryRecord {
    #[serde(rename = "ip")]
    pub ip_address: String,
    #[serde(rename = "dn")]
    pub device_name: String,
    /// One slot per relay; unused slots are null
    #[serde(rename = "fn")]
    pub friendly_names: Vec<Option<String>>,
    #[serde(rename = "hn")]
    pub host_name: String,
    #[serde(rename = "mac")]
    pub mac_address: String,
    #[serde(rename = "md")]
    pub module: String,
    #[serde(rename = "ty")]
    pub tuya: i64,
    #[serde(rename = "if")]
    pub interface: i64,
    /// Payload the broker publishes on `tele/<id>/LWT` when the device drops
    #[serde(rename = "ofln")]
    pub offline_literal: String,
    #[serde(rename = "onln")]
    pub online_literal: String,
    /// Accepted state words: off, on, toggle, hold
    #[serde(rename = "state")]
    pub state_words: Vec<String>,
    #[serde(rename = "sw")]
    pub firmware: String,
    /// Topic identifier, the device's id on the bus
    #[serde(rename = "t")]
    pub topic: String,
    #[serde(rename = "ft")]
    pub full_topic: String,
    #[serde(rename = "tp")]
    pub topic_prefixes: Vec<String>,
    #[serde(rename = "rl", default)]
    pub relays: Vec<i64>,
    #[serde(rename = "swc", default)]
    pub switch_configs: Vec<i64>,
    #[serde(rename = "swn", default)]
    pub switch_names: Vec<Option<String>>,
    #[serde(rename = "btn", default)]
    pub buttons: Vec<i64>,
    #[serde(rename = "so", default)]
    pub set_options: BTreeMap<String, i64>,
    #[serde(rename = "lk", default)]
    pub light_link: i64,
    #[serde(rename = "lt_st", default)]
    pub light_subtype: i64,
    #[serde(rename = "bat", default)]
    pub battery: i64,
    #[serde(rename = "dslp", default)]
    pub deep_sleep: i64,
    #[serde(rename = "sho", default)]
    pub shutter_options: Vec<Value>,
    #[serde(rename = "sht", default)]
    pub shutter_tilt: Vec<Value>,
    #[serde(rename = "ver", default)]
    pub version: i64,
}

impl DiscoveryRecord {
    /// Friendly names with the empty relay slots removed
    pub fn named_relays(&self) -> Vec<String> {
        self.friendly_names
            .iter()
            .flatten()
            .filter(|name| !name.is_empty())
            .cloned()
            .collect()
    }

    pub fn relay_count(&self) -> usize {
        self.relays.iter().filter(|kind| **kind != 0).count()
    }

    pub fn button_count(&self) -> usize {
        self.buttons.iter().filter(|kind| **kind != 0).count()
    }

    pub fn switch_count(&self) -> usize {
        self.switch_configs.iter().filter(|mode| **mode != -1).count()
    }
}
