//! # Device Registry
//!
//! In-memory table of every device seen during this session, keyed by its
//! topic identifier.
//!
//! ## Access model
//!
//! The dispatcher task is the only writer; the mutating methods are
//! crate-private. Presentation layers get a [`RegistryView`], which can only
//! read. Records are replaced under the write lock and readers receive owned
//! clones, so a reader never observes a half-applied update.
//!
//! Records are created by discovery messages only and are never removed: a
//! device that leaves the bus goes offline, it does not disappear.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::UnknownDeviceError;
use crate::payload::{DiscoveryRecord, LastWillLiterals, StateSnapshot, TelemetrySnapshot};

/// Topic identifier of a device; case-sensitive
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Everything known about one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub host_name: Option<String>,
    pub display_name: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub firmware: Option<String>,
    pub module: Option<String>,
    pub friendly_names: Vec<String>,
    pub is_online: bool,
    pub availability: LastWillLiterals,
    pub last_state: Option<StateSnapshot>,
    pub last_telemetry: Option<TelemetrySnapshot>,
}

impl DeviceRecord {
    fn from_discovery(id: DeviceId, record: &DiscoveryRecord) -> Self {
        let mut device = Self {
            id,
            host_name: None,
            display_name: None,
            ip_address: None,
            mac_address: None,
            firmware: None,
            module: None,
            friendly_names: Vec::new(),
            is_online: true,
            availability: LastWillLiterals::default(),
            last_state: None,
            last_telemetry: None,
        };
        device.refresh_identity(record);
        device
    }

    /// Overwrites identity fields, leaving state and telemetry alone
    fn refresh_identity(&mut self, record: &DiscoveryRecord) {
        self.host_name = Some(record.host_name.clone());
        self.display_name = Some(record.device_name.clone());
        self.ip_address = Some(record.ip_address.clone());
        self.mac_address = Some(record.mac_address.clone());
        self.firmware = Some(record.firmware.clone());
        self.module = Some(record.module.clone());
        self.friendly_names = record.named_relays();
        self.availability = LastWillLiterals {
            online: record.online_literal.clone(),
            offline: record.offline_literal.clone(),
        };
        self.is_online = true;
    }
}

/// Result of applying a discovery record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Created,
    Refreshed,
}

type DeviceTable = HashMap<DeviceId, DeviceRecord>;

/// Writable registry, owned by the dispatcher
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<DeviceTable>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only handle sharing this registry's table
    pub fn view(&self) -> RegistryView {
        RegistryView {
            devices: self.devices.clone(),
        }
    }

    pub(crate) async fn upsert_from_discovery(
        &self,
        id: DeviceId,
        record: &DiscoveryRecord,
    ) -> DiscoveryOutcome {
        let mut devices = self.devices.write().await;
        match devices.get_mut(&id) {
            Some(device) => {
                debug!("Refreshing identity of {}", id);
                device.refresh_identity(record);
                DiscoveryOutcome::Refreshed
            }
            None => {
                info!(
                    "Discovered device {} ({} at {})",
                    id, record.device_name, record.ip_address
                );
                devices.insert(id.clone(), DeviceRecord::from_discovery(id, record));
                DiscoveryOutcome::Created
            }
        }
    }

    pub(crate) async fn apply_state(
        &self,
        id: &DeviceId,
        snapshot: StateSnapshot,
    ) -> Result<(), UnknownDeviceError> {
        self.update(id, |device| device.last_state = Some(snapshot))
            .await
    }

    pub(crate) async fn apply_telemetry(
        &self,
        id: &DeviceId,
        snapshot: TelemetrySnapshot,
    ) -> Result<(), UnknownDeviceError> {
        self.update(id, |device| device.last_telemetry = Some(snapshot))
            .await
    }

    /// Returns whether the flag actually changed
    pub(crate) async fn mark_online(&self, id: &DeviceId) -> Result<bool, UnknownDeviceError> {
        self.set_online(id, true).await
    }

    /// Returns whether the flag actually changed
    pub(crate) async fn mark_offline(&self, id: &DeviceId) -> Result<bool, UnknownDeviceError> {
        self.set_online(id, false).await
    }

    /// Availability literals for `id`, or the firmware defaults if unknown
    pub(crate) async fn availability_literals(&self, id: &DeviceId) -> LastWillLiterals {
        self.devices
            .read()
            .await
            .get(id)
            .map(|device| device.availability.clone())
            .unwrap_or_default()
    }

    async fn set_online(&self, id: &DeviceId, online: bool) -> Result<bool, UnknownDeviceError> {
        let mut changed = false;
        self.update(id, |device| {
            changed = device.is_online != online;
            device.is_online = online;
        })
        .await?;
        Ok(changed)
    }

    async fn update<F>(&self, id: &DeviceId, apply: F) -> Result<(), UnknownDeviceError>
    where
        F: FnOnce(&mut DeviceRecord),
    {
        let mut devices = self.devices.write().await;
        match devices.get_mut(id) {
            Some(device) => {
                apply(device);
                Ok(())
            }
            None => Err(UnknownDeviceError(id.clone())),
        }
    }

    pub async fn lookup(&self, id: &str) -> Option<DeviceRecord> {
        self.view().lookup(id).await
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }
}

/// Read-only access for rendering layers; cheap to clone
#[derive(Debug, Clone)]
pub struct RegistryView {
    devices: Arc<RwLock<DeviceTable>>,
}

impl RegistryView {
    pub async fn lookup(&self, id: &str) -> Option<DeviceRecord> {
        self.devices.read().await.get(id).cloned()
    }

    /// Snapshot of all records, ordered by device id
    pub async fn all(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    pub async fn online_count(&self) -> usize {
        self.devices
            .read()
            .await
            .values()
            .filter(|device| device.is_online)
            .count()
    }
}
