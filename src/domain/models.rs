use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::{BleError, Result};

/// Stable identity of a physical device: its 48-bit Bluetooth address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// Command categories a negotiated device accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Positional movement over a duration
    Linear,
    /// Vibration intensity
    Vibrate,
    /// Raw Launch position/speed pairs
    FleshlightLaunch,
}

/// Actuator commands routed to a device link
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Launch firmware 1.2 move: both values in 0..=99
    FleshlightLaunch { speed: u8, position: u8 },
    /// Move to `position` (0.0..=1.0) over `duration_ms`
    Linear { duration_ms: u32, position: f64 },
    /// Vibrate at `speed` (0.0..=1.0)
    Vibrate { speed: f64 },
}

impl DeviceCommand {
    /// Capability a device must advertise to accept this command
    pub fn capability(&self) -> Capability {
        match self {
            Self::FleshlightLaunch { .. } => Capability::FleshlightLaunch,
            Self::Linear { .. } => Capability::Linear,
            Self::Vibrate { .. } => Capability::Vibrate,
        }
    }
}

/// One advertisement delivered by the radio watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementEvent {
    pub address: u64,
    pub service_uuids: Vec<Uuid>,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

impl AdvertisementEvent {
    pub fn new(address: u64, service_uuids: Vec<Uuid>) -> Self {
        Self {
            address,
            service_uuids,
            local_name: None,
            rssi: None,
        }
    }
}

/// GATT identifiers a connector resolves, in resolution order.
/// Defaults to the Fleshlight Launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattProfile {
    pub service: Uuid,
    pub write: Uuid,
    pub notify: Uuid,
    pub command: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: Uuid::from_u128(0x88f80580_0000_01e6_aace_0002a5d5c51b),
            write: Uuid::from_u128(0x88f80581_0000_01e6_aace_0002a5d5c51b),
            notify: Uuid::from_u128(0x88f80582_0000_01e6_aace_0002a5d5c51b),
            command: Uuid::from_u128(0x88f80583_0000_01e6_aace_0002a5d5c51b),
        }
    }
}

/// Notifications from the radio watcher
#[derive(Debug, Clone)]
pub enum RadioEvent {
    Advertisement(AdvertisementEvent),
    /// The watcher stopped on its own; carries the platform reason
    Aborted(String),
}

/// Lifecycle of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Idle,
    Scanning,
    Resolving,
    Connected,
    Failed,
}

/// Device driver behind a negotiated handle.
///
/// Implementations own the platform device object and the resolved
/// characteristics, and know how to encode [`DeviceCommand`]s for them.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Commands this link can encode
    fn capabilities(&self) -> BTreeSet<Capability>;

    /// Device-specific initialization. `Ok(false)` means the device refused.
    async fn handshake(&self) -> Result<bool>;

    async fn send(&self, command: &DeviceCommand) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Release the underlying platform resources
    fn close(&self);
}

/// A fully negotiated device, as published by a discovery controller.
///
/// Cloning is cheap; every clone shares the same link and liveness flag.
#[derive(Clone)]
pub struct DeviceHandle {
    id: DeviceId,
    name: String,
    capabilities: BTreeSet<Capability>,
    link: Arc<dyn DeviceLink>,
    alive: Arc<AtomicBool>,
}

impl DeviceHandle {
    pub fn new(
        id: DeviceId,
        name: String,
        capabilities: BTreeSet<Capability>,
        link: Arc<dyn DeviceLink>,
    ) -> Self {
        Self {
            id,
            name,
            capabilities,
            link,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    /// Advisory check; [`send`](Self::send) does not gate on it
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_connected(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.link.is_connected()
    }

    /// Forward a command to the device link
    pub async fn send(&self, command: &DeviceCommand) -> Result<()> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(BleError::LinkLost);
        }
        self.link.send(command).await
    }

    /// Mark the handle unusable and release its link
    pub(crate) fn invalidate(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.link.close();
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish()
    }
}

/// Events published by a discovery controller
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    DeviceFound(DeviceHandle),
    DeviceRemoved(DeviceHandle),
    /// The controller can no longer discover devices
    Disconnected,
}
