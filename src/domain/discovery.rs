//! Scanning contract shared by every transport.

use tokio::sync::broadcast;

use crate::domain::error::Result;
use crate::domain::models::DiscoveryEvent;

/// A source of negotiated devices.
///
/// Implementations publish [`DiscoveryEvent`]s only after the condition they
/// describe has been observed. `DeviceFound` carries a fully negotiated
/// handle, `DeviceRemoved` carries the same logical device that was found,
/// and `Disconnected` means the controller itself stopped being able to
/// discover anything.
pub trait DiscoveryController: Send + Sync {
    /// Begin discovery. Calling this while already scanning is a no-op.
    fn scan_for_devices(&self) -> Result<()>;

    /// Receive every event published from now on
    fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent>;
}
