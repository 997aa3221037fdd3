//! Seams between the connector and the platform radio stack.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::error::Result;
use crate::domain::models::{DeviceId, DeviceLink};

pub use crate::domain::models::GattProfile;

/// Reports a device whose physical link dropped
pub type LinkLossSender = mpsc::UnboundedSender<DeviceId>;

/// Platform advertisement receiver.
///
/// Advertisements themselves are delivered as [`RadioEvent`]s on the channel
/// the watcher was built with.
///
/// [`RadioEvent`]: crate::domain::models::RadioEvent
pub trait RadioWatcher: Send + Sync {
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

/// The three characteristics a device link is built from
pub struct ResolvedCharacteristics<C> {
    pub write: C,
    pub notify: C,
    pub command: C,
}

/// Service discovery, characteristic lookup and link construction.
///
/// Lookups return `Ok(None)` when the peer answered but lacks the requested
/// item, and `Err` when the exchange itself failed.
#[async_trait]
pub trait NegotiationBackend: Send + Sync + 'static {
    type Device: Clone + Send + Sync + 'static;
    type Service: Send + Sync + 'static;
    type Characteristic: Send + Sync + 'static;
    type Link: DeviceLink + 'static;

    async fn acquire_device(&self, address: u64) -> Result<Option<Self::Device>>;

    fn device_name(&self, device: &Self::Device) -> String;

    async fn primary_service(
        &self,
        device: &Self::Device,
        uuid: Uuid,
    ) -> Result<Option<Self::Service>>;

    async fn characteristic(
        &self,
        service: &Self::Service,
        uuid: Uuid,
    ) -> Result<Option<Self::Characteristic>>;

    /// Build the device driver. `link_loss` must receive the device id once
    /// the physical connection drops.
    async fn open_link(
        &self,
        device: &Self::Device,
        characteristics: ResolvedCharacteristics<Self::Characteristic>,
        link_loss: LinkLossSender,
    ) -> Result<Self::Link>;

    /// Dispose of a device that did not produce a handle
    fn release(&self, device: Self::Device);
}
