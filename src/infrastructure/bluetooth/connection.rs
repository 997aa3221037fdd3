//! BLE Connection Module
//!
//! GATT resolution for the Launch and the device link built from it.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceService,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataWriter, IBuffer};

use crate::domain::error::{BleError, Result};
use crate::domain::models::{Capability, DeviceCommand, DeviceId, DeviceLink};
use crate::infrastructure::bluetooth::backend::{
    LinkLossSender, NegotiationBackend, ResolvedCharacteristics,
};
use crate::infrastructure::bluetooth::protocol::{self, INIT_COMMAND};

/// [`NegotiationBackend`] over the WinRT GATT client
#[derive(Debug, Default)]
pub struct WinRtBackend;

impl WinRtBackend {
    pub fn new() -> Self {
        Self
    }
}

fn check_status(status: GattCommunicationStatus, what: &str) -> Result<()> {
    if status == GattCommunicationStatus::Success {
        Ok(())
    } else {
        Err(BleError::Backend(format!("{} failed: {:?}", what, status)))
    }
}

#[async_trait]
impl NegotiationBackend for WinRtBackend {
    type Device = BluetoothLEDevice;
    type Service = GattDeviceService;
    type Characteristic = GattCharacteristic;
    type Link = LaunchLink;

    async fn acquire_device(&self, address: u64) -> Result<Option<BluetoothLEDevice>> {
        let operation = BluetoothLEDevice::FromBluetoothAddressAsync(address)?;
        match operation.await {
            Ok(device) => Ok(Some(device)),
            // A null device comes back as an empty error
            Err(e) if e.code().is_ok() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn device_name(&self, device: &BluetoothLEDevice) -> String {
        match device.Name() {
            Ok(name) if !name.is_empty() => name.to_string(),
            _ => "Unknown".to_string(),
        }
    }

    async fn primary_service(
        &self,
        device: &BluetoothLEDevice,
        uuid: Uuid,
    ) -> Result<Option<GattDeviceService>> {
        let result = device
            .GetGattServicesForUuidAsync(protocol::to_guid(uuid))?
            .await?;
        check_status(result.Status()?, "GATT service query")?;

        let services = result.Services()?;
        if services.Size()? == 0 {
            return Ok(None);
        }
        Ok(Some(services.GetAt(0)?))
    }

    async fn characteristic(
        &self,
        service: &GattDeviceService,
        uuid: Uuid,
    ) -> Result<Option<GattCharacteristic>> {
        let result = service
            .GetCharacteristicsForUuidAsync(protocol::to_guid(uuid))?
            .await?;
        check_status(result.Status()?, "Characteristic query")?;

        let characteristics = result.Characteristics()?;
        if characteristics.Size()? == 0 {
            return Ok(None);
        }
        Ok(Some(characteristics.GetAt(0)?))
    }

    async fn open_link(
        &self,
        device: &BluetoothLEDevice,
        characteristics: ResolvedCharacteristics<GattCharacteristic>,
        link_loss: LinkLossSender,
    ) -> Result<LaunchLink> {
        let id = DeviceId(device.BluetoothAddress()?);

        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        info!("{} connection status changed to disconnected", id);
                        let _ = link_loss.send(id);
                    }
                }
                Ok(())
            });
        let status_token = device.ConnectionStatusChanged(&status_handler)?;

        Ok(LaunchLink {
            device: device.clone(),
            write: characteristics.write,
            notify: characteristics.notify,
            command: characteristics.command,
            status_token,
            last_position: Mutex::new(0.0),
        })
    }

    fn release(&self, device: BluetoothLEDevice) {
        if let Err(e) = device.Close() {
            debug!("Closing device failed: {}", e.message());
        }
    }
}

/// Driver for a negotiated Launch
pub struct LaunchLink {
    device: BluetoothLEDevice,
    write: GattCharacteristic,
    notify: GattCharacteristic,
    command: GattCharacteristic,
    status_token: i64,
    /// Last commanded position (0.0..=1.0), the origin for linear moves
    last_position: Mutex<f64>,
}

fn buffer(bytes: &[u8]) -> Result<IBuffer> {
    let writer = DataWriter::new()?;
    writer.WriteBytes(bytes)?;
    Ok(writer.DetachBuffer()?)
}

impl LaunchLink {
    async fn write_to(&self, characteristic: &GattCharacteristic, bytes: &[u8]) -> Result<()> {
        let operation = {
            let buffer = buffer(bytes)?;
            characteristic.WriteValueAsync(&buffer)?
        };
        let status = operation.await?;
        if status != GattCommunicationStatus::Success {
            return Err(BleError::WriteFailed(format!("{:?}", status)));
        }
        Ok(())
    }

    fn swap_position(&self, position: f64) -> f64 {
        let mut last = self
            .last_position
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *last, position)
    }
}

#[async_trait]
impl DeviceLink for LaunchLink {
    fn capabilities(&self) -> BTreeSet<Capability> {
        [Capability::Linear, Capability::FleshlightLaunch]
            .into_iter()
            .collect()
    }

    async fn handshake(&self) -> Result<bool> {
        let status = self
            .notify
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )?
            .await?;
        if status != GattCommunicationStatus::Success {
            warn!("Notification subscription returned status: {:?}", status);
            return Ok(false);
        }

        if let Err(e) = self.write_to(&self.command, INIT_COMMAND).await {
            warn!("Init command rejected: {}", e);
            return Ok(false);
        }
        debug!("Launch switched to position/speed mode");
        Ok(true)
    }

    async fn send(&self, command: &DeviceCommand) -> Result<()> {
        let packet = match *command {
            DeviceCommand::FleshlightLaunch { speed, position } => {
                let packet = protocol::encode_launch(position, speed);
                self.swap_position(f64::from(packet[0]) / f64::from(protocol::MAX_VALUE));
                packet
            }
            DeviceCommand::Linear {
                duration_ms,
                position,
            } => {
                let target = position.clamp(0.0, 1.0);
                let from = self.swap_position(target);
                let (position, speed) = protocol::linear_to_launch(from, target, duration_ms);
                protocol::encode_launch(position, speed)
            }
            DeviceCommand::Vibrate { .. } => return Err(BleError::Unsupported(command.clone())),
        };
        self.write_to(&self.write, &packet).await
    }

    fn is_connected(&self) -> bool {
        self.device
            .ConnectionStatus()
            .map(|s| s == BluetoothConnectionStatus::Connected)
            .unwrap_or(false)
    }

    fn close(&self) {
        let _ = self.device.RemoveConnectionStatusChanged(self.status_token);
        if let Err(e) = self.device.Close() {
            debug!("Closing device failed: {}", e.message());
        }
    }
}

impl Drop for LaunchLink {
    fn drop(&mut self) {
        // No-op after close()
        let _ = self.device.RemoveConnectionStatusChanged(self.status_token);
    }
}
