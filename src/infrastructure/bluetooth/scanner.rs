//! BLE Scanner Module
//!
//! Advertisement watcher on top of `BluetoothLEAdvertisementWatcher`.

use crate::domain::error::{BleError, Result};
use crate::domain::models::{AdvertisementEvent, RadioEvent};
use crate::infrastructure::bluetooth::backend::RadioWatcher;
use crate::infrastructure::bluetooth::protocol;
use tokio::sync::mpsc;
use tracing::{info, trace, warn};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEAdvertisementWatcherStoppedEventArgs, BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::BluetoothError;
use windows::Foundation::TypedEventHandler;

/// Forwards every advertisement and unexpected watcher stop as a [`RadioEvent`]
pub struct WinRtWatcher {
    watcher: BluetoothLEAdvertisementWatcher,
}

impl WinRtWatcher {
    pub fn new(event_sender: mpsc::UnboundedSender<RadioEvent>) -> Result<Self> {
        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let sender = event_sender.clone();
        let received = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let uuids = adv.ServiceUuids()?;

                    let mut service_uuids = Vec::with_capacity(uuids.Size()? as usize);
                    for i in 0..uuids.Size()? {
                        service_uuids.push(protocol::from_guid(&uuids.GetAt(i)?));
                    }

                    let name = adv.LocalName()?.to_string();
                    let event = AdvertisementEvent {
                        address: args.BluetoothAddress()?,
                        service_uuids,
                        local_name: (!name.is_empty()).then_some(name),
                        rssi: args.RawSignalStrengthInDBm().ok(),
                    };
                    trace!("Advertisement from {:#X}", event.address);
                    let _ = sender.send(RadioEvent::Advertisement(event));
                }
                Ok(())
            },
        );
        watcher.Received(&received)?;

        let sender = event_sender;
        let stopped = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementWatcherStoppedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let error = args.Error()?;
                    if error != BluetoothError::Success {
                        warn!("Advertisement watcher aborted: {:?}", error);
                        let _ = sender.send(RadioEvent::Aborted(format!("{:?}", error)));
                    }
                }
                Ok(())
            },
        );
        watcher.Stopped(&stopped)?;

        Ok(Self { watcher })
    }
}

impl RadioWatcher for WinRtWatcher {
    fn start(&self) -> Result<()> {
        info!("Starting BLE advertisement watcher");
        self.watcher
            .Start()
            .map_err(|e| BleError::Radio(e.message()))
    }

    fn stop(&self) -> Result<()> {
        info!("Stopping BLE advertisement watcher");
        self.watcher
            .Stop()
            .map_err(|e| BleError::Radio(e.message()))
    }
}

impl Drop for WinRtWatcher {
    fn drop(&mut self) {
        let _ = self.watcher.Stop();
    }
}
