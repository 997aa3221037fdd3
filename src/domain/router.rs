//! Fans motion commands out to the devices a discovery controller reported.

use tracing::{debug, info, warn};

use crate::domain::models::{DeviceCommand, DeviceHandle, DeviceId, DiscoveryEvent};

#[derive(Debug)]
struct RoutedDevice {
    handle: DeviceHandle,
    selected: bool,
}

/// Known devices plus the per-device opt-in for command delivery
#[derive(Debug)]
pub struct CommandRouter {
    devices: Vec<RoutedDevice>,
    auto_select: bool,
}

impl CommandRouter {
    /// `auto_select` decides whether newly found devices start out selected
    pub fn new(auto_select: bool) -> Self {
        Self {
            devices: Vec::new(),
            auto_select,
        }
    }

    /// Track a discovery event
    pub fn apply(&mut self, event: &DiscoveryEvent) {
        match event {
            DiscoveryEvent::DeviceFound(handle) => {
                let selected = match self.position(handle.id()) {
                    Some(index) => self.devices.remove(index).selected,
                    None => self.auto_select,
                };
                info!("Device added: {} ({})", handle.name(), handle.id());
                self.devices.push(RoutedDevice {
                    handle: handle.clone(),
                    selected,
                });
            }
            DiscoveryEvent::DeviceRemoved(handle) => {
                if let Some(index) = self.position(handle.id()) {
                    self.devices.remove(index);
                    info!("Device removed: {} ({})", handle.name(), handle.id());
                }
            }
            DiscoveryEvent::Disconnected => {
                if !self.devices.is_empty() {
                    info!("Discovery lost, forgetting {} device(s)", self.devices.len());
                }
                self.devices.clear();
            }
        }
    }

    pub fn devices(&self) -> impl Iterator<Item = (&DeviceHandle, bool)> + '_ {
        self.devices.iter().map(|d| (&d.handle, d.selected))
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Returns false when the device is unknown
    pub fn set_selected(&mut self, id: DeviceId, selected: bool) -> bool {
        match self.devices.iter_mut().find(|d| d.handle.id() == id) {
            Some(device) => {
                device.selected = selected;
                true
            }
            None => false,
        }
    }

    /// Move to `position` (0.0..=1.0) over `duration_ms`
    pub async fn linear(&self, duration_ms: u32, position: f64) -> usize {
        if duration_ms == 0 {
            debug!("Dropping zero-duration linear move");
            return 0;
        }
        self.dispatch(DeviceCommand::Linear {
            duration_ms,
            position,
        })
        .await
    }

    /// Raw Launch move, both values 0..=99
    pub async fn fleshlight_movement(&self, speed: u8, position: u8) -> usize {
        self.dispatch(DeviceCommand::FleshlightLaunch { speed, position })
            .await
    }

    pub async fn vibrate(&self, speed: f64) -> usize {
        self.dispatch(DeviceCommand::Vibrate { speed }).await
    }

    pub async fn stop_vibration(&self) -> usize {
        self.vibrate(0.0).await
    }

    /// Send to every selected device that supports the command; returns the
    /// number of successful deliveries
    async fn dispatch(&self, command: DeviceCommand) -> usize {
        let capability = command.capability();
        let mut delivered = 0;
        for device in &self.devices {
            if !device.selected || !device.handle.supports(capability) {
                continue;
            }
            match device.handle.send(&command).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Failed to send {:?} to {} ({}): {}",
                    command,
                    device.handle.name(),
                    device.handle.id(),
                    e
                ),
            }
        }
        delivered
    }

    fn position(&self, id: DeviceId) -> Option<usize> {
        self.devices.iter().position(|d| d.handle.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Capability, DeviceLink};
    use crate::infrastructure::bluetooth::mock::MockLink;
    use std::sync::Arc;

    fn device(address: u64, caps: &[Capability]) -> (DeviceHandle, Arc<MockLink>) {
        let link = MockLink::standalone(caps.iter().copied());
        let handle = DeviceHandle::new(
            DeviceId(address),
            format!("dev-{}", address),
            link.capabilities(),
            link.clone(),
        );
        (handle, link)
    }

    #[tokio::test]
    async fn test_commands_respect_capabilities() {
        let mut router = CommandRouter::new(true);
        let (launch, launch_link) =
            device(1, &[Capability::Linear, Capability::FleshlightLaunch]);
        let (vibe, vibe_link) = device(2, &[Capability::Vibrate]);
        router.apply(&DiscoveryEvent::DeviceFound(launch));
        router.apply(&DiscoveryEvent::DeviceFound(vibe));

        assert_eq!(router.linear(500, 0.25).await, 1);
        assert_eq!(router.fleshlight_movement(40, 80).await, 1);
        assert_eq!(router.vibrate(0.6).await, 1);
        assert_eq!(router.stop_vibration().await, 1);

        assert_eq!(
            launch_link.sent(),
            vec![
                DeviceCommand::Linear {
                    duration_ms: 500,
                    position: 0.25
                },
                DeviceCommand::FleshlightLaunch {
                    speed: 40,
                    position: 80
                },
            ]
        );
        assert_eq!(
            vibe_link.sent(),
            vec![
                DeviceCommand::Vibrate { speed: 0.6 },
                DeviceCommand::Vibrate { speed: 0.0 },
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_duration_linear_is_dropped() {
        let mut router = CommandRouter::new(true);
        let (launch, link) = device(1, &[Capability::Linear]);
        router.apply(&DiscoveryEvent::DeviceFound(launch));

        assert_eq!(router.linear(0, 0.9).await, 0);
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unselected_devices_are_skipped() {
        let mut router = CommandRouter::new(false);
        let (launch, link) = device(3, &[Capability::FleshlightLaunch]);
        router.apply(&DiscoveryEvent::DeviceFound(launch));

        assert_eq!(router.fleshlight_movement(10, 10).await, 0);
        assert!(router.set_selected(DeviceId(3), true));
        assert!(!router.set_selected(DeviceId(4), true));
        assert_eq!(router.fleshlight_movement(10, 10).await, 1);
        assert_eq!(link.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_does_not_stop_fan_out() {
        let mut router = CommandRouter::new(true);
        let (first, first_link) = device(1, &[Capability::Vibrate]);
        let (second, second_link) = device(2, &[Capability::Vibrate]);
        first_link.fail_sends();
        router.apply(&DiscoveryEvent::DeviceFound(first));
        router.apply(&DiscoveryEvent::DeviceFound(second));

        assert_eq!(router.vibrate(1.0).await, 1);
        assert_eq!(second_link.sent(), vec![DeviceCommand::Vibrate { speed: 1.0 }]);
    }

    #[test]
    fn test_events_maintain_device_list() {
        let mut router = CommandRouter::new(true);
        let (a, _) = device(1, &[Capability::Linear]);
        let (b, _) = device(2, &[Capability::Linear]);

        router.apply(&DiscoveryEvent::DeviceFound(a.clone()));
        router.apply(&DiscoveryEvent::DeviceFound(b.clone()));
        router.set_selected(DeviceId(1), false);

        // Re-found device keeps its selection and is not duplicated
        router.apply(&DiscoveryEvent::DeviceFound(a.clone()));
        let listed: Vec<_> = router.devices().map(|(h, s)| (h.id(), s)).collect();
        assert_eq!(listed, vec![(DeviceId(2), true), (DeviceId(1), false)]);

        router.apply(&DiscoveryEvent::DeviceRemoved(b));
        assert_eq!(router.devices().count(), 1);

        router.apply(&DiscoveryEvent::Disconnected);
        assert!(router.is_empty());
    }
}
