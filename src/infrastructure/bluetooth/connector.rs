//! BLE Connector
//!
//! Advertisement-driven discovery for the Launch. One advertisement at a time
//! is turned into a negotiated [`DeviceHandle`]:
//!
//! ```text
//! Idle ──start──▶ Scanning ──advertisement──▶ Resolving ──┬──▶ Connected
//!                    ▲                                    │        │
//!                    └───────────── Failed ◀──────────────┘        │
//!                    └─────────────────── link lost ◀──────────────┘
//! ```
//!
//! The scan guard is the only place that decides whether a new attempt may
//! begin. An advertisement that passes the guard stops the watcher before any
//! asynchronous work, so later advertisements are dropped until the attempt
//! finishes and scanning resumes.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::domain::discovery::DiscoveryController;
use crate::domain::error::{BleError, Result};
use crate::domain::models::{
    AdvertisementEvent, ConnectorState, DeviceHandle, DeviceId, DeviceLink, DiscoveryEvent,
    RadioEvent,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::backend::{
    GattProfile, LinkLossSender, NegotiationBackend, RadioWatcher, ResolvedCharacteristics,
};
use crate::infrastructure::bluetooth::cancel::{CancelSignal, CancelTrigger};

/// Tuning for the resolution pipeline
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// GATT identifiers to resolve
    pub profile: GattProfile,
    /// Pause between acquiring a device and querying its services
    pub settle_delay: Duration,
    /// Upper bound for each backend step
    pub step_timeout: Duration,
    /// Events buffered per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            profile: GattProfile::default(),
            settle_delay: Duration::from_millis(3000),
            step_timeout: Duration::from_secs(10),
            event_capacity: 64,
        }
    }
}

impl ConnectorConfig {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            profile: settings.gatt_profile()?,
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            step_timeout: Duration::from_millis(settings.step_timeout_ms),
            ..Self::default()
        })
    }
}

/// Progress of a single advertisement through the resolution sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionAttempt {
    pub address: u64,
    pub device_acquired: bool,
    pub service_found: bool,
    pub write_found: bool,
    pub notify_found: bool,
    pub command_found: bool,
    pub handshake_complete: bool,
}

impl ResolutionAttempt {
    fn new(address: u64) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.device_acquired
            && self.service_found
            && self.write_found
            && self.notify_found
            && self.command_found
            && self.handshake_complete
    }
}

#[derive(Debug)]
struct ScanGuard {
    discovering: bool,
    /// Set when the watcher failed; only an explicit start clears it
    radio_failed: bool,
    /// A start was requested while an attempt was in flight
    pending_start: bool,
    state: ConnectorState,
}

/// Discovery controller backed by a BLE advertisement watcher
pub struct BleConnector<W, B: NegotiationBackend> {
    guard: Mutex<ScanGuard>,
    watcher: W,
    backend: B,
    config: ConnectorConfig,
    events: broadcast::Sender<DiscoveryEvent>,
    link_loss_tx: LinkLossSender,
    link_loss_rx: Mutex<Option<mpsc::UnboundedReceiver<DeviceId>>>,
    tracked: Mutex<Vec<DeviceHandle>>,
    shutdown: CancelTrigger,
}

impl<W, B> BleConnector<W, B>
where
    W: RadioWatcher + 'static,
    B: NegotiationBackend,
{
    pub fn new(watcher: W, backend: B, config: ConnectorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (link_loss_tx, link_loss_rx) = mpsc::unbounded_channel();

        Self {
            guard: Mutex::new(ScanGuard {
                discovering: false,
                radio_failed: false,
                pending_start: false,
                state: ConnectorState::Idle,
            }),
            watcher,
            backend,
            config,
            events,
            link_loss_tx,
            link_loss_rx: Mutex::new(Some(link_loss_rx)),
            tracked: Mutex::new(Vec::new()),
            shutdown: CancelTrigger::new(),
        }
    }

    pub fn state(&self) -> ConnectorState {
        self.lock_guard().state
    }

    pub fn is_discovering(&self) -> bool {
        self.lock_guard().discovering
    }

    /// Devices found and not yet removed
    pub fn connected_devices(&self) -> Vec<DeviceHandle> {
        self.lock_tracked().clone()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Start the radio watcher unless it is already running
    pub fn start(&self) -> Result<()> {
        self.start_watching(true)
    }

    /// Stop the radio watcher if it is running
    pub fn stop(&self) -> Result<()> {
        let mut guard = self.lock_guard();
        self.stop_locked(&mut guard)
    }

    /// Pump radio and link-loss notifications until shutdown.
    ///
    /// Each advertisement is handled on its own task, so handlers race for
    /// the scan guard exactly as platform callbacks would.
    pub fn spawn(
        self: &Arc<Self>,
        radio_events: mpsc::UnboundedReceiver<RadioEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(radio_events))
    }

    pub async fn run(self: Arc<Self>, mut radio_events: mpsc::UnboundedReceiver<RadioEvent>) {
        let taken = self
            .link_loss_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut link_loss) = taken else {
            warn!("Connector event loop already running");
            return;
        };
        let mut cancel = self.shutdown.signal();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = radio_events.recv() => match event {
                    Some(RadioEvent::Advertisement(advertisement)) => {
                        let connector = Arc::clone(&self);
                        tokio::spawn(async move {
                            connector.handle_advertisement(advertisement).await;
                        });
                    }
                    Some(RadioEvent::Aborted(reason)) => self.handle_radio_failure(&reason),
                    None => {
                        self.handle_radio_failure("advertisement stream closed");
                        break;
                    }
                },
                Some(id) = link_loss.recv() => self.handle_link_lost(id),
            }
        }
        debug!("Connector event loop finished");
    }

    /// Entry point for one advertisement notification
    pub async fn handle_advertisement(&self, advertisement: AdvertisementEvent) {
        {
            let mut guard = self.lock_guard();
            if !guard.discovering {
                trace!(
                    "Not discovering, dropping advertisement from {:#X}",
                    advertisement.address
                );
                return;
            }
            if advertisement.service_uuids.is_empty() {
                trace!(
                    "Advertisement from {:#X} carries no services, ignored",
                    advertisement.address
                );
                return;
            }
            if let Err(e) = self.stop_locked(&mut guard) {
                warn!(
                    "Failed to stop radio watcher, dropping advertisement from {:#X}: {}",
                    advertisement.address, e
                );
                return;
            }
            guard.state = ConnectorState::Resolving;
        }

        let mut attempt = ResolutionAttempt::new(advertisement.address);
        let mut cancel = self.shutdown.signal();

        match self.resolve(&advertisement, &mut attempt, &mut cancel).await {
            Ok(handle) => self.publish_found(handle),
            Err(BleError::Cancelled) => {
                debug!(
                    "Resolution of {:#X} cancelled by shutdown",
                    advertisement.address
                );
                self.set_state(ConnectorState::Idle);
            }
            Err(e) => {
                warn!(
                    progress = ?attempt,
                    "Connect to {:#X} failed, try again ...: {}",
                    advertisement.address,
                    e
                );
                self.set_state(ConnectorState::Failed);
                self.resume_scanning();
            }
        }
    }

    /// Stop discovery, cancel any in-flight resolution and release every
    /// device. Terminal for this connector.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        {
            let mut guard = self.lock_guard();
            if let Err(e) = self.stop_locked(&mut guard) {
                warn!("Failed to stop radio watcher during shutdown: {}", e);
            }
            guard.pending_start = false;
            if guard.state != ConnectorState::Resolving {
                guard.state = ConnectorState::Idle;
            }
        }

        let handles: Vec<DeviceHandle> = self.lock_tracked().drain(..).collect();
        for handle in handles {
            handle.invalidate();
            let _ = self.events.send(DiscoveryEvent::DeviceRemoved(handle));
        }
        info!("BLE connector shut down");
    }

    fn start_watching(&self, explicit: bool) -> Result<()> {
        let mut guard = self.lock_guard();
        if guard.discovering {
            trace!("Already watching");
            return Ok(());
        }
        if self.shutdown.is_cancelled() {
            return if explicit {
                Err(BleError::Cancelled)
            } else {
                Ok(())
            };
        }
        if explicit {
            guard.radio_failed = false;
            if guard.state == ConnectorState::Resolving {
                debug!("Connection attempt in flight, scan resumes when it completes");
                guard.pending_start = true;
                return Ok(());
            }
        } else if guard.radio_failed {
            debug!("Radio watcher failed earlier, not resuming scan");
            if guard.state != ConnectorState::Connected {
                guard.state = ConnectorState::Idle;
            }
            return Ok(());
        }

        if let Err(e) = self.watcher.start() {
            error!("Failed to start radio watcher: {}", e);
            guard.radio_failed = true;
            if guard.state != ConnectorState::Connected {
                guard.state = ConnectorState::Idle;
            }
            drop(guard);
            let _ = self.events.send(DiscoveryEvent::Disconnected);
            return Err(e);
        }

        guard.discovering = true;
        guard.pending_start = false;
        guard.state = ConnectorState::Scanning;
        info!("Start watching ...");
        Ok(())
    }

    fn stop_locked(&self, guard: &mut ScanGuard) -> Result<()> {
        if !guard.discovering {
            return Ok(());
        }
        // The flag follows the watcher; a failed stop leaves both running
        self.watcher.stop()?;
        guard.discovering = false;
        if guard.state == ConnectorState::Scanning {
            guard.state = ConnectorState::Idle;
        }
        debug!("Stop watching");
        Ok(())
    }

    fn resume_scanning(&self) {
        // Failures are already reported as `Disconnected`
        let _ = self.start_watching(false);
    }

    fn publish_found(&self, handle: DeviceHandle) {
        // Checked under the lock `shutdown` drains, so a handle is either
        // tracked and later removed, or closed here
        let published = {
            let mut tracked = self.lock_tracked();
            if self.shutdown.is_cancelled() {
                false
            } else {
                tracked.push(handle.clone());
                info!(
                    "{} ({}) connected, capabilities: {:?}",
                    handle.name(),
                    handle.id(),
                    handle.capabilities()
                );
                let _ = self.events.send(DiscoveryEvent::DeviceFound(handle.clone()));
                true
            }
        };

        if !published {
            handle.invalidate();
            self.set_state(ConnectorState::Idle);
            return;
        }

        let resume = {
            let mut guard = self.lock_guard();
            if self.shutdown.is_cancelled() {
                guard.state = ConnectorState::Idle;
                false
            } else {
                guard.state = ConnectorState::Connected;
                std::mem::take(&mut guard.pending_start)
            }
        };
        if resume {
            self.resume_scanning();
        }
    }

    fn handle_link_lost(&self, id: DeviceId) {
        let removed = {
            let mut tracked = self.lock_tracked();
            tracked
                .iter()
                .position(|handle| handle.id() == id)
                .map(|index| tracked.remove(index))
        };
        let Some(handle) = removed else {
            debug!("Link loss reported for untracked device {}", id);
            return;
        };

        handle.invalidate();
        info!("{} ({}) disconnected", handle.name(), id);
        let _ = self.events.send(DiscoveryEvent::DeviceRemoved(handle));

        if self.lock_tracked().is_empty() {
            let mut guard = self.lock_guard();
            if guard.state == ConnectorState::Connected {
                guard.state = ConnectorState::Idle;
            }
        }
        self.resume_scanning();
    }

    fn handle_radio_failure(&self, reason: &str) {
        {
            let mut guard = self.lock_guard();
            guard.discovering = false;
            guard.radio_failed = true;
            if matches!(
                guard.state,
                ConnectorState::Scanning | ConnectorState::Failed
            ) {
                guard.state = ConnectorState::Idle;
            }
        }
        error!("Radio watcher stopped: {}", reason);
        let _ = self.events.send(DiscoveryEvent::Disconnected);
    }

    async fn resolve(
        &self,
        advertisement: &AdvertisementEvent,
        attempt: &mut ResolutionAttempt,
        cancel: &mut CancelSignal,
    ) -> Result<DeviceHandle> {
        let address = advertisement.address;
        debug!(
            "BLE received from {:#X}, services: {:?}, acquiring device ...",
            address, advertisement.service_uuids
        );

        let device = self
            .step("device acquisition", cancel, self.backend.acquire_device(address))
            .await?
            .ok_or(BleError::DeviceUnavailable { address })?;
        attempt.device_acquired = true;

        match self.negotiate(&device, attempt, cancel).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.backend.release(device);
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        device: &B::Device,
        attempt: &mut ResolutionAttempt,
        cancel: &mut CancelSignal,
    ) -> Result<DeviceHandle> {
        let name = self.backend.device_name(device);
        debug!("Found {} at {:#X}", name, attempt.address);

        if !self.config.settle_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BleError::Cancelled),
                _ = tokio::time::sleep(self.config.settle_delay) => {}
            }
        }

        let profile = &self.config.profile;
        let service = self
            .step(
                "service lookup",
                cancel,
                self.backend.primary_service(device, profile.service),
            )
            .await?
            .ok_or(BleError::ServiceNotFound {
                uuid: profile.service,
            })?;
        attempt.service_found = true;
        debug!("{} main service found", name);

        let write = self.characteristic(&service, profile.write, cancel).await?;
        attempt.write_found = true;
        let notify = self.characteristic(&service, profile.notify, cancel).await?;
        attempt.notify_found = true;
        let command = self.characteristic(&service, profile.command, cancel).await?;
        attempt.command_found = true;
        debug!("Characteristics found");

        let characteristics = ResolvedCharacteristics {
            write,
            notify,
            command,
        };
        let link = self
            .step(
                "link setup",
                cancel,
                self.backend
                    .open_link(device, characteristics, self.link_loss_tx.clone()),
            )
            .await?;

        match self.step("handshake", cancel, link.handshake()).await {
            Ok(true) => {}
            Ok(false) => {
                link.close();
                return Err(BleError::HandshakeRejected);
            }
            Err(e) => {
                link.close();
                return Err(e);
            }
        }
        attempt.handshake_complete = true;
        debug_assert!(attempt.is_complete());

        let capabilities = link.capabilities();
        let link: Arc<dyn DeviceLink> = Arc::new(link);
        Ok(DeviceHandle::new(
            DeviceId(attempt.address),
            name,
            capabilities,
            link,
        ))
    }

    async fn characteristic(
        &self,
        service: &B::Service,
        uuid: Uuid,
        cancel: &mut CancelSignal,
    ) -> Result<B::Characteristic> {
        self.step(
            "characteristic lookup",
            cancel,
            self.backend.characteristic(service, uuid),
        )
        .await?
        .ok_or(BleError::CharacteristicNotFound { uuid })
    }

    /// Run one suspension point under the step timeout and the shutdown signal
    async fn step<T, F>(&self, step: &'static str, cancel: &mut CancelSignal, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(BleError::Cancelled);
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(BleError::Cancelled),
            outcome = tokio::time::timeout(self.config.step_timeout, operation) => {
                outcome.unwrap_or_else(|_| Err(BleError::Timeout { step }))
            }
        }
    }

    fn set_state(&self, state: ConnectorState) {
        self.lock_guard().state = state;
    }

    fn lock_guard(&self) -> MutexGuard<'_, ScanGuard> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tracked(&self) -> MutexGuard<'_, Vec<DeviceHandle>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W, B> DiscoveryController for BleConnector<W, B>
where
    W: RadioWatcher + 'static,
    B: NegotiationBackend,
{
    fn scan_for_devices(&self) -> Result<()> {
        self.start()
    }

    fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }
}
