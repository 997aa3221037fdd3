//! Scriptable in-process watcher and backend for tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::{BleError, Result};
use crate::domain::models::{Capability, DeviceCommand, DeviceId, DeviceLink};
use crate::infrastructure::bluetooth::backend::{
    GattProfile, LinkLossSender, NegotiationBackend, RadioWatcher, ResolvedCharacteristics,
};

#[derive(Debug, Default)]
struct WatcherLog {
    starts: AtomicUsize,
    stops: AtomicUsize,
    running: AtomicBool,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct MockWatcher {
    log: Arc<WatcherLog>,
}

impl MockWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.log.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.log.stops.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.log.running.load(Ordering::SeqCst)
    }

    pub fn fail_start(&self, fail: bool) {
        self.log.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.log.fail_stop.store(fail, Ordering::SeqCst);
    }
}

impl RadioWatcher for MockWatcher {
    fn start(&self) -> Result<()> {
        if self.log.fail_start.load(Ordering::SeqCst) {
            return Err(BleError::Radio("adapter unavailable".to_string()));
        }
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        self.log.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if self.log.fail_stop.load(Ordering::SeqCst) {
            return Err(BleError::Radio("stop rejected".to_string()));
        }
        self.log.stops.fetch_add(1, Ordering::SeqCst);
        self.log.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Resolution step a script can break
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Acquire,
    Service,
    Write,
    Notify,
    Command,
    Open,
    Handshake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Peer answered without the item (`Ok(None)`, or a refused handshake)
    Missing,
    /// The exchange errored
    Error,
    /// The step never completes
    Hang,
}

/// Behaviour of one connection attempt
#[derive(Debug, Clone)]
pub struct DeviceScript {
    pub name: String,
    pub fault: Option<(Step, Fault)>,
    pub capabilities: BTreeSet<Capability>,
}

impl DeviceScript {
    pub fn healthy() -> Self {
        Self {
            name: "Launch".to_string(),
            fault: None,
            capabilities: [Capability::Linear, Capability::FleshlightLaunch]
                .into_iter()
                .collect(),
        }
    }

    pub fn failing(step: Step, fault: Fault) -> Self {
        Self {
            fault: Some((step, fault)),
            ..Self::healthy()
        }
    }

    fn fault_at(&self, step: Step) -> Option<Fault> {
        match self.fault {
            Some((s, fault)) if s == step => Some(fault),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    address: u64,
    script: Arc<DeviceScript>,
}

#[derive(Debug)]
pub struct MockService {
    script: Arc<DeviceScript>,
}

#[derive(Debug)]
pub struct MockCharacteristic {
    pub uuid: Uuid,
}

#[derive(Default)]
struct BackendState {
    profile: GattProfile,
    step_delay: Duration,
    scripts: Mutex<HashMap<u64, VecDeque<DeviceScript>>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    acquisitions: AtomicUsize,
    released: Mutex<Vec<u64>>,
    links: Mutex<Vec<Arc<MockLink>>>,
}

/// Decrements the active-operation count when dropped
struct Busy<'a>(&'a AtomicUsize);

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<BackendState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every backend operation sleeps this long, widening race windows
    pub fn with_step_delay(delay: Duration) -> Self {
        Self {
            state: Arc::new(BackendState {
                step_delay: delay,
                ..BackendState::default()
            }),
        }
    }

    /// Queue scripts for successive attempts on `address`; once drained the
    /// device behaves as [`DeviceScript::healthy`]
    pub fn script(&self, address: u64, scripts: impl IntoIterator<Item = DeviceScript>) {
        self.state
            .scripts
            .lock()
            .unwrap()
            .entry(address)
            .or_default()
            .extend(scripts);
    }

    pub fn acquisitions(&self) -> usize {
        self.state.acquisitions.load(Ordering::SeqCst)
    }

    /// Highest number of backend operations observed running at once
    pub fn max_concurrent(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<u64> {
        self.state.released.lock().unwrap().clone()
    }

    pub fn links(&self) -> Vec<Arc<MockLink>> {
        self.state.links.lock().unwrap().clone()
    }

    /// Simulate the live peer at `address` going out of range
    pub fn drop_link(&self, address: u64) {
        for link in self.links() {
            if link.id == DeviceId(address) && link.is_connected() {
                link.drop_connection();
            }
        }
    }

    async fn enter(&self) -> Busy<'_> {
        let now = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(now, Ordering::SeqCst);
        let busy = Busy(&self.state.active);
        if !self.state.step_delay.is_zero() {
            tokio::time::sleep(self.state.step_delay).await;
        }
        busy
    }

    async fn apply<T>(&self, fault: Option<Fault>, found: T) -> Result<Option<T>> {
        match fault {
            None => Ok(Some(found)),
            Some(Fault::Missing) => Ok(None),
            Some(Fault::Error) => Err(BleError::Backend("GATT exchange failed".to_string())),
            Some(Fault::Hang) => std::future::pending().await,
        }
    }
}

#[async_trait]
impl NegotiationBackend for MockBackend {
    type Device = MockDevice;
    type Service = MockService;
    type Characteristic = MockCharacteristic;
    type Link = MockLinkRef;

    async fn acquire_device(&self, address: u64) -> Result<Option<MockDevice>> {
        let _busy = self.enter().await;
        self.state.acquisitions.fetch_add(1, Ordering::SeqCst);
        let script = self
            .state
            .scripts
            .lock()
            .unwrap()
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(DeviceScript::healthy);
        let script = Arc::new(script);
        let device = MockDevice {
            address,
            script: script.clone(),
        };
        self.apply(script.fault_at(Step::Acquire), device).await
    }

    fn device_name(&self, device: &MockDevice) -> String {
        device.script.name.clone()
    }

    async fn primary_service(&self, device: &MockDevice, uuid: Uuid) -> Result<Option<MockService>> {
        let _busy = self.enter().await;
        assert_eq!(uuid, self.state.profile.service);
        let service = MockService {
            script: device.script.clone(),
        };
        self.apply(device.script.fault_at(Step::Service), service).await
    }

    async fn characteristic(
        &self,
        service: &MockService,
        uuid: Uuid,
    ) -> Result<Option<MockCharacteristic>> {
        let _busy = self.enter().await;
        let profile = &self.state.profile;
        let step = if uuid == profile.write {
            Step::Write
        } else if uuid == profile.notify {
            Step::Notify
        } else if uuid == profile.command {
            Step::Command
        } else {
            return Ok(None);
        };
        self.apply(service.script.fault_at(step), MockCharacteristic { uuid })
            .await
    }

    async fn open_link(
        &self,
        device: &MockDevice,
        characteristics: ResolvedCharacteristics<MockCharacteristic>,
        link_loss: LinkLossSender,
    ) -> Result<MockLinkRef> {
        let _busy = self.enter().await;
        assert_eq!(characteristics.write.uuid, self.state.profile.write);
        assert_eq!(characteristics.notify.uuid, self.state.profile.notify);
        assert_eq!(characteristics.command.uuid, self.state.profile.command);
        if self
            .apply(device.script.fault_at(Step::Open), ())
            .await?
            .is_none()
        {
            return Err(BleError::Backend("link setup refused".to_string()));
        }

        let link = Arc::new(MockLink {
            id: DeviceId(device.address),
            capabilities: device.script.capabilities.clone(),
            handshake: device.script.fault_at(Step::Handshake),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            link_loss: Some(link_loss),
        });
        self.state.links.lock().unwrap().push(link.clone());
        Ok(MockLinkRef(link))
    }

    fn release(&self, device: MockDevice) {
        self.state.released.lock().unwrap().push(device.address);
    }
}

/// Recording device driver
#[derive(Debug)]
pub struct MockLink {
    id: DeviceId,
    capabilities: BTreeSet<Capability>,
    handshake: Option<Fault>,
    connected: AtomicBool,
    closed: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<DeviceCommand>>,
    link_loss: Option<LinkLossSender>,
}

impl MockLink {
    /// A connected link not owned by any backend
    pub fn standalone(capabilities: impl IntoIterator<Item = Capability>) -> Arc<Self> {
        Arc::new(Self {
            id: DeviceId(0),
            capabilities: capabilities.into_iter().collect(),
            handshake: None,
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            link_loss: None,
        })
    }

    pub fn sent(&self) -> Vec<DeviceCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(tx) = &self.link_loss {
            let _ = tx.send(self.id);
        }
    }
}

#[async_trait]
impl DeviceLink for MockLink {
    fn capabilities(&self) -> BTreeSet<Capability> {
        self.capabilities.clone()
    }

    async fn handshake(&self) -> Result<bool> {
        match self.handshake {
            None => Ok(true),
            Some(Fault::Missing) => Ok(false),
            Some(Fault::Error) => Err(BleError::WriteFailed("init command".to_string())),
            Some(Fault::Hang) => std::future::pending().await,
        }
    }

    async fn send(&self, command: &DeviceCommand) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BleError::WriteFailed("write characteristic".to_string()));
        }
        self.sent.lock().unwrap().push(command.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.is_closed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Link type handed out by [`MockBackend`]; shares state with [`MockBackend::links`].
/// Closes on drop like the platform link.
pub struct MockLinkRef(Arc<MockLink>);

impl Drop for MockLinkRef {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[async_trait]
impl DeviceLink for MockLinkRef {
    fn capabilities(&self) -> BTreeSet<Capability> {
        self.0.capabilities()
    }

    async fn handshake(&self) -> Result<bool> {
        self.0.handshake().await
    }

    async fn send(&self, command: &DeviceCommand) -> Result<()> {
        self.0.send(command).await
    }

    fn is_connected(&self) -> bool {
        self.0.is_connected()
    }

    fn close(&self) {
        self.0.close()
    }
}
