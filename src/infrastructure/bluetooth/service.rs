//! Bluetooth Service Module
//!
//! Wires a radio watcher and a negotiation backend into a running
//! [`BleConnector`] and keeps a [`CommandRouter`] in sync with its events.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::discovery::DiscoveryController;
use crate::domain::error::Result;
use crate::domain::models::{DiscoveryEvent, RadioEvent};
use crate::domain::router::CommandRouter;
use crate::infrastructure::bluetooth::backend::{NegotiationBackend, RadioWatcher};
use crate::infrastructure::bluetooth::connector::{BleConnector, ConnectorConfig};

/// Main service coordinating discovery and command routing
pub struct BluetoothService<W, B: NegotiationBackend> {
    connector: Arc<BleConnector<W, B>>,
    router: Arc<Mutex<CommandRouter>>,
    pump: JoinHandle<()>,
    router_task: JoinHandle<()>,
}

impl<W, B> BluetoothService<W, B>
where
    W: RadioWatcher + 'static,
    B: NegotiationBackend,
{
    /// `radio_events` must be the channel `watcher` reports to
    pub fn from_parts(
        watcher: W,
        backend: B,
        radio_events: mpsc::UnboundedReceiver<RadioEvent>,
        config: ConnectorConfig,
        auto_select: bool,
    ) -> Self {
        let connector = Arc::new(BleConnector::new(watcher, backend, config));
        let router = Arc::new(Mutex::new(CommandRouter::new(auto_select)));

        let router_task = tokio::spawn(route_events(
            connector.subscribe(),
            Arc::clone(&router),
        ));
        let pump = connector.spawn(radio_events);

        Self {
            connector,
            router,
            pump,
            router_task,
        }
    }

    pub fn start_scan(&self) -> Result<()> {
        self.connector.scan_for_devices()
    }

    pub fn stop_scan(&self) -> Result<()> {
        self.connector.stop()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.connector.subscribe()
    }

    pub fn connector(&self) -> &Arc<BleConnector<W, B>> {
        &self.connector
    }

    pub fn router(&self) -> Arc<Mutex<CommandRouter>> {
        Arc::clone(&self.router)
    }

    /// Stop discovery, release every device and wait for the event loop
    pub async fn shutdown(self) {
        self.connector.shutdown();
        if let Err(e) = self.pump.await {
            warn!("Connector event loop ended abnormally: {}", e);
        }
        self.router_task.abort();
        info!("Bluetooth service stopped");
    }
}

/// Mirror discovery events into the router until the connector goes away
async fn route_events(
    mut events: broadcast::Receiver<DiscoveryEvent>,
    router: Arc<Mutex<CommandRouter>>,
) {
    loop {
        match events.recv().await {
            Ok(event) => router.lock().await.apply(&event),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Command router lagged behind {} discovery events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(windows)]
impl
    BluetoothService<
        crate::infrastructure::bluetooth::scanner::WinRtWatcher,
        crate::infrastructure::bluetooth::connection::WinRtBackend,
    >
{
    /// Build the WinRT watcher and backend from settings
    pub fn new(settings: &crate::domain::settings::Settings) -> anyhow::Result<Self> {
        use crate::infrastructure::bluetooth::connection::WinRtBackend;
        use crate::infrastructure::bluetooth::scanner::WinRtWatcher;

        let config = ConnectorConfig::from_settings(settings)?;
        let (radio_tx, radio_rx) = mpsc::unbounded_channel();
        let watcher = WinRtWatcher::new(radio_tx)?;

        Ok(Self::from_parts(
            watcher,
            WinRtBackend::new(),
            radio_rx,
            config,
            settings.auto_select_devices,
        ))
    }
}
