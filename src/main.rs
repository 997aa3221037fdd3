use launch_connector::domain::settings::SettingsService;
use launch_connector::infrastructure::logging::init_logger;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let _log_guard = init_logger(&settings_service.get().log_settings)?;
    info!(
        "Starting Launch connector (settings: {})",
        settings_service.path().display()
    );

    run(&settings_service).await
}

#[cfg(windows)]
async fn run(settings_service: &SettingsService) -> anyhow::Result<()> {
    use launch_connector::domain::models::DiscoveryEvent;
    use launch_connector::infrastructure::bluetooth::BluetoothService;
    use tokio::sync::broadcast::error::RecvError;
    use tracing::warn;

    let service = BluetoothService::new(settings_service.get())?;
    let mut events = service.subscribe();
    service.start_scan()?;
    info!("Scanning for a Launch, press Ctrl-C to quit");

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Ctrl-C received");
                break;
            }
            event = events.recv() => match event {
                Ok(DiscoveryEvent::DeviceFound(handle)) => {
                    info!("Ready: {} ({}) {:?}", handle.name(), handle.id(), handle.capabilities());
                }
                Ok(DiscoveryEvent::DeviceRemoved(handle)) => {
                    info!("Lost: {} ({}), scanning again", handle.name(), handle.id());
                }
                Ok(DiscoveryEvent::Disconnected) => {
                    warn!("Bluetooth radio unavailable, scanning stopped");
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} discovery events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    service.shutdown().await;
    Ok(())
}

#[cfg(not(windows))]
async fn run(_settings_service: &SettingsService) -> anyhow::Result<()> {
    anyhow::bail!("No Bluetooth LE radio backend is available on this platform")
}
