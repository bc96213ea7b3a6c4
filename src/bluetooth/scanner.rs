use std::time::Duration;

use anyhow::Result;
use bluer::{Address, Session};
use tracing::{debug, info};

/// Advertised name of the SVS 3000 Micro and siblings.
pub const SVS_DEVICE_NAME: &str = "3KMC3144";

/// A Bluetooth device known to the adapter.
#[derive(Debug, Clone)]
pub struct BluetoothDevice {
    pub name: String,
    pub address: Address,
    pub connected: bool,
}

/// List known devices whose name matches `name`.
pub async fn list_devices(name: &str) -> Result<Vec<BluetoothDevice>> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let mut result = Vec::new();
    for addr in adapter.device_addresses().await? {
        let device = adapter.device(addr)?;
        let device_name = device.name().await?.unwrap_or_default();
        if device_name != name {
            continue;
        }
        let connected = device.is_connected().await?;
        debug!("Found device: {} ({}), connected={}", device_name, addr, connected);
        result.push(BluetoothDevice {
            name: device_name,
            address: addr,
            connected,
        });
    }
    Ok(result)
}

/// Find a device named `name`, running discovery for up to `timeout` if the
/// adapter does not know one yet.
pub async fn find_device(name: &str, timeout: Duration) -> Result<Option<BluetoothDevice>> {
    if let Some(dev) = list_devices(name).await?.into_iter().next() {
        return Ok(Some(dev));
    }

    info!("Scanning for {}...", name);
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    // Discovery runs while the event stream is alive.
    let _discovery = adapter.discover_devices().await?;

    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if let Some(dev) = list_devices(name).await?.into_iter().next() {
            info!(
                "Discovered {} ({}), connected={}",
                dev.name, dev.address, dev.connected
            );
            return Ok(Some(dev));
        }
    }
    Ok(None)
}
