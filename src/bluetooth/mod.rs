pub mod gatt;
pub mod scanner;

use std::time::Duration;

use anyhow::{Context, Result};
use bluer::Address;
use tracing::{info, warn};

use crate::config::AppConfig;
use gatt::GattTransport;

const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve the subwoofer address: configured address first, then by name.
pub async fn locate(config: &AppConfig) -> Result<Address> {
    if let Some(addr_str) = &config.device_address {
        return addr_str
            .parse::<Address>()
            .with_context(|| format!("invalid device_address {:?}", addr_str));
    }

    match scanner::find_device(&config.device_name, SCAN_TIMEOUT).await? {
        Some(dev) => Ok(dev.address),
        None => anyhow::bail!("no device named {:?} found", config.device_name),
    }
}

/// Connect with exponential backoff (2s doubling up to 30s) until `attempts` run out.
pub async fn connect_with_retry(config: &AppConfig, attempts: u32) -> Result<GattTransport> {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);
    let mut attempt = 1;

    loop {
        let result = match locate(config).await {
            Ok(address) => GattTransport::connect(address).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(transport) => return Ok(transport),
            Err(e) if attempt >= attempts => {
                return Err(e).context(format!("giving up after {} attempts", attempts));
            }
            Err(e) => {
                warn!("Connection attempt {} failed: {:#}", attempt, e);
            }
        }

        info!("Retrying in {:?}...", backoff);
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
        attempt += 1;
    }
}
