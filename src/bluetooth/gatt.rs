use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::gatt::WriteOp;
use bluer::{Address, Device, Session, Uuid};
use tracing::{debug, info, warn};

use crate::device::{Transport, TransportError};

/// Primary service exposing the SVS control characteristic.
pub const SVS_SERVICE_UUID: Uuid = Uuid::from_u128(0x1fee6acf_a826_4e37_9635_4d8a01642c5d);

/// Characteristic that accepts command frames.
pub const SVS_CHAR_UUID: Uuid = Uuid::from_u128(0x6409d79d_cd28_479c_a639_92f9e1948b43);

/// How long to wait for BlueZ to finish service discovery after connecting.
const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// GATT connection to the subwoofer's command characteristic.
pub struct GattTransport {
    device: Device,
    characteristic: Characteristic,
}

impl GattTransport {
    /// Connect to the device and locate the command characteristic.
    pub async fn connect(address: Address) -> Result<Self> {
        info!("Connecting to {} over GATT", address);

        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        let device = adapter.device(address)?;

        let characteristic = open_characteristic(&device).await?;
        info!("Connected to {}", address);
        Ok(Self {
            device,
            characteristic,
        })
    }

    pub fn address(&self) -> Address {
        self.device.address()
    }

    async fn write_once(&self, bytes: &[u8]) -> bluer::Result<()> {
        let mut req = CharacteristicWriteRequest::default();
        req.op_type = WriteOp::Request;
        self.characteristic.write_ext(bytes, &req).await
    }
}

async fn open_characteristic(device: &Device) -> Result<Characteristic> {
    if !device.is_connected().await? {
        device.connect().await.context("GATT connect")?;
    }

    let deadline = tokio::time::Instant::now() + SERVICES_RESOLVE_TIMEOUT;
    while !device.is_services_resolved().await? {
        if tokio::time::Instant::now() >= deadline {
            bail!("GATT services of {} not resolved in time", device.address());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    for service in device.services().await? {
        if service.uuid().await? != SVS_SERVICE_UUID {
            continue;
        }
        for characteristic in service.characteristics().await? {
            if characteristic.uuid().await? == SVS_CHAR_UUID {
                debug!("Found command characteristic on {}", device.address());
                return Ok(characteristic);
            }
        }
    }
    bail!("SVS command characteristic not found on {}", device.address())
}

#[async_trait]
impl Transport for GattTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let err = match self.write_once(bytes).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        // A dropped link invalidates the characteristic handle; reopen once and retry.
        if self.device.is_connected().await.unwrap_or(false) {
            return Err(TransportError::Write(err.to_string()));
        }
        warn!("Link to {} lost ({}), reconnecting", self.device.address(), err);
        self.characteristic = open_characteristic(&self.device)
            .await
            .map_err(|_| TransportError::NotConnected)?;
        self.write_once(bytes)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }
}
