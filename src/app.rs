use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bluetooth;
use crate::bluetooth::gatt::GattTransport;
use crate::config::AppConfig;
use crate::device::{Coalescer, Controls, Dispatcher, Subwoofer};
use crate::instance_lock::InstanceLock;
use crate::now_playing::{self, Source};
use crate::preset::{FileStore, KvStore, MediaIdentity, PresetLibrary, Resolution};
use crate::protocol::Parameter;

const CONNECT_ATTEMPTS: u32 = 5;

/// Open the preset library at the configured location.
pub fn open_library(config: &AppConfig) -> Result<PresetLibrary<FileStore>> {
    let path = config.store_path();
    let store = FileStore::open(&path)
        .with_context(|| format!("cannot open preset store {}", path.display()))?;
    Ok(PresetLibrary::open(store)?)
}

/// Connect to the subwoofer and start its dispatcher.
pub async fn connect(config: &AppConfig) -> Result<(Subwoofer, JoinHandle<GattTransport>)> {
    let transport = bluetooth::connect_with_retry(config, CONNECT_ATTEMPTS).await?;
    let (dispatcher, worker) = Dispatcher::spawn(transport, config.settle_delay());
    Ok((Subwoofer::new(dispatcher), worker))
}

/// Tracks what was last sent to the device so each now-playing change only
/// writes the parameters that actually differ.
#[derive(Debug, Default)]
pub struct PresetFollower {
    applied: Option<Controls>,
}

impl PresetFollower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the preset for `identity` and return the writes it needs.
    pub fn follow<S: KvStore>(
        &mut self,
        library: &PresetLibrary<S>,
        identity: &MediaIdentity,
    ) -> (Resolution, Vec<(Parameter, f64)>) {
        let identity = (!identity.is_empty()).then_some(identity);
        let resolution = library.resolve_active(identity);
        let controls = resolution.active.record.controls.clamped();

        let changes = controls.changes_from(self.applied.as_ref());
        self.applied = Some(controls);
        (resolution, changes)
    }

    /// Drop what is believed to be on the device after a failed write, so the
    /// next resolution sends every parameter again.
    pub fn forget(&mut self) {
        self.applied = None;
    }
}

/// Follow now-playing updates and keep the subwoofer on the active preset
/// until the watcher stops or Ctrl-C.
pub async fn run_watch(config: AppConfig, source: Source) -> Result<()> {
    let _lock = InstanceLock::acquire()?;
    let library = open_library(&config)?;

    let (subwoofer, worker) = connect(&config).await?;
    let (coalescer, mut failures, coalesce_task) =
        Coalescer::spawn(subwoofer, config.debounce());
    let (mut updates, watcher) = now_playing::spawn_watcher(source)?;

    let mut follower = PresetFollower::new();

    // Nothing known yet: start from whatever the fallback resolves to.
    let (resolution, changes) = follower.follow(&library, &MediaIdentity::new());
    info!("Starting on {} preset: {}", resolution.active.kind, resolution.active.record.controls);
    coalescer.push_controls(&changes);

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(identity) = update else {
                    info!("Now-playing source ended");
                    break;
                };
                let (resolution, changes) = follower.follow(&library, &identity);
                info!(
                    "{} -> {} preset {:?} ({})",
                    identity,
                    resolution.active.kind,
                    resolution.active.record.title,
                    resolution.active.record.controls,
                );
                if !changes.is_empty() && !coalescer.push_controls(&changes) {
                    warn!("Control queue stopped, exiting");
                    break;
                }
            }
            Some(parameter) = failures.recv() => {
                warn!("Could not apply {}, will resend on the next change", parameter);
                follower.forget();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    // Let pending writes drain before releasing the device.
    drop(coalescer);
    let _ = coalesce_task.await;
    watcher.abort();
    if let Ok(transport) = worker.await {
        info!("Released {}", transport.address());
    }
    Ok(())
}
