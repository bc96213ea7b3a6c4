use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dispatcher::{DispatchError, Dispatcher};
use crate::protocol::{Frame, FrameError, Parameter};

/// Quiet period before a burst of changes to one parameter is sent.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// The two analog settings of the subwoofer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Controls {
    pub volume: f64,
    pub phase: f64,
}

impl Controls {
    /// Factory setting used for the HOME preset on first run.
    pub const DEFAULT: Controls = Controls {
        volume: -29.0,
        phase: 77.0,
    };

    pub fn get(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Volume => self.volume,
            Parameter::Phase => self.phase,
        }
    }

    /// Both values forced into the device ranges.
    pub fn clamped(&self) -> Self {
        Self {
            volume: Parameter::Volume.clamp_value(self.volume),
            phase: Parameter::Phase.clamp_value(self.phase),
        }
    }

    /// Parameters whose value differs from `previous` (all of them if there is none).
    pub fn changes_from(&self, previous: Option<&Controls>) -> Vec<(Parameter, f64)> {
        Parameter::all()
            .iter()
            .filter(|&&p| previous.map_or(true, |prev| prev.get(p) != self.get(p)))
            .map(|&p| (p, self.get(p)))
            .collect()
    }
}

impl Default for Controls {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for Controls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "volume {} dB, phase {}°", self.volume, self.phase)
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// UI-facing control surface: clamps values, encodes them and submits the frames.
#[derive(Clone)]
pub struct Subwoofer {
    dispatcher: Dispatcher,
}

impl Subwoofer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn set(&self, parameter: Parameter, value: f64) -> Result<(), ControlError> {
        let value = parameter.clamp_value(value);
        let frame = Frame::encode(parameter, value)?;
        self.dispatcher.submit(frame).await?;
        info!("{} updated to {}", parameter, value);
        Ok(())
    }

    pub async fn set_volume(&self, value: f64) -> Result<(), ControlError> {
        self.set(Parameter::Volume, value).await
    }

    pub async fn set_phase(&self, value: f64) -> Result<(), ControlError> {
        self.set(Parameter::Phase, value).await
    }

    /// Write both settings, volume first. Both writes are attempted even if the first fails.
    pub async fn apply(&self, controls: &Controls) -> Result<(), ControlError> {
        let volume = self.set_volume(controls.volume).await;
        let phase = self.set_phase(controls.phase).await;
        volume.and(phase)
    }
}

/// Coalesces rapid changes (slider drags, track skipping) so only the
/// settled value per parameter reaches the dispatcher.
#[derive(Clone)]
pub struct Coalescer {
    tx: mpsc::UnboundedSender<(Parameter, f64)>,
}

impl Coalescer {
    /// Start the coalescing task. The receiver yields each parameter whose
    /// write failed.
    pub fn spawn(
        subwoofer: Subwoofer,
        quiet: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Parameter>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(coalesce_loop(subwoofer, rx, failed_tx, quiet));
        (Self { tx }, failed_rx, task)
    }

    /// Record a new target value. Returns false if the coalescer has stopped.
    pub fn push(&self, parameter: Parameter, value: f64) -> bool {
        self.tx.send((parameter, value)).is_ok()
    }

    pub fn push_controls(&self, changes: &[(Parameter, f64)]) -> bool {
        changes.iter().all(|&(p, v)| self.push(p, v))
    }
}

async fn coalesce_loop(
    subwoofer: Subwoofer,
    mut rx: mpsc::UnboundedReceiver<(Parameter, f64)>,
    failed: mpsc::UnboundedSender<Parameter>,
    quiet: Duration,
) {
    let mut pending: BTreeMap<Parameter, f64> = BTreeMap::new();

    loop {
        if pending.is_empty() {
            match rx.recv().await {
                Some((p, v)) => {
                    pending.insert(p, v);
                }
                None => break,
            }
            continue;
        }

        tokio::select! {
            msg = rx.recv() => match msg {
                Some((p, v)) => {
                    debug!("Coalescing {} = {}", p, v);
                    pending.insert(p, v);
                }
                None => {
                    flush(&subwoofer, &mut pending, &failed).await;
                    break;
                }
            },
            _ = tokio::time::sleep(quiet) => {
                flush(&subwoofer, &mut pending, &failed).await;
            }
        }
    }
    debug!("Coalescer stopped");
}

async fn flush(
    subwoofer: &Subwoofer,
    pending: &mut BTreeMap<Parameter, f64>,
    failed: &mpsc::UnboundedSender<Parameter>,
) {
    for (parameter, value) in std::mem::take(pending) {
        if let Err(e) = subwoofer.set(parameter, value).await {
            warn!("Failed to set {}: {}", parameter, e);
            // Nobody listening is fine.
            let _ = failed.send(parameter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dispatcher::DEFAULT_SETTLE_DELAY;
    use crate::device::transport::testing::RecordingTransport;

    fn sent(bytes: &[u8]) -> (Parameter, f64) {
        let write = Frame::decode(bytes).unwrap();
        (write.parameter().unwrap(), write.value())
    }

    #[test]
    fn test_changes_from() {
        let current = Controls {
            volume: -20.0,
            phase: 77.0,
        };
        assert_eq!(current.changes_from(None).len(), 2);
        assert_eq!(
            current.changes_from(Some(&Controls::DEFAULT)),
            vec![(Parameter::Volume, -20.0)]
        );
        assert!(current.changes_from(Some(&current)).is_empty());
    }

    #[test]
    fn test_clamped() {
        let wild = Controls {
            volume: 12.0,
            phase: -400.0,
        };
        assert_eq!(
            wild.clamped(),
            Controls {
                volume: 0.0,
                phase: -180.0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_clamps_before_encoding() {
        let transport = RecordingTransport::new(Duration::from_millis(5));
        let log = transport.log();
        let (dispatcher, _worker) = Dispatcher::spawn(transport, DEFAULT_SETTLE_DELAY);
        let sub = Subwoofer::new(dispatcher);

        sub.set_volume(-90.0).await.unwrap();
        sub.set_phase(270.0).await.unwrap();

        let log = log.lock().await;
        assert_eq!(sent(&log[0].bytes), (Parameter::Volume, -60.0));
        assert_eq!(sent(&log[1].bytes), (Parameter::Phase, 180.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_attempts_both_writes() {
        let transport = RecordingTransport::new(Duration::from_millis(5)).failing_on(0);
        let log = transport.log();
        let (dispatcher, _worker) = Dispatcher::spawn(transport, DEFAULT_SETTLE_DELAY);
        let sub = Subwoofer::new(dispatcher);

        let result = sub.apply(&Controls::DEFAULT).await;
        assert!(matches!(result, Err(ControlError::Dispatch(_))));
        assert_eq!(log.lock().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalescer_sends_only_settled_value() {
        let transport = RecordingTransport::new(Duration::from_millis(5));
        let log = transport.log();
        let (dispatcher, _worker) = Dispatcher::spawn(transport, DEFAULT_SETTLE_DELAY);
        let (coalescer, _failures, _task) = Coalescer::spawn(Subwoofer::new(dispatcher), DEFAULT_DEBOUNCE);

        for v in [-10.0, -11.0, -12.0, -13.0] {
            assert!(coalescer.push(Parameter::Volume, v));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(coalescer.push(Parameter::Phase, 45.0));
        assert!(log.lock().await.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;

        let log = log.lock().await;
        let values: Vec<_> = log.iter().map(|r| sent(&r.bytes)).collect();
        assert_eq!(
            values,
            vec![(Parameter::Volume, -13.0), (Parameter::Phase, 45.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalescer_flushes_on_close() {
        let transport = RecordingTransport::new(Duration::from_millis(5));
        let log = transport.log();
        let (dispatcher, _worker) = Dispatcher::spawn(transport, DEFAULT_SETTLE_DELAY);
        let (coalescer, _failures, task) = Coalescer::spawn(Subwoofer::new(dispatcher), DEFAULT_DEBOUNCE);

        coalescer.push(Parameter::Phase, -30.0);
        drop(coalescer);
        task.await.unwrap();

        let log = log.lock().await;
        assert_eq!(log.len(), 1);
        assert_eq!(sent(&log[0].bytes), (Parameter::Phase, -30.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalescer_reports_failed_writes() {
        let transport = RecordingTransport::new(Duration::from_millis(5)).failing_on(0);
        let (dispatcher, _worker) = Dispatcher::spawn(transport, DEFAULT_SETTLE_DELAY);
        let (coalescer, mut failures, task) =
            Coalescer::spawn(Subwoofer::new(dispatcher), DEFAULT_DEBOUNCE);

        coalescer.push_controls(&[(Parameter::Volume, -20.0), (Parameter::Phase, 0.0)]);
        drop(coalescer);
        task.await.unwrap();

        assert_eq!(failures.recv().await, Some(Parameter::Volume));
        assert_eq!(failures.recv().await, None);
    }
}
