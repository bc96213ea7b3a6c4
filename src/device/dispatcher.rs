use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::transport::{Transport, TransportError};
use crate::protocol::Frame;

/// Time the subwoofer needs to commit a write to flash before it accepts the next one.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("dispatcher stopped before the frame was sent")]
    Closed,
}

type Outcome = Result<(), DispatchError>;

/// A queued frame plus the channel its outcome is reported on.
struct WriteRequest {
    frame: Frame,
    reply: oneshot::Sender<Outcome>,
}

/// Handle to a frame that has been queued but not necessarily sent.
pub struct PendingWrite {
    rx: oneshot::Receiver<Outcome>,
}

impl PendingWrite {
    /// Wait for the frame to be written and the settle delay to elapse.
    pub async fn wait(self) -> Outcome {
        self.rx.await.unwrap_or(Err(DispatchError::Closed))
    }
}

/// Serializes frame writes to the device: strict FIFO, one write in flight,
/// and a settle delay after every write.
///
/// The worker task owns the transport. Cloned handles all feed the same queue.
/// The worker stops (and hands the transport back) once every handle is dropped.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl Dispatcher {
    pub fn spawn<T>(transport: T, settle: Duration) -> (Self, JoinHandle<T>)
    where
        T: Transport + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(write_loop(transport, rx, settle));
        (Self { tx }, worker)
    }

    /// Queue a frame. Queue position is fixed when this returns, so two
    /// `enqueue` calls are sent in call order regardless of who awaits first.
    pub fn enqueue(&self, frame: Frame) -> PendingWrite {
        let (reply, rx) = oneshot::channel();
        // On a closed queue the request is dropped with its reply sender,
        // so `wait` resolves to `Closed`.
        let _ = self.tx.send(WriteRequest { frame, reply });
        PendingWrite { rx }
    }

    /// Queue a frame and wait for its outcome.
    pub async fn submit(&self, frame: Frame) -> Outcome {
        self.enqueue(frame).wait().await
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn write_loop<T: Transport>(
    mut transport: T,
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
    settle: Duration,
) -> T {
    while let Some(WriteRequest { frame, reply }) = rx.recv().await {
        debug!("TX: {} ({} bytes)", frame, frame.len());
        let outcome = transport
            .write(frame.as_bytes())
            .await
            .map_err(DispatchError::from);
        if let Err(e) = &outcome {
            warn!("Frame write failed: {}", e);
        }

        // The device may have latched part of a failed write, so it settles either way.
        tokio::time::sleep(settle).await;

        if reply.send(outcome).is_err() {
            debug!("Submitter went away before the outcome was ready");
        }
    }
    info!("Command queue closed, stopping dispatcher");
    transport
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::testing::RecordingTransport;
    use crate::protocol::Parameter;

    fn volume(v: f64) -> Frame {
        Frame::encode(Parameter::Volume, v).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_with_settle_delay() {
        let transport = RecordingTransport::new(Duration::from_millis(30));
        let log = transport.log();
        let (dispatcher, _worker) = Dispatcher::spawn(transport, DEFAULT_SETTLE_DELAY);

        let first = dispatcher.enqueue(volume(-10.0));
        let second = dispatcher.enqueue(volume(-20.0));

        // Await in reverse order: queue order was fixed at enqueue time.
        assert_eq!(second.wait().await, Ok(()));
        assert_eq!(first.wait().await, Ok(()));

        let log = log.lock().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].bytes, volume(-10.0).as_bytes());
        assert_eq!(log[1].bytes, volume(-20.0).as_bytes());
        assert!(log[1].started >= log[0].finished + DEFAULT_SETTLE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_resolves_after_settle() {
        let transport = RecordingTransport::new(Duration::from_millis(10));
        let log = transport.log();
        let (dispatcher, _worker) = Dispatcher::spawn(transport, DEFAULT_SETTLE_DELAY);

        dispatcher.submit(volume(-5.0)).await.unwrap();
        let done = tokio::time::Instant::now();

        let log = log.lock().await;
        assert!(done >= log[0].finished + DEFAULT_SETTLE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated() {
        let transport = RecordingTransport::new(Duration::from_millis(10)).failing_on(0);
        let log = transport.log();
        let (dispatcher, _worker) = Dispatcher::spawn(transport, DEFAULT_SETTLE_DELAY);

        let first = dispatcher.enqueue(volume(-1.0));
        let second = dispatcher.enqueue(volume(-2.0));

        assert!(matches!(
            first.wait().await,
            Err(DispatchError::Transport(TransportError::Write(_)))
        ));
        assert_eq!(second.wait().await, Ok(()));

        let log = log.lock().await;
        assert_eq!(log.len(), 2);
        assert!(!log[0].ok);
        assert!(log[1].ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submitters_never_overlap() {
        let transport = RecordingTransport::new(Duration::from_millis(20));
        let probe = transport.clone();
        let log = transport.log();
        let (dispatcher, _worker) = Dispatcher::spawn(transport, DEFAULT_SETTLE_DELAY);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let d = dispatcher.clone();
            tasks.push(tokio::spawn(async move { d.submit(volume(-(i as f64))).await }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap(), Ok(()));
        }

        assert_eq!(probe.max_in_flight().await, 1);
        let log = log.lock().await;
        assert_eq!(log.len(), 8);
        for pair in log.windows(2) {
            assert!(pair[1].started >= pair[0].finished + DEFAULT_SETTLE_DELAY);
        }
    }

    #[tokio::test]
    async fn test_closed_dispatcher_reports_closed() {
        let transport = RecordingTransport::new(Duration::from_millis(1));
        let (dispatcher, worker) = Dispatcher::spawn(transport, Duration::from_millis(1));

        worker.abort();
        let _ = worker.await;

        assert!(dispatcher.is_closed());
        assert_eq!(dispatcher.submit(volume(-3.0)).await, Err(DispatchError::Closed));
    }

    #[tokio::test]
    async fn test_worker_returns_transport_when_handles_dropped() {
        let transport = RecordingTransport::new(Duration::from_millis(1));
        let log = transport.log();
        let (dispatcher, worker) = Dispatcher::spawn(transport, Duration::from_millis(1));

        dispatcher.submit(volume(-3.0)).await.unwrap();
        drop(dispatcher);

        let returned = worker.await.unwrap();
        assert_eq!(returned.log().lock().await.len(), 1);
        assert_eq!(log.lock().await.len(), 1);
    }
}
