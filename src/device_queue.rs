use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::device::DeviceLink;
use crate::error::{ProviderError, Result};
use crate::messages::Features;
use crate::pin::PinProvider;
use crate::session::Session;

pub const QUEUE_CHANNEL_SIZE: usize = 100;

/// A unit of work run with exclusive access to the device. It receives the
/// open session, or the error that prevented opening one, and returns
/// whether the transport is still fit for the next job.
pub type SessionJob = Box<dyn FnOnce(Result<&mut Session>) -> bool + Send>;

/// Commands that can be sent to the device worker
pub enum DeviceCmd {
    Session {
        job: SessionJob,
        enqueued_at: Instant,
    },
    Metrics {
        respond_to: oneshot::Sender<DeviceQueueMetrics>,
    },
}

impl DeviceCmd {
    fn operation_name(&self) -> &'static str {
        match self {
            DeviceCmd::Session { .. } => "session",
            DeviceCmd::Metrics { .. } => "metrics",
        }
    }
}

/// Metrics for monitoring queue performance
#[derive(Debug, Default, Clone)]
pub struct DeviceQueueMetrics {
    pub queue_wait_ms: Vec<u64>,
    pub device_rtt_ms: Vec<u64>,
    pub total_ms: Vec<u64>,
    pub queue_depth: usize,
    pub processed: u64,
}

impl DeviceQueueMetrics {
    pub fn record_operation(&mut self, queue_wait: Duration, device_rtt: Duration, total: Duration) {
        self.queue_wait_ms.push(queue_wait.as_millis() as u64);
        self.device_rtt_ms.push(device_rtt.as_millis() as u64);
        self.total_ms.push(total.as_millis() as u64);
        self.processed += 1;

        // Keep only last 100 measurements
        if self.queue_wait_ms.len() > 100 {
            self.queue_wait_ms.remove(0);
            self.device_rtt_ms.remove(0);
            self.total_ms.remove(0);
        }
    }
}

/// Worker task that processes device commands sequentially
pub struct DeviceWorker {
    device_id: String,
    link: Arc<dyn DeviceLink>,
    pin: Arc<dyn PinProvider>,
    session: Option<Session>,
    metrics: DeviceQueueMetrics,
    cmd_rx: mpsc::Receiver<DeviceCmd>,
    cancel: CancellationToken,
}

impl DeviceWorker {
    fn new(
        link: Arc<dyn DeviceLink>,
        pin: Arc<dyn PinProvider>,
        cmd_rx: mpsc::Receiver<DeviceCmd>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            device_id: link.info().unique_id.clone(),
            link,
            pin,
            session: None,
            metrics: DeviceQueueMetrics::default(),
            cmd_rx,
            cancel,
        }
    }

    /// Main worker loop - processes commands sequentially until the device is cancelled
    #[instrument(level = "info", skip(self), fields(device_id = %self.device_id))]
    pub async fn run(mut self) {
        info!("DeviceWorker starting for device {}", self.device_id);

        loop {
            let cmd = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
            };

            self.metrics.queue_depth = self.cmd_rx.len();
            debug!("Processing {} command", cmd.operation_name());
            self.process_command(cmd).await;
        }

        // Jobs still queued are dropped here; their callers see DeviceUnavailable.
        self.cmd_rx.close();
        info!("DeviceWorker shutting down for device {}", self.device_id);
    }

    async fn process_command(&mut self, cmd: DeviceCmd) {
        match cmd {
            DeviceCmd::Session { job, enqueued_at } => {
                let device_start = Instant::now();
                self.run_session_job(job).await;
                self.metrics.record_operation(
                    device_start.duration_since(enqueued_at),
                    device_start.elapsed(),
                    enqueued_at.elapsed(),
                );
            }
            DeviceCmd::Metrics { respond_to } => {
                let _ = respond_to.send(self.metrics.clone());
            }
        }
    }

    /// Run one job on the blocking pool with the device session, opening the
    /// transport first if no session is cached.
    async fn run_session_job(&mut self, job: SessionJob) {
        let cached = self.session.take();
        let link = Arc::clone(&self.link);
        let pin = Arc::clone(&self.pin);
        let device_id = self.device_id.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let opened = match cached {
                Some(session) => Ok(session),
                None => {
                    info!("Opening transport for device {}", device_id);
                    link.open().map(|transport| Session::new(transport, pin))
                }
            };
            match opened {
                Ok(mut session) => {
                    if job(Ok(&mut session)) {
                        Some(session)
                    } else {
                        warn!("Dropping transport for device {} after I/O failure", device_id);
                        None
                    }
                }
                Err(e) => {
                    warn!("Failed to open device {}: {}", device_id, e);
                    let _ = job(Err(e));
                    None
                }
            }
        })
        .await;

        self.session = match outcome {
            Ok(session) => session,
            Err(e) => {
                error!("Session job for device {} panicked: {}", self.device_id, e);
                None
            }
        };
    }
}

/// Handle for communicating with a device worker
#[derive(Clone, Debug)]
pub struct DeviceQueueHandle {
    device_id: String,
    cmd_tx: mpsc::Sender<DeviceCmd>,
    cancel: CancellationToken,
    operation_timeout: Option<Duration>,
}

impl DeviceQueueHandle {
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `work` with exclusive access to the device, after every job queued before it.
    ///
    /// Fails with `DeviceUnavailable` when the device is disconnected while the
    /// job is queued or running.
    #[instrument(level = "debug", skip(self, work), fields(device_id = %self.device_id))]
    pub async fn with_session<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: SessionJob = Box::new(move |session: Result<&mut Session>| {
            let result = session.and_then(work);
            let healthy = !matches!(result, Err(ProviderError::Transport(_)));
            let _ = tx.send(result);
            healthy
        });

        self.submit(DeviceCmd::Session { job, enqueued_at: Instant::now() }, rx).await?
    }

    /// Get device features
    pub async fn get_features(&self) -> Result<Features> {
        self.with_session(|session| session.get_features()).await
    }

    pub async fn metrics(&self) -> Result<DeviceQueueMetrics> {
        let (tx, rx) = oneshot::channel();
        self.submit(DeviceCmd::Metrics { respond_to: tx }, rx).await
    }

    /// Stop the worker. Queued and in-flight jobs fail with `DeviceUnavailable`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn submit<R>(&self, cmd: DeviceCmd, rx: oneshot::Receiver<R>) -> Result<R> {
        if self.cancel.is_cancelled() {
            return Err(self.unavailable());
        }

        // Queueing can wait on a full channel behind a stalled device; a
        // disconnect must still end the wait.
        let response = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.unavailable()),
                sent = self.cmd_tx.send(cmd) => sent.map_err(|_| self.unavailable())?,
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(self.unavailable()),
                reply = rx => reply.map_err(|_| self.unavailable()),
            }
        };

        match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, response)
                .await
                .map_err(|_| ProviderError::Timeout)?,
            None => response.await,
        }
    }

    fn unavailable(&self) -> ProviderError {
        ProviderError::DeviceUnavailable { device_id: self.device_id.clone() }
    }
}

/// Factory for creating device workers and handles
pub struct DeviceQueueFactory;

impl DeviceQueueFactory {
    /// Spawn a new device worker and return a handle to it
    pub fn spawn_worker(
        link: Arc<dyn DeviceLink>,
        pin: Arc<dyn PinProvider>,
        operation_timeout: Option<Duration>,
    ) -> DeviceQueueHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(QUEUE_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let device_id = link.info().unique_id.clone();

        let worker = DeviceWorker::new(link, pin, cmd_rx, cancel.clone());

        // Spawn the worker task
        tokio::spawn(worker.run());

        DeviceQueueHandle {
            device_id,
            cmd_tx,
            cancel,
            operation_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInfo;
    use crate::path::DerivationPath;
    use crate::pin::FixedPinProvider;
    use crate::transport::{EmulatedDevice, EmulatorBehaviour};

    fn spawn(device: Arc<EmulatedDevice>) -> DeviceQueueHandle {
        DeviceQueueFactory::spawn_worker(device, Arc::new(FixedPinProvider::new("")), None)
    }

    fn emulator(id: &str) -> Arc<EmulatedDevice> {
        Arc::new(EmulatedDevice::new(
            DeviceInfo::new(id, Some("test".into()), false),
            EmulatorBehaviour::default(),
        ))
    }

    #[tokio::test]
    async fn jobs_run_in_submission_order_on_one_transport() {
        let device = emulator("queue-order");
        let handle = spawn(Arc::clone(&device));

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let jobs = (0..5).map(|i| {
            let order = Arc::clone(&order);
            handle.with_session(move |_session| {
                order.lock().unwrap().push(i);
                Ok(i)
            })
        });
        let results = futures::future::join_all(jobs).await;

        let values: Vec<i32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(device.open_count(), 1);

        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.processed, 5);
        assert_eq!(metrics.total_ms.len(), 5);
    }

    #[tokio::test]
    async fn session_errors_are_returned_unchanged() {
        let handle = spawn(emulator("queue-errors"));
        let err = handle
            .with_session(|_session| -> Result<()> { Err(ProviderError::DeviceRejected("nope".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::DeviceRejected(ref m) if m == "nope"));
    }

    #[tokio::test]
    async fn transport_failure_reopens_on_next_job() {
        let device = emulator("queue-reopen");
        let handle = spawn(Arc::clone(&device));

        let err = handle
            .with_session(|_session| -> Result<()> { Err(ProviderError::Transport("pipe broke".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));

        handle.get_features().await.unwrap();
        assert_eq!(device.open_count(), 2);
    }

    #[tokio::test]
    async fn reads_features_and_addresses_through_the_session() {
        let handle = spawn(emulator("queue-features"));
        let features = handle.get_features().await.unwrap();
        assert_eq!(features.device_id.as_deref(), Some("queue-features"));
        assert_eq!(features.bootloader_mode, Some(false));

        let path = DerivationPath::parse("44'/60'/0'/0").unwrap();
        let address = handle
            .with_session(move |session| session.ethereum_get_address(&path, false))
            .await
            .unwrap();
        assert_eq!(address.len(), 40);
    }

    #[tokio::test]
    async fn shutdown_fails_later_submissions() {
        let handle = spawn(emulator("queue-shutdown"));
        handle.shutdown();
        assert!(handle.is_closed());
        let err = handle.get_features().await.unwrap_err();
        assert!(matches!(err, ProviderError::DeviceUnavailable { ref device_id } if device_id == "queue-shutdown"));
    }

    #[tokio::test]
    async fn shutdown_releases_callers_waiting_on_a_full_queue() {
        let (gate, stall) = std::sync::mpsc::channel::<()>();
        let device = Arc::new(
            EmulatedDevice::new(DeviceInfo::new("queue-full", None, false), EmulatorBehaviour::default())
                .with_stall(stall),
        );
        let handle = spawn(Arc::clone(&device));

        // One job in flight, a full channel, and one caller still queueing.
        let callers: Vec<_> = (0..QUEUE_CHANNEL_SIZE + 2)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.get_features().await })
            })
            .collect();

        for _ in 0..200 {
            if !device.requests().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.shutdown();
        for caller in callers {
            let result = tokio::time::timeout(Duration::from_secs(2), caller)
                .await
                .expect("caller still pending after shutdown")
                .unwrap();
            assert!(matches!(result, Err(ProviderError::DeviceUnavailable { .. })));
        }
        drop(gate);
    }

    #[tokio::test]
    async fn operation_timeout_is_enforced() {
        let (_gate, stall) = std::sync::mpsc::channel::<()>();
        let device = Arc::new(
            EmulatedDevice::new(DeviceInfo::new("queue-timeout", None, false), EmulatorBehaviour::default())
                .with_stall(stall),
        );
        let handle = DeviceQueueFactory::spawn_worker(
            device,
            Arc::new(FixedPinProvider::new("")),
            Some(Duration::from_millis(50)),
        );

        let err = handle.get_features().await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout));
        handle.shutdown();
        drop(_gate);
    }
}
