use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::device::{DeviceInfo, DeviceLink};
use crate::device_queue::{DeviceQueueFactory, DeviceQueueHandle};
use crate::error::{ProviderError, Result};
use crate::pin::PinProvider;

const REGISTRY_CHANNEL_SIZE: usize = 64;

/// Decides whether to take over a device that another process holds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AcquirePolicy: Send + Sync {
    async fn confirm_acquire(&self, device: &DeviceInfo) -> bool;
}

/// Approves every takeover after a fixed delay.
#[derive(Debug, Clone)]
pub struct AutoApprove {
    delay: Duration,
}

impl AutoApprove {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl AcquirePolicy for AutoApprove {
    async fn confirm_acquire(&self, device: &DeviceInfo) -> bool {
        debug!("Auto-approving takeover of {} in {:?}", device.name(), self.delay);
        tokio::time::sleep(self.delay).await;
        true
    }
}

/// Hot-plug notifications, as produced by the USB layer.
pub enum DeviceEvent {
    Connected(Arc<dyn DeviceLink>),
    /// Visible, but held by another process.
    ConnectedUnacquired(Arc<dyn DeviceLink>),
    Disconnected { device_id: String },
}

/// The device operations are routed to.
#[derive(Clone, Debug)]
pub struct ActiveDevice {
    pub info: DeviceInfo,
    pub queue: DeviceQueueHandle,
}

pub struct RegistryOptions {
    pub pin: Arc<dyn PinProvider>,
    pub acquire: Arc<dyn AcquirePolicy>,
    pub operation_timeout: Option<Duration>,
}

enum RegistryCmd {
    Connect {
        link: Arc<dyn DeviceLink>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    ConnectUnacquired {
        link: Arc<dyn DeviceLink>,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    Disconnect {
        device_id: String,
        respond_to: oneshot::Sender<bool>,
    },
    ActiveDevice {
        respond_to: oneshot::Sender<Option<ActiveDevice>>,
    },
    ListDevices {
        respond_to: oneshot::Sender<Vec<DeviceInfo>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

struct DeviceEntry {
    link: Arc<dyn DeviceLink>,
    connected_seq: u64,
    queue_handle: DeviceQueueHandle,
}

/// Owns the set of connected devices. Runs as a single task; every change
/// and every read goes through its command channel.
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceEntry>,
    next_seq: u64,
    options: RegistryOptions,
    cmd_rx: mpsc::Receiver<RegistryCmd>,
}

impl DeviceRegistry {
    /// Start the registry task and return the handle used to reach it.
    pub fn spawn(options: RegistryOptions) -> RegistryHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(REGISTRY_CHANNEL_SIZE);
        let registry = DeviceRegistry {
            devices: HashMap::new(),
            next_seq: 0,
            options,
            cmd_rx,
        };
        tokio::spawn(registry.run());
        RegistryHandle { cmd_tx }
    }

    async fn run(mut self) {
        info!("DeviceRegistry started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                RegistryCmd::Connect { link, respond_to } => {
                    let _ = respond_to.send(self.connect(link));
                }
                RegistryCmd::ConnectUnacquired { link, respond_to } => {
                    self.connect_unacquired(link, respond_to);
                }
                RegistryCmd::Disconnect { device_id, respond_to } => {
                    let _ = respond_to.send(self.disconnect(&device_id));
                }
                RegistryCmd::ActiveDevice { respond_to } => {
                    let _ = respond_to.send(self.active_device());
                }
                RegistryCmd::ListDevices { respond_to } => {
                    let _ = respond_to.send(self.ordered().map(|e| e.link.info().clone()).collect());
                }
                RegistryCmd::Shutdown { respond_to } => {
                    for entry in self.devices.values() {
                        entry.queue_handle.shutdown();
                    }
                    self.devices.clear();
                    let _ = respond_to.send(());
                    break;
                }
            }
        }

        for entry in self.devices.values() {
            entry.queue_handle.shutdown();
        }
        info!("DeviceRegistry stopped");
    }

    fn connect(&mut self, link: Arc<dyn DeviceLink>) -> Result<()> {
        let info = link.info().clone();

        if info.bootloader_mode {
            error!("Device {} is in bootloader mode, re-connect it", info.name());
            return Err(ProviderError::BootloaderMode { device_id: info.unique_id });
        }

        let queue_handle = DeviceQueueFactory::spawn_worker(
            Arc::clone(&link),
            Arc::clone(&self.options.pin),
            self.options.operation_timeout,
        );

        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(stale) = self.devices.insert(
            info.unique_id.clone(),
            DeviceEntry { link, connected_seq: seq, queue_handle },
        ) {
            warn!("Device {} reconnected, replacing stale entry", info.unique_id);
            stale.queue_handle.shutdown();
        }

        info!("Connected device {}", info.name());
        Ok(())
    }

    fn connect_unacquired(&self, link: Arc<dyn DeviceLink>, respond_to: oneshot::Sender<Result<bool>>) {
        let acquire = Arc::clone(&self.options.acquire);

        // The policy may wait on a user; keep the registry loop free meanwhile.
        tokio::spawn(async move {
            info!("Device {} is held by another session", link.info().name());

            if !acquire.confirm_acquire(link.info()).await {
                info!("Takeover of {} declined", link.info().unique_id);
                let _ = respond_to.send(Ok(false));
                return;
            }

            let stealer = Arc::clone(&link);
            let result = match tokio::task::spawn_blocking(move || stealer.steal()).await {
                Ok(Ok(())) => {
                    info!("Steal of {} done, waiting for it to reconnect", link.info().unique_id);
                    Ok(true)
                }
                Ok(Err(e)) => Err(e),
                Err(e) => Err(ProviderError::Transport(format!("steal task failed: {}", e))),
            };
            let _ = respond_to.send(result);
        });
    }

    fn disconnect(&mut self, device_id: &str) -> bool {
        match self.devices.remove(device_id) {
            Some(entry) => {
                entry.queue_handle.shutdown();
                info!("Disconnected device {}", entry.link.info().name());
                true
            }
            None => {
                warn!("Disconnect for unknown device {}", device_id);
                false
            }
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &DeviceEntry> {
        let mut entries: Vec<&DeviceEntry> = self.devices.values().collect();
        entries.sort_by_key(|entry| entry.connected_seq);
        entries.into_iter()
    }

    /// First-connected device still present.
    fn active_device(&self) -> Option<ActiveDevice> {
        self.devices
            .values()
            .min_by_key(|entry| entry.connected_seq)
            .map(|entry| ActiveDevice {
                info: entry.link.info().clone(),
                queue: entry.queue_handle.clone(),
            })
    }
}

/// Cheap, cloneable access to the registry task.
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    cmd_tx: mpsc::Sender<RegistryCmd>,
}

impl RegistryHandle {
    /// Register a device. Bootloader-mode devices are refused with `BootloaderMode`.
    pub async fn connect(&self, link: Arc<dyn DeviceLink>) -> Result<()> {
        let device_id = link.info().unique_id.clone();
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCmd::Connect { link, respond_to: tx }).await?;
        rx.await
            .map_err(|_| ProviderError::DeviceUnavailable { device_id })?
    }

    /// Ask the acquire policy and, if approved, steal the device. Returns
    /// whether it was stolen; the device registers on its next connect event.
    pub async fn connect_unacquired(&self, link: Arc<dyn DeviceLink>) -> Result<bool> {
        let device_id = link.info().unique_id.clone();
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCmd::ConnectUnacquired { link, respond_to: tx }).await?;
        rx.await
            .map_err(|_| ProviderError::DeviceUnavailable { device_id })?
    }

    /// Remove a device; its pending operations fail with `DeviceUnavailable`.
    pub async fn disconnect(&self, device_id: &str) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCmd::Disconnect { device_id: device_id.to_string(), respond_to: tx })
            .await?;
        rx.await.map_err(|_| ProviderError::NoDevice)
    }

    pub async fn active_device(&self) -> Result<Option<ActiveDevice>> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCmd::ActiveDevice { respond_to: tx }).await?;
        rx.await.map_err(|_| ProviderError::NoDevice)
    }

    /// Connected devices, oldest connection first.
    pub async fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCmd::ListDevices { respond_to: tx }).await?;
        rx.await.map_err(|_| ProviderError::NoDevice)
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(RegistryCmd::Shutdown { respond_to: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Feed hot-plug events into the registry until the sender side closes.
    pub fn pump_events(&self, mut events: mpsc::Receiver<DeviceEvent>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    DeviceEvent::Connected(link) => {
                        if let Err(e) = handle.connect(link).await {
                            error!("Rejected device: {}", e);
                        }
                    }
                    DeviceEvent::ConnectedUnacquired(link) => {
                        // Runs alongside later events, like the registry does.
                        let handle = handle.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle.connect_unacquired(link).await {
                                error!("Failed to acquire device: {}", e);
                            }
                        });
                    }
                    DeviceEvent::Disconnected { device_id } => {
                        if let Err(e) = handle.disconnect(&device_id).await {
                            error!("Failed to disconnect {}: {}", device_id, e);
                        }
                    }
                }
            }
            debug!("Device event stream closed");
        })
    }

    async fn send(&self, cmd: RegistryCmd) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| ProviderError::NoDevice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::FixedPinProvider;
    use crate::transport::{EmulatedDevice, EmulatorBehaviour};

    fn options(acquire: Arc<dyn AcquirePolicy>) -> RegistryOptions {
        RegistryOptions {
            pin: Arc::new(FixedPinProvider::new("")),
            acquire,
            operation_timeout: None,
        }
    }

    fn registry() -> RegistryHandle {
        DeviceRegistry::spawn(options(Arc::new(AutoApprove::new(Duration::ZERO))))
    }

    fn device(id: &str, bootloader: bool) -> Arc<EmulatedDevice> {
        Arc::new(EmulatedDevice::new(
            DeviceInfo::new(id, Some(format!("label-{}", id)), bootloader),
            EmulatorBehaviour::default(),
        ))
    }

    async fn active_id(registry: &RegistryHandle) -> Option<String> {
        registry.active_device().await.unwrap().map(|d| d.info.unique_id)
    }

    #[tokio::test]
    async fn first_connected_device_is_active() {
        let registry = registry();
        registry.connect(device("a", false)).await.unwrap();
        registry.connect(device("b", false)).await.unwrap();
        assert_eq!(active_id(&registry).await.as_deref(), Some("a"));

        assert!(registry.disconnect("a").await.unwrap());
        assert_eq!(active_id(&registry).await.as_deref(), Some("b"));

        assert!(registry.disconnect("b").await.unwrap());
        assert_eq!(active_id(&registry).await, None);
        assert!(!registry.disconnect("b").await.unwrap());
    }

    #[tokio::test]
    async fn bootloader_device_is_refused() {
        let registry = registry();
        let err = registry.connect(device("boot", true)).await.unwrap_err();
        assert!(matches!(err, ProviderError::BootloaderMode { ref device_id } if device_id == "boot"));
        assert_eq!(active_id(&registry).await, None);
        assert!(registry.devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn devices_are_listed_in_connection_order() {
        let registry = registry();
        for id in ["c", "a", "b"] {
            registry.connect(device(id, false)).await.unwrap();
        }
        let ids: Vec<String> = registry.devices().await.unwrap().into_iter().map(|d| d.unique_id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn reconnect_replaces_the_stale_queue() {
        let registry = registry();
        registry.connect(device("a", false)).await.unwrap();
        let stale = registry.active_device().await.unwrap().unwrap().queue;

        registry.connect(device("a", false)).await.unwrap();
        assert!(stale.is_closed());
        let fresh = registry.active_device().await.unwrap().unwrap().queue;
        assert!(!fresh.is_closed());
    }

    #[tokio::test]
    async fn unacquired_device_is_stolen_when_approved() {
        let registry = registry();
        let dev = device("held", false);
        assert!(registry.connect_unacquired(dev.clone()).await.unwrap());
        assert_eq!(dev.steal_count(), 1);
        // Not usable until the hot-plug layer reports the regular connect.
        assert_eq!(active_id(&registry).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_approve_steals_only_after_the_delay() {
        let delay = crate::config::ProviderConfig::default().acquire_delay();
        assert_eq!(delay, Duration::from_secs(1));
        let registry = DeviceRegistry::spawn(options(Arc::new(AutoApprove::new(delay))));

        let dev = device("slow", false);
        let pending = {
            let registry = registry.clone();
            let dev = dev.clone();
            tokio::spawn(async move { registry.connect_unacquired(dev).await })
        };

        tokio::time::sleep(delay - Duration::from_millis(100)).await;
        assert_eq!(dev.steal_count(), 0);

        assert!(pending.await.unwrap().unwrap());
        assert_eq!(dev.steal_count(), 1);
    }

    #[tokio::test]
    async fn unacquired_device_is_left_alone_when_declined() {
        let mut policy = MockAcquirePolicy::new();
        policy
            .expect_confirm_acquire()
            .withf(|info| info.unique_id == "held")
            .times(1)
            .returning(|_| false);
        let registry = DeviceRegistry::spawn(options(Arc::new(policy)));

        let dev = device("held", false);
        assert!(!registry.connect_unacquired(dev.clone()).await.unwrap());
        assert_eq!(dev.steal_count(), 0);
    }

    #[tokio::test]
    async fn pumped_events_update_the_registry() {
        let registry = registry();
        let (tx, rx) = mpsc::channel(8);
        let pump = registry.pump_events(rx);

        tx.send(DeviceEvent::Connected(device("boot", true))).await.unwrap();
        tx.send(DeviceEvent::Connected(device("x", false))).await.unwrap();
        tx.send(DeviceEvent::Connected(device("y", false))).await.unwrap();
        tx.send(DeviceEvent::Disconnected { device_id: "x".into() }).await.unwrap();
        drop(tx);
        pump.await.unwrap();

        assert_eq!(active_id(&registry).await.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn shutdown_closes_every_queue() {
        let registry = registry();
        registry.connect(device("a", false)).await.unwrap();
        let queue = registry.active_device().await.unwrap().unwrap().queue;

        registry.shutdown().await;
        assert!(queue.is_closed());
        assert!(matches!(registry.active_device().await, Err(ProviderError::NoDevice)));
    }
}
