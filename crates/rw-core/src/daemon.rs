//! Daemon bootstrap: backing store, managers, event feeds and the store
//! liveness monitor.

use crate::adapter::AdapterProxy;
use crate::api::EventFeeds;
use crate::config::{ConfigError, CoreConfig, StoreKind};
use crate::device::DeviceManager;
use crate::error::CoreError;
use crate::logical::{EventSink, LogicalDeviceManager};
use crate::request::RequestContext;
use parking_lot::Mutex;
use rw_model::{KvClient, MemoryKvClient, Root, StoreError, StoreOptions};
use rw_types::{Device, LogicalDevice};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Store path of the device collection.
pub const DEVICES_PATH: &str = "/devices";

/// Store path of the logical device collection.
pub const LOGICAL_DEVICES_PATH: &str = "/logical_devices";

/// Errors that stop the core from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("kv store at {address} not reachable after {attempts} attempts: {source}")]
    StoreUnreachable {
        address: String,
        attempts: u32,
        source: StoreError,
    },

    #[error("failed to restore state: {0}")]
    Restore(#[from] CoreError),
}

/// Connects to the configured backing store, retrying per the connection
/// settings.
pub async fn connect_backend(config: &CoreConfig) -> Result<Arc<dyn KvClient>, StartupError> {
    match config.kv_store.kind()? {
        StoreKind::Memory => {
            info!("Using in-memory kv store");
            Ok(Arc::new(MemoryKvClient::new()))
        }
        StoreKind::Redis => connect_redis(config).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &CoreConfig) -> Result<Arc<dyn KvClient>, StartupError> {
    use rw_model::{RedisConfig, RedisKvClient};

    let address = config.kv_store.address.clone();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let connect = RedisKvClient::connect(RedisConfig::new(address.clone()));
        let outcome = match tokio::time::timeout(config.kv_timeout(), connect).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StoreError::timeout("connect", config.kv_timeout())),
        };
        match outcome {
            Ok(client) => return Ok(Arc::new(client)),
            Err(e) => {
                if config.connection.max_retries.is_some_and(|max| attempts > max) {
                    return Err(StartupError::StoreUnreachable {
                        address,
                        attempts,
                        source: e,
                    });
                }
                warn!(address = %address, attempt = attempts, error = %e, "Kv store not reachable, retrying");
                tokio::time::sleep(config.retry_interval()).await;
            }
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &CoreConfig) -> Result<Arc<dyn KvClient>, StartupError> {
    Err(ConfigError::invalid("built without redis support").into())
}

/// A running core.
pub struct Core {
    config: CoreConfig,
    device_store: Arc<Root<Device>>,
    logical_store: Arc<Root<LogicalDevice>>,
    devices: Arc<DeviceManager>,
    logical_devices: Arc<LogicalDeviceManager>,
    feeds: Arc<EventFeeds>,
    ready: watch::Sender<bool>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Core {
    /// Wires the stores and managers on top of `backend`. Nothing is
    /// loaded and no task is started.
    pub fn new(config: CoreConfig, backend: Arc<dyn KvClient>, adapter: Arc<dyn AdapterProxy>) -> Self {
        let options = StoreOptions {
            key_prefix: config.kv_store.data_prefix.clone(),
            timeout: config.kv_timeout(),
        };
        let device_store = Root::new(DEVICES_PATH, Arc::clone(&backend), options.clone());
        let logical_store = Root::new(LOGICAL_DEVICES_PATH, Arc::clone(&backend), options);

        let feeds = EventFeeds::new();
        let devices = DeviceManager::new(Arc::clone(&device_store), adapter, config.core_timeout());
        let events: Arc<dyn EventSink> = feeds.clone();
        let logical_devices = LogicalDeviceManager::new(Arc::clone(&logical_store), Arc::clone(&devices), events);
        let (ready, _) = watch::channel(false);

        Self {
            config,
            device_store,
            logical_store,
            devices,
            logical_devices,
            feeds,
            ready,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Connects to the backing store, restores persisted state and starts
    /// the liveness monitor.
    pub async fn start(config: CoreConfig, adapter: Arc<dyn AdapterProxy>) -> Result<Arc<Self>, StartupError> {
        config.validate()?;
        let backend = connect_backend(&config).await?;
        Self::start_with_backend(config, backend, adapter).await
    }

    pub async fn start_with_backend(
        config: CoreConfig,
        backend: Arc<dyn KvClient>,
        adapter: Arc<dyn AdapterProxy>,
    ) -> Result<Arc<Self>, StartupError> {
        let core = Arc::new(Self::new(config, backend, adapter));
        core.restore().await?;
        core.spawn_liveness_monitor();
        info!(instance_id = %core.config.instance_id, "Core started");
        Ok(core)
    }

    /// Rebuilds device and logical device agents from the backing store.
    pub async fn restore(&self) -> Result<(), CoreError> {
        let devices = self.devices.load_devices().await?;
        let ctx = RequestContext::with_timeout(self.config.long_running_request_timeout());
        let logical_devices = self.logical_devices.load_logical_devices(&ctx).await?;
        info!(devices, logical_devices, "Restored state from kv store");
        Ok(())
    }

    fn spawn_liveness_monitor(&self) {
        let monitor = LivenessMonitor {
            device_store: Arc::clone(&self.device_store),
            logical_store: Arc::clone(&self.logical_store),
            ready: self.ready.clone(),
            live_interval: self.config.live_probe_interval(),
            not_live_interval: self.config.not_live_probe_interval(),
            stale_after: self.config.txn_key_delete_time(),
        };
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move { monitor.run(shutdown).await });
        self.tasks.lock().push(handle);
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn device_manager(&self) -> &Arc<DeviceManager> {
        &self.devices
    }

    pub fn logical_device_manager(&self) -> &Arc<LogicalDeviceManager> {
        &self.logical_devices
    }

    pub fn feeds(&self) -> &Arc<EventFeeds> {
        &self.feeds
    }

    /// A context bounded by the default request timeout.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::with_timeout(self.config.default_request_timeout())
    }

    /// A context for requests that take long, e.g. enabling an OLT.
    pub fn long_running_context(&self) -> RequestContext {
        RequestContext::with_timeout(self.config.long_running_request_timeout())
    }

    /// True while the backing store answers.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Stops background tasks and detaches stream subscribers.
    pub async fn stop(&self) {
        info!(instance_id = %self.config.instance_id, "Stopping core");
        self.shutdown.cancel();
        self.feeds.shutdown();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed");
            }
        }
    }
}

/// Periodically checks the backing store, publishes readiness and drops
/// transaction branches that were never committed.
struct LivenessMonitor {
    device_store: Arc<Root<Device>>,
    logical_store: Arc<Root<LogicalDevice>>,
    ready: watch::Sender<bool>,
    live_interval: Duration,
    not_live_interval: Duration,
    stale_after: Duration,
}

impl LivenessMonitor {
    async fn run(self, shutdown: CancellationToken) {
        loop {
            // Bounded by the store timeout; a store that never answers is not live.
            let alive = self.device_store.backend_alive().await;
            let changed = self.ready.send_if_modified(|ready| {
                let changed = *ready != alive;
                *ready = alive;
                changed
            });
            if changed {
                if alive {
                    info!("Kv store is live");
                } else {
                    warn!("Kv store is not live");
                }
            }

            let discarded =
                self.device_store.discard_stale(self.stale_after) + self.logical_store.discard_stale(self.stale_after);
            if discarded > 0 {
                debug!(discarded, "Discarded stale transaction branches");
            }

            let interval = if alive {
                self.live_interval
            } else {
                self.not_live_interval
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!("Liveness monitor stopped");
    }
}
