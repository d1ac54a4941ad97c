//! Gateway runtime.
//!
//! [`GatewayServer`] wires the components together without touching the
//! network, so tests can drive them in-process. [`GatewayServer::start`]
//! binds both listeners and returns a [`ServerHandle`] that owns the
//! background tasks and the shutdown sequence.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::commands::{CommandSender, SharedCommandSender};
use crate::application::events::{
    create_event_bus, EventListener, EventSink, LoggingEventListener, SharedEventBus,
    SharedEventListener, SharedEventSink,
};
use crate::application::handlers::{
    DispatcherSettings, MessageDispatcher, SharedMessageDispatcher,
};
use crate::application::protocol::{
    CloudChargeProtocolService, CloudChargeSettings, OcppProtocolService, ProtocolManager,
    SharedProtocolManager,
};
use crate::application::session::{
    EvictionListener, RegistryLimits, SessionRegistry, SessionSweeper, SharedSessionRegistry, SweeperConfig,
    SweeperHandle,
};
use crate::config::{AppConfig, LoggingConfig};
use crate::infrastructure::crypto::{HmacSignatureVerifier, SignatureError, SignatureVerifier};
use crate::interfaces::http::{create_api_router, ApiState};
use crate::interfaces::ws::OcppServer;
use crate::support::shutdown::{run_with_timeout, ShutdownSignal};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Signature setup failed: {0}")]
    Signature(#[from] SignatureError),
}

// ── Assembly ───────────────────────────────────────────────────────

/// Fully wired gateway that has not yet bound any socket.
pub struct GatewayServer {
    pub config: AppConfig,
    pub registry: SharedSessionRegistry,
    pub events: SharedEventSink,
    pub event_bus: SharedEventBus,
    pub commands: SharedCommandSender,
    pub dispatcher: SharedMessageDispatcher,
    pub manager: SharedProtocolManager,
    pub verifier: Arc<dyn SignatureVerifier>,
    sweeper: SessionSweeper,
    metrics: Option<PrometheusHandle>,
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Result<Self, ServerError> {
        if config.protocol.ocpp_version != "1.6" {
            warn!(
                version = %config.protocol.ocpp_version,
                "Only OCPP 1.6 is served, ignoring configured version"
            );
        }

        let registry = SessionRegistry::shared(RegistryLimits::from(&config.session));

        // Every component emits into the sink; the bus fans out from there.
        let event_bus = create_event_bus();
        let events = EventSink::shared(Some(event_bus.clone() as SharedEventListener));

        let commands: SharedCommandSender = Arc::new(CommandSender::new(registry.clone()));
        let dispatcher = Arc::new(MessageDispatcher::new(
            registry.clone(),
            events.clone(),
            DispatcherSettings::from(&config.session),
        ));

        let manager = Arc::new(ProtocolManager::new(
            config.protocol.default_protocol,
            events.clone(),
        ));
        manager.register(Arc::new(OcppProtocolService::new(
            registry.clone(),
            commands.clone(),
            events.clone(),
        )));
        manager.register(Arc::new(CloudChargeProtocolService::new(
            registry.clone(),
            events.clone(),
            CloudChargeSettings::from(&config.cloud_charge),
        )));
        let eviction_listener: Weak<dyn EvictionListener> = Arc::<ProtocolManager>::downgrade(&manager);
        registry.set_eviction_listener(eviction_listener);

        let verifier: Arc<dyn SignatureVerifier> =
            Arc::new(HmacSignatureVerifier::from_config(&config.cloud_charge)?);

        let sweeper = SessionSweeper::new(registry.clone(), SweeperConfig::from(&config.session));

        Ok(Self {
            config,
            registry,
            events,
            event_bus,
            commands,
            dispatcher,
            manager,
            verifier,
            sweeper,
            metrics: None,
        })
    }

    /// Render `/metrics` from this recorder.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Bind both listeners and spawn the servers and the sweeper.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let ws_listener = bind(&self.config.server.ws_address()).await?;
        let api_listener = bind(&self.config.server.api_address()).await?;
        let ws_addr = ws_listener.local_addr()?;
        let api_addr = api_listener.local_addr()?;

        let shutdown = ShutdownSignal::new();
        let event_log = spawn_event_log(&self.event_bus, shutdown.clone());
        let sweeper = self.sweeper.start();

        let ws_server = Arc::new(OcppServer::new(
            self.registry.clone(),
            self.dispatcher.clone(),
            self.manager.clone(),
            self.config.session.default_heartbeat_interval,
        ));
        let ws_task = tokio::spawn(ws_server.serve(ws_listener, shutdown.clone()));

        let mut state = ApiState::new(
            self.manager.clone(),
            self.registry.clone(),
            self.verifier.clone(),
        );
        if let Some(handle) = self.metrics {
            state = state.with_metrics(handle);
        }
        let router = create_api_router(state);
        let api_shutdown = shutdown.clone();
        let api_task = tokio::spawn(async move {
            let served = axum::serve(api_listener, router.into_make_service())
                .with_graceful_shutdown(async move { api_shutdown.wait().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "HTTP server error");
            }
        });

        info!(%ws_addr, "OCPP WebSocket endpoint ready");
        info!(%api_addr, "HTTP API ready, Swagger UI at /docs");

        Ok(ServerHandle {
            registry: self.registry,
            manager: self.manager,
            event_bus: self.event_bus,
            ws_addr,
            api_addr,
            shutdown,
            shutdown_timeout: Duration::from_secs(self.config.server.shutdown_timeout),
            sweeper,
            tasks: vec![ws_task, api_task, event_log],
        })
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Mirror the event stream into the log until shutdown.
fn spawn_event_log(bus: &SharedEventBus, shutdown: ShutdownSignal) -> JoinHandle<()> {
    let mut subscriber = bus.subscribe();
    tokio::spawn(async move {
        let logger = LoggingEventListener;
        loop {
            tokio::select! {
                event = subscriber.recv() => match event {
                    Some(event) => logger.on_event(&event),
                    None => break,
                },
                _ = shutdown.wait() => break,
            }
        }
    })
}

// ── ServerHandle ───────────────────────────────────────────────────

/// Handle to a running gateway.
///
/// ```rust,no_run
/// use evcs_gateway::config::AppConfig;
/// use evcs_gateway::server::GatewayServer;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let handle = GatewayServer::new(AppConfig::default())?.start().await?;
///     handle.shutdown_signal().wait().await;
///     handle.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct ServerHandle {
    pub registry: SharedSessionRegistry,
    pub manager: SharedProtocolManager,
    pub event_bus: SharedEventBus,
    ws_addr: SocketAddr,
    api_addr: SocketAddr,
    shutdown: ShutdownSignal,
    shutdown_timeout: Duration,
    sweeper: SweeperHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn ws_local_addr(&self) -> SocketAddr {
        self.ws_addr
    }

    pub fn api_local_addr(&self) -> SocketAddr {
        self.api_addr
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }

    /// Stop accepting, flush-close every session, then wait for the
    /// server tasks up to the configured timeout.
    pub async fn shutdown(self) {
        info!("Shutting down gateway");
        self.shutdown.trigger();

        let closed = self.sweeper.stop().await;
        info!(closed, "Session sweeper stopped");

        let tasks = self.tasks;
        let joined = run_with_timeout(self.shutdown_timeout, async move {
            for task in tasks {
                if let Err(e) = task.await {
                    error!(error = %e, "Server task ended abnormally");
                }
            }
        })
        .await;
        if !joined {
            warn!("Some server tasks were still running at shutdown deadline");
        }
        info!("Gateway shutdown complete");
    }
}

// ── Process setup ──────────────────────────────────────────────────

/// Install the Prometheus recorder. The global recorder can be set only
/// once per process, so later calls reuse the first handle.
pub fn install_metrics_recorder() -> Option<PrometheusHandle> {
    static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                info!("Prometheus metrics recorder installed");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Prometheus recorder unavailable, /metrics disabled");
                None
            }
        })
        .clone()
}

/// Initialize tracing from the logging config. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let result = match config.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialized: {e}");
    }
}
