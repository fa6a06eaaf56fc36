pub mod config;
pub mod discovery;
pub mod errors;
pub mod interceptors;
pub mod metrics_defs;
pub mod node;
pub mod resolver;
pub mod resources;
pub mod snapshot;
pub mod snapshot_cache;
pub mod status;
pub mod stickiness;

use config::Config;
use discovery::DiscoveryService;
pub use errors::ControlPlaneError;
use interceptors::{CallOutcome, ConnectionLifecycle};
use resolver::{Group, GroupResolver};
use shared::admin_service::AdminService;
use snapshot::build_snapshot;
use snapshot_cache::SnapshotCache;
use std::net::SocketAddr;
use std::sync::Arc;
use stickiness::StickinessCache;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type ServeTask = JoinHandle<Result<(), ControlPlaneError>>;

/// A running control plane. Dropping the handle shuts both listeners down
/// the same way [`ServerHandle::shutdown`] does.
pub struct ServerHandle {
    local_addr: SocketAddr,
    admin_addr: SocketAddr,
    snapshots: Arc<SnapshotCache<GroupResolver>>,
    shutdown_tx: watch::Sender<bool>,
    discovery_task: ServeTask,
    admin_task: ServeTask,
}

impl ServerHandle {
    /// Address proxies send discovery requests to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    /// Snapshot store backing the discovery listener. Replacing a group's
    /// snapshot here pushes it to every proxy of the group.
    pub fn snapshots(&self) -> &Arc<SnapshotCache<GroupResolver>> {
        &self.snapshots
    }

    /// Stops accepting connections on both listeners and starts draining the
    /// open ones. Use [`ServerHandle::wait`] to wait for the drain to finish.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub async fn wait(self) -> Result<(), ControlPlaneError> {
        let (discovery, admin) = tokio::try_join!(self.discovery_task, self.admin_task)?;
        discovery?;
        admin?;
        Ok(())
    }
}

/// Validates `config`, binds both listeners and starts serving.
pub async fn start(config: Config) -> Result<ServerHandle, ControlPlaneError> {
    config.validate()?;

    let listener = shared::http::bind(&config.listener.host, config.listener.port).await?;
    let admin_listener =
        shared::http::bind(&config.admin_listener.host, config.admin_listener.port).await?;

    start_with_listeners(&config, listener, admin_listener)
}

/// Starts serving on listeners the caller already bound. The listener
/// settings of `config` are not used.
///
/// Must be called from within a tokio runtime.
pub fn start_with_listeners(
    config: &Config,
    listener: TcpListener,
    admin_listener: TcpListener,
) -> Result<ServerHandle, ControlPlaneError> {
    let local_addr = listener.local_addr()?;
    let admin_addr = admin_listener.local_addr()?;

    let stickiness = Arc::new(StickinessCache::new());
    let resolver = GroupResolver::new(stickiness.clone(), &config.groups.priority.name);
    let snapshots = Arc::new(SnapshotCache::new(resolver));

    for group in Group::ALL {
        let group_config = config.groups.get(group);
        snapshots.set_snapshot(
            group,
            build_snapshot(&group_config.name, group_config.backend, &config.domain),
        )?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let discovery = CallOutcome::new(ConnectionLifecycle::new(
        DiscoveryService::new(snapshots.clone(), config.poll_timeout(), shutdown_rx.clone()),
        stickiness,
    ));
    let discovery_task = tokio::spawn(shared::http::serve(
        listener,
        discovery,
        shutdown_rx.clone(),
        config.shutdown_timeout(),
    ));

    let ready_snapshots = snapshots.clone();
    let admin = AdminService::<_, ControlPlaneError>::new(move || {
        ready_snapshots.is_ready(&Group::ALL)
    });
    let admin_task = tokio::spawn(shared::http::serve(
        admin_listener,
        admin,
        shutdown_rx,
        config.shutdown_timeout(),
    ));

    tracing::info!(
        %local_addr,
        %admin_addr,
        groups = ?snapshots.groups(),
        "Control plane listening"
    );

    Ok(ServerHandle {
        local_addr,
        admin_addr,
        snapshots,
        shutdown_tx,
        discovery_task,
        admin_task,
    })
}

/// Serves until ctrl-c, then shuts down gracefully.
pub async fn run(config: Config) -> Result<(), ControlPlaneError> {
    let handle = start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    handle.shutdown();

    handle.wait().await
}
