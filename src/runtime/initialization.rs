//! # Initialization
//!
//! Process startup: rustls crypto provider, tracing, metrics, the probe server,
//! the Kubernetes client and the shared reconciler context.

use crate::config::{OperatorConfig, ServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::{ControlPlane, DataPlane, KonnectExtension};
use crate::observability;
use anyhow::{anyhow, Context, Result};
use kube::api::{Api, ListParams};
use kube::{Client, Resource};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Everything `main` needs to run the controllers
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    /// Shared with the probe server
    pub server_state: Arc<ServerState>,
    pub otel_tracer_provider: observability::otel::TracerProviderHandle,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("reconciler", &self.reconciler)
            .field("server_state", &self.server_state)
            .finish_non_exhaustive()
    }
}

/// Initialize the operator runtime
///
/// The probe server is bound before the Kubernetes client is created so
/// liveness checks pass while the API server is still being reached.
pub async fn initialize(config: OperatorConfig) -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err(anyhow!("Failed to install rustls crypto provider"));
    }

    let otel_tracer_provider =
        observability::otel::init_otel().context("Failed to initialize tracing")?;

    info!(
        "Starting Kong gateway operator v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        webhook = config.admission_webhook_enabled,
        validate_images = config.validate_images,
        ca_secret = %format!("{}/{}", config.cluster_ca_secret_namespace, config.cluster_ca_secret),
        "Operator configuration loaded"
    );

    observability::metrics::register_metrics()?;

    let server_config = ServerConfig::from_env();
    let server_state = Arc::new(ServerState::default());
    let server_handle = {
        let state = Arc::clone(&server_state);
        let port = server_config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state).await {
                error!("HTTP server error: {e}");
            }
        })
    };
    wait_for_server_ready(&server_config, &server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let reconciler = Arc::new(Reconciler::new(client.clone(), Arc::new(config)));

    log_existing_resources(&client).await;

    info!("Operator initialized, starting controllers");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        otel_tracer_provider,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    config: &ServerConfig,
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = config.ready_timeout;
    let poll_interval = config.ready_poll_interval;
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Log how many parents of each kind already exist.
///
/// Existing parents are reconciled by the controllers' initial list; this only
/// surfaces missing CRDs early.
async fn log_existing_resources(client: &Client) {
    count_by_namespace(Api::<ControlPlane>::all(client.clone())).await;
    count_by_namespace(Api::<DataPlane>::all(client.clone())).await;
    count_by_namespace(Api::<KonnectExtension>::all(client.clone())).await;
}

async fn count_by_namespace<K>(api: Api<K>)
where
    K: Resource<DynamicType = ()> + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let kind = K::kind(&());
    match api.list(&ListParams::default()).await {
        Ok(list) => {
            let mut per_namespace: BTreeMap<String, usize> = BTreeMap::new();
            for item in &list.items {
                let namespace = item.meta().namespace.clone().unwrap_or_default();
                *per_namespace.entry(namespace).or_default() += 1;
            }
            if per_namespace.is_empty() {
                info!("No existing {kind} resources found");
            }
            for (namespace, count) in per_namespace {
                info!(%namespace, count, "Found existing {kind} resources");
            }
        }
        Err(e) => {
            error!("{kind} is not queryable: {e}. Is the CRD installed?");
            warn!("Continuing; the {kind} controller will retry");
        }
    }
}
