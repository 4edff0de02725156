use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use dbupgrade_operator::config::OperatorConfig;
use dbupgrade_operator::health::{HealthState, run_health_server};
use dbupgrade_operator::run_controller;
use dbupgrade_operator::{WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, run_webhook_server};

const LEASE_NAME: &str = "dbupgrade-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// How long shutdown waits for reconcile ticks that are mid-flight. A tick
/// is one status write plus at most one event, so this only needs to cover
/// a few API round trips. Migrations themselves run in Jobs that the
/// cluster keeps driving whether or not an operator is up, and a tick cut
/// off here is simply re-derived by the next leader.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    install_crypto_provider()?;
    init_tracing();

    info!("Starting dbupgrade-operator");
    let config = OperatorConfig::from_env();

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let health_state = Arc::new(HealthState::new());
    // The up gauge stays 1 for the life of the process; its absence in a
    // scrape is the primary dead-operator signal.
    health_state.metrics.set_operator_up();

    // Probes must answer before leadership is settled, so standbys report
    // alive-but-not-ready.
    let health_server = {
        let state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(state).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Admission runs on every replica; spec edits must be gated even while
    // this replica is a standby.
    let webhook_server = spawn_webhook_server(&config);

    let identity = OperatorIdentity::from_env();
    let lease = identity.lease_lock(client.clone());
    campaign_for_lease(&lease, &identity).await;

    // The renewal watchdog reports loss instead of killing the process, so
    // the exit path below can still drain in-flight ticks first.
    let (lost_tx, lost_rx) = oneshot::channel();
    tokio::spawn(renew_lease(lease, lost_tx));

    info!("Watching DBUpgrade resources (apiVersion: dbupgrade.example/v1alpha1)");
    let controller = {
        let state = health_state.clone();
        tokio::spawn(run_controller(client, config, Some(state)))
    };

    health_state.set_ready(true);

    let exit_code = tokio::select! {
        _ = controller => {
            error!("Controller stream ended unexpectedly");
            1
        }
        _ = health_server => {
            error!("Health server ended unexpectedly");
            1
        }
        _ = join_optional(webhook_server) => {
            error!("Webhook server ended unexpectedly");
            1
        }
        _ = lost_rx => {
            // Another replica may be taking over; stop writing status as
            // soon as the in-flight ticks allow.
            error!("Leadership lost, shutting down");
            1
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            0
        }
    };

    drain_in_flight(&health_state).await;
    info!("Operator stopped");

    if exit_code != 0 {
        // Let Kubernetes restart us into a fresh leader campaign.
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Identity this replica campaigns for the operator lease with.
struct OperatorIdentity {
    holder_id: String,
    namespace: String,
}

impl OperatorIdentity {
    fn from_env() -> Self {
        let holder_id = match std::env::var("POD_NAME") {
            Ok(name) => name,
            Err(_) => hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "dbupgrade-operator".to_string()),
        };
        let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
            warn!("POD_NAMESPACE not set; placing the leader lease in 'default'");
            "default".to_string()
        });
        Self {
            holder_id,
            namespace,
        }
    }

    fn lease_lock(&self, client: Client) -> LeaseLock {
        LeaseLock::new(
            client,
            &self.namespace,
            LeaseLockParams {
                holder_id: self.holder_id.clone(),
                lease_name: LEASE_NAME.to_string(),
                lease_ttl: LEASE_TTL,
            },
        )
    }
}

/// Both the kube client and the webhook server need TLS; register a crypto
/// provider before either starts.
fn install_crypto_provider() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::CryptoProvider::get_default().is_some() {
        return Ok(());
    }
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| "no rustls crypto provider available".into())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,dbupgrade_operator=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Start the admission server unless it is disabled or has no TLS material.
fn spawn_webhook_server(config: &OperatorConfig) -> Option<tokio::task::JoinHandle<()>> {
    if config.disable_admission {
        info!("Admission disabled via DISABLE_ADMISSION; spec edits are guarded only at reconcile time");
        return None;
    }

    if !Path::new(WEBHOOK_CERT_PATH).exists() || !Path::new(WEBHOOK_KEY_PATH).exists() {
        info!(
            "No webhook TLS material at {} / {}; admission server not started",
            WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH
        );
        return None;
    }

    Some(tokio::spawn(async {
        if let Err(e) = run_webhook_server(WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH).await {
            error!("Webhook server error: {}", e);
        }
    }))
}

/// Block until this replica holds the operator lease.
async fn campaign_for_lease(lease: &LeaseLock, identity: &OperatorIdentity) {
    info!(
        holder_id = %identity.holder_id,
        namespace = %identity.namespace,
        lease = LEASE_NAME,
        "Campaigning for the operator lease"
    );

    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("This replica is now the active operator");
                return;
            }
            Ok(_) => info!("Lease held by another replica; standing by"),
            Err(e) => warn!("Lease campaign attempt failed: {}", e),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Keep the lease renewed; report on the channel the first time renewal
/// fails or the lease lands with another holder.
async fn renew_lease(lease: LeaseLock, lost: oneshot::Sender<()>) {
    let mut ticker = tokio::time::interval(LEASE_RENEW_INTERVAL);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let still_leading = match lease.try_acquire_or_renew().await {
            Ok(result) => result.acquired_lease,
            Err(e) => {
                warn!("Lease renewal failed: {}", e);
                false
            }
        };

        if !still_leading {
            let _ = lost.send(());
            return;
        }
    }
}

/// Flip readiness off and wait for mid-flight reconcile ticks to finish
/// their status write. Anything still running at the deadline is abandoned;
/// the next leader re-derives its outcome from the store.
async fn drain_in_flight(health_state: &HealthState) {
    health_state.set_ready(false);

    let deadline = tokio::time::Instant::now() + DRAIN_DEADLINE;
    loop {
        let in_flight = health_state.reconciles_in_flight();
        if in_flight == 0 {
            info!("All in-flight reconciles finished");
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(in_flight, "Drain deadline reached with reconciles still running");
            return;
        }
        info!(in_flight, "Waiting for in-flight reconciles to finish");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Await a task that may not have been started.
async fn join_optional(handle: Option<tokio::task::JoinHandle<()>>) {
    match handle {
        Some(handle) => {
            let _ = handle.await;
        }
        None => std::future::pending().await,
    }
}

/// Resolves on SIGTERM (kubelet-initiated) or Ctrl+C (local runs).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            result = tokio::signal::ctrl_c() => {
                result.expect("Ctrl+C handler");
            }
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.expect("Ctrl+C handler");
}
