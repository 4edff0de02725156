//! Probe endpoints, Prometheus metrics, and in-flight reconcile tracking.
//!
//! Serves `/healthz`, `/readyz`, and `/metrics` on the health port. The
//! `dbupgrade_operator_up` gauge is set to 1 once at startup; a scrape
//! without it means the process is dead, which is the primary availability
//! signal.
//!
//! `HealthState` also counts reconcile ticks currently in flight. A tick is
//! one status write plus at most one event, so shutdown can afford to wait
//! for the count to reach zero before releasing leadership; migrations
//! themselves run in Jobs and do not depend on the operator staying up.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;

/// Port the probe and metrics routes are served on.
pub const HEALTH_PORT: u16 = 8080;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Labels for per-record reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl prometheus_client::encoding::EncodeLabelSet for ReconcileLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder<'_>,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state
pub struct Metrics {
    /// Process liveness gauge; 1 for the lifetime of the process
    pub up: Gauge,
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,

    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let up = Gauge::default();
        registry.register(
            "dbupgrade_operator_up",
            "Indicates if the DBUpgrade operator is running (always 1 when the process is alive)",
            up.clone(),
        );

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "dbupgrade_operator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "dbupgrade_operator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "dbupgrade_operator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        Self {
            up,
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            registry,
        }
    }

    /// Mark the operator process as up. Called once at startup.
    pub fn set_operator_up(&self) {
        self.up.set(1);
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    /// Encode the registry to Prometheus text format.
    fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

/// Readiness flag, in-flight reconcile count, and the metrics registry.
pub struct HealthState {
    /// True once this replica leads and its watches are running (and, when
    /// admission is enabled, the webhook is serving)
    ready: AtomicBool,
    /// Reconcile ticks currently between start and their final status write
    in_flight: AtomicUsize,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            metrics: Metrics::new(),
        }
    }

    /// Flip the readiness flag.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Count a reconcile tick as in flight until the returned guard drops.
    pub fn track_reconcile(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            state: self.clone(),
        }
    }

    /// Number of reconcile ticks currently running.
    pub fn reconciles_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Releases an in-flight reconcile slot on drop, including early returns
/// from a failed status write.
pub struct InFlightGuard {
    state: Arc<HealthState>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Liveness: answering at all is the signal.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness: 200 once leading and serving, 503 otherwise.
async fn readiness(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus scrape endpoint.
async fn scrape(State(state): State<Arc<HealthState>>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Probe and metrics routes.
pub fn probe_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(scrape))
        .with_state(state)
}

/// Serve probes and metrics on the health port.
pub async fn run_health_server(state: Arc<HealthState>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], HEALTH_PORT));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Serving health probes and metrics");
    axum::serve(listener, probe_router(state)).await
}
