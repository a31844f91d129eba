//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Default port of the health server.
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Labels identifying one NsxUpgradeRun
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RunLabels {
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for RunLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for phase-based metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PhaseLabels {
    pub phase: String,
}

impl EncodeLabelSet for PhaseLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("phase", self.phase.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-component metrics of a run
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ComponentLabels {
    pub namespace: String,
    pub name: String,
    pub component: String,
}

impl EncodeLabelSet for ComponentLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("component", self.component.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<RunLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<RunLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<RunLabels, Histogram>,
    /// Finished upgrade runs by resulting phase
    pub runs_total: Family<PhaseLabels, Counter>,
    /// Wall-clock duration of upgrade runs
    pub run_duration_seconds: Family<RunLabels, Histogram>,
    /// 1 when a component reports SUCCESS, 0 otherwise
    pub component_upgraded: Family<ComponentLabels, Gauge>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<RunLabels, Counter>::default();
        registry.register(
            "nsx_upgrade_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<RunLabels, Counter>::default();
        registry.register(
            "nsx_upgrade_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<RunLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "nsx_upgrade_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let runs_total = Family::<PhaseLabels, Counter>::default();
        registry.register(
            "nsx_upgrade_runs",
            "Total number of finished upgrade runs by phase",
            runs_total.clone(),
        );

        // Runs last from minutes to many hours.
        let run_duration_seconds = Family::<RunLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(30.0, 2.0, 12))
        });
        registry.register(
            "nsx_upgrade_run_duration_seconds",
            "Duration of upgrade runs in seconds",
            run_duration_seconds.clone(),
        );

        let component_upgraded = Family::<ComponentLabels, Gauge>::default();
        registry.register(
            "nsx_upgrade_component_upgraded",
            "Whether the component reports SUCCESS",
            component_upgraded.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            runs_total,
            run_duration_seconds,
            component_upgraded,
            registry,
        }
    }

    fn run_labels(namespace: &str, name: &str) -> RunLabels {
        RunLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = Self::run_labels(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&Self::run_labels(namespace, name))
            .inc();
    }

    /// Record a finished upgrade run
    pub fn record_run(&self, namespace: &str, name: &str, phase: &str, duration_secs: f64) {
        self.runs_total
            .get_or_create(&PhaseLabels {
                phase: phase.to_string(),
            })
            .inc();
        self.run_duration_seconds
            .get_or_create(&Self::run_labels(namespace, name))
            .observe(duration_secs);
    }

    /// Update the upgraded flag of one component
    pub fn set_component_upgraded(&self, namespace: &str, name: &str, component: &str, done: bool) {
        let labels = ComponentLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
            component: component.to_string(),
        };
        self.component_upgraded
            .get_or_create(&labels)
            .set(i64::from(done));
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controller)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile timestamp (Unix epoch seconds)
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 until leadership is acquired and the controller runs.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:port`.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
