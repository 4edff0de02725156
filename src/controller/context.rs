//! Shared context for the DBUpgrade controller.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::aws::AwsClientManager;
use crate::config::OperatorConfig;
use crate::crd::DBUpgrade;
use crate::health::{HealthState, InFlightGuard};
use crate::resources::common::FIELD_MANAGER;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator configuration loaded at startup
    pub config: OperatorConfig,
    /// Shared AWS client state (config loaded once, HTTP pool reused)
    pub aws: Arc<AwsClientManager>,
    /// Event reporter identity
    reporter: Reporter,
    /// Health state for metrics (optional for tests)
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context with the given Kubernetes client
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let aws = Arc::new(AwsClientManager::new(config.aws_region_default.clone()));
        Self {
            client,
            config,
            aws,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
        }
    }

    /// Count the current tick as in flight until the returned guard drops;
    /// shutdown drains on this count before releasing leadership
    pub fn track_reconcile(&self) -> Option<InFlightGuard> {
        self.health_state.as_ref().map(HealthState::track_reconcile)
    }

    /// Record a successful reconciliation in metrics
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        if let Some(ref state) = self.health_state {
            state
                .metrics
                .record_reconcile(namespace, name, duration_secs);
        }
    }

    /// Record a failed reconciliation in metrics
    pub fn record_error(&self, namespace: &str, name: &str) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_error(namespace, name);
        }
    }

    /// Create an event recorder
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish an event for a DBUpgrade
    pub async fn publish_event(
        &self,
        upgrade: &DBUpgrade,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = upgrade.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!("Failed to publish event: {}", e);
        }
    }
}
