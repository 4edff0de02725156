pub mod aws;
pub mod checks;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod webhooks;

pub use config::OperatorConfig;
pub use controller::{Context, Error, Result, error_policy, reconcile};
pub use crd::DBUpgrade;
pub use webhooks::{WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, run_webhook_server};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};

use crate::health::HealthState;

/// Run the operator controller
///
/// This is the main controller loop that watches DBUpgrade resources and
/// reconciles them. It can be called from main.rs or spawned as a
/// background task during integration tests.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    tracing::info!("Starting controller for DBUpgrade resources");

    let ctx = Arc::new(Context::new(client.clone(), config, health_state));

    // Set up APIs for the controller
    let upgrades: Api<DBUpgrade> = Api::all(client.clone());
    let jobs: Api<Job> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client);

    // Configure watcher to handle dynamic resource creation
    let watcher_config = WatcherConfig::default().any_semantic();

    // Watch DBUpgrade and all owned resources to trigger reconciliation
    Controller::new(upgrades, watcher_config.clone())
        .owns(jobs, watcher_config.clone())
        .owns(secrets, watcher_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    tracing::error!("Reconciliation error: {:?}", e);
                }
            }
        })
        .await;

    // This should never complete in normal operation
    tracing::error!("Controller stream ended unexpectedly");
}
