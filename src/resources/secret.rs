//! Operator-managed connection Secret.
//!
//! The migration Job reads its database URL from a Secret the operator
//! owns, decoupling the Job from the user's secret layout and from cloud
//! token lifecycle. The Secret holds a single `url` key and is garbage
//! collected with its DBUpgrade.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams};
use kube::core::ObjectMeta;
use kube::{Api, Client, ResourceExt};
use tracing::info;

use crate::controller::error::Result;
use crate::crd::DBUpgrade;
use crate::resources::common::owner_reference;

/// Key inside the connection Secret holding the database URL.
pub const CONNECTION_SECRET_KEY: &str = "url";

/// Name of the operator-managed connection Secret for a DBUpgrade.
pub fn connection_secret_name(upgrade_name: &str) -> String {
    format!("dbupgrade-{}-connection", upgrade_name)
}

/// Build the connection Secret object.
pub fn build_connection_secret(upgrade: &DBUpgrade, connection_url: Vec<u8>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(connection_secret_name(&upgrade.name_any())),
            namespace: upgrade.namespace(),
            owner_references: Some(vec![owner_reference(upgrade)]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(
            CONNECTION_SECRET_KEY.to_string(),
            ByteString(connection_url),
        )])),
        ..Default::default()
    }
}

/// Create or refresh the connection Secret with the resolved URL.
///
/// When `always_write` is false (static URLs) a write is only issued if the
/// stored bytes differ; cloud tokens pass `always_write` because they may
/// have expired since the last reconcile.
pub async fn ensure_connection_secret(
    client: &Client,
    upgrade: &DBUpgrade,
    connection_url: Vec<u8>,
    always_write: bool,
) -> Result<Secret> {
    let namespace = upgrade.namespace().unwrap_or_default();
    let secret_name = connection_secret_name(&upgrade.name_any());
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);

    if let Some(existing) = secrets.get_opt(&secret_name).await? {
        let stored = existing
            .data
            .as_ref()
            .and_then(|d| d.get(CONNECTION_SECRET_KEY))
            .map(|b| b.0.as_slice());

        if !always_write && stored == Some(connection_url.as_slice()) {
            return Ok(existing);
        }

        let patch = Secret {
            data: Some(BTreeMap::from([(
                CONNECTION_SECRET_KEY.to_string(),
                ByteString(connection_url),
            )])),
            ..Default::default()
        };
        let updated = secrets
            .patch(&secret_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(secret = %secret_name, "Updated connection secret");
        return Ok(updated);
    }

    let secret = build_connection_secret(upgrade, connection_url);
    let created = secrets.create(&Default::default(), &secret).await?;
    info!(secret = %secret_name, "Created connection secret");
    Ok(created)
}
