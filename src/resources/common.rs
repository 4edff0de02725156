//! Common utilities for Kubernetes resource generation.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::DBUpgrade;

/// API version for the DBUpgrade CRD
pub const API_VERSION: &str = "dbupgrade.example/v1alpha1";

/// Kind for the DBUpgrade CRD
pub const KIND: &str = "DBUpgrade";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "dbupgrade-operator";

/// Generate an owner reference for a DBUpgrade.
///
/// Child resources carry this reference so they are garbage collected with
/// the DBUpgrade; `block_owner_deletion` keeps the parent pinned while a
/// child still exists.
pub fn owner_reference(upgrade: &DBUpgrade) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: upgrade.name_any(),
        uid: upgrade.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Standard labels for all resources belonging to a DBUpgrade.
pub fn standard_labels(upgrade_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/name".to_string(),
            upgrade_name.to_string(),
        ),
        (
            "app.kubernetes.io/component".to_string(),
            "db-migration".to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        (
            "dbupgrade.example/upgrade".to_string(),
            upgrade_name.to_string(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_labels() {
        let labels = standard_labels("orders");
        assert_eq!(
            labels.get("app.kubernetes.io/name"),
            Some(&"orders".to_string())
        );
        assert_eq!(
            labels.get("app.kubernetes.io/managed-by"),
            Some(&"dbupgrade-operator".to_string())
        );
        assert_eq!(
            labels.get("dbupgrade.example/upgrade"),
            Some(&"orders".to_string())
        );
    }
}
