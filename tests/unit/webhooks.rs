//! Unit tests for admission webhook validation
//!
//! These tests use the public webhook API (ValidationContext and
//! validate_all) to verify policy enforcement from an external perspective.
//!
//! Note: Internal policy tests are in src/webhooks/policies/*.rs

use dbupgrade_operator::webhooks::policies::{ValidationContext, validate_all};

use crate::common::{aws_upgrade, progressing_status, self_hosted_upgrade};

#[test]
fn create_with_valid_self_hosted_spec_allowed() {
    let upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    let ctx = ValidationContext::new(&upgrade, None);
    assert!(validate_all(&ctx).allowed);
}

#[test]
fn create_with_valid_aws_spec_allowed() {
    let upgrade = aws_upgrade("orders");
    let ctx = ValidationContext::new(&upgrade, None);
    assert!(validate_all(&ctx).allowed);
}

#[test]
fn image_edit_while_running_is_rejected() {
    // After a tick that set Progressing=True, an image edit must bounce.
    let mut old = self_hosted_upgrade("orders", "customer/migr:v1");
    old.status = Some(progressing_status());
    let new = self_hosted_upgrade("orders", "customer/migr:v2");

    let ctx = ValidationContext::new(&new, Some(&old));
    let result = validate_all(&ctx);

    assert!(!result.allowed);
    assert!(
        result
            .message
            .unwrap()
            .contains("cannot update spec while migration is in progress")
    );
}

#[test]
fn status_only_update_while_running_is_allowed() {
    let mut old = self_hosted_upgrade("orders", "customer/migr:v1");
    old.status = Some(progressing_status());
    let mut new = self_hosted_upgrade("orders", "customer/migr:v1");
    new.status = None;

    let ctx = ValidationContext::new(&new, Some(&old));
    assert!(validate_all(&ctx).allowed);
}

#[test]
fn database_type_change_is_rejected_after_completion() {
    // Even with no migration in flight, the target kind can never change.
    let old = self_hosted_upgrade("orders", "customer/migr:v1");
    let new = aws_upgrade("orders");

    let ctx = ValidationContext::new(&new, Some(&old));
    let result = validate_all(&ctx);

    assert!(!result.allowed);
    assert!(result.message.unwrap().contains("database.type is immutable"));
}

#[test]
fn image_edit_when_idle_is_allowed() {
    let old = self_hosted_upgrade("orders", "customer/migr:v1");
    let new = self_hosted_upgrade("orders", "customer/migr:v2");

    let ctx = ValidationContext::new(&new, Some(&old));
    assert!(validate_all(&ctx).allowed);
}

#[test]
fn in_flight_guard_runs_before_field_validation() {
    // A spec that is both invalid and edited mid-flight reports the
    // in-flight rejection, not the field error.
    let mut old = self_hosted_upgrade("orders", "customer/migr:v1");
    old.status = Some(progressing_status());

    let mut new = self_hosted_upgrade("orders", "customer/migr:v2");
    new.spec.database.connection = None;

    let ctx = ValidationContext::new(&new, Some(&old));
    let result = validate_all(&ctx);
    assert!(!result.allowed);
    assert_eq!(result.reason.as_deref(), Some("MigrationInProgress"));
}

#[test]
fn create_with_missing_connection_rejected() {
    let mut upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    upgrade.spec.database.connection = None;

    let ctx = ValidationContext::new(&upgrade, None);
    let result = validate_all(&ctx);
    assert!(!result.allowed);
    assert!(result.message.unwrap().contains("requires connection"));
}

#[test]
fn create_with_invalid_check_rejected() {
    let mut upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    upgrade.spec.checks = serde_json::from_value(serde_json::json!({
        "pre": {
            "minPodVersions": [
                {"selector": {"matchLabels": {"app": "svc"}}, "minVersion": "one.two"}
            ]
        }
    }))
    .ok();

    let ctx = ValidationContext::new(&upgrade, None);
    let result = validate_all(&ctx);
    assert!(!result.allowed);
    assert_eq!(result.reason.as_deref(), Some("InvalidMinVersion"));
}
