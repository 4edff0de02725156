//! Fingerprint change-detection tests

use dbupgrade_operator::controller::spec_fingerprint;

use crate::common::self_hosted_upgrade;

#[test]
fn same_spec_same_fingerprint() {
    let a = self_hosted_upgrade("orders", "customer/migr:v1");
    let b = self_hosted_upgrade("orders", "customer/migr:v1");
    assert_eq!(spec_fingerprint(&a.spec), spec_fingerprint(&b.spec));
}

#[test]
fn every_mutable_field_edit_changes_fingerprint() {
    let base = self_hosted_upgrade("orders", "customer/migr:v1");
    let base_fingerprint = spec_fingerprint(&base.spec);

    let mut image_edit = base.clone();
    image_edit.spec.migrations.image = "customer/migr:v2".to_string();

    let mut dir_edit = base.clone();
    dir_edit.spec.migrations.dir = "/db/migrations".to_string();

    let mut runner_edit = base.clone();
    runner_edit.spec.runner = Some(dbupgrade_operator::crd::RunnerSpec {
        active_deadline_seconds: Some(1200),
    });

    let mut checks_edit = base.clone();
    checks_edit.spec.checks = serde_json::from_value(serde_json::json!({
        "pre": {
            "minPodVersions": [
                {"selector": {"matchLabels": {"app": "svc"}}, "minVersion": "1.25.0"}
            ]
        }
    }))
    .ok();

    for edited in [&image_edit, &dir_edit, &runner_edit, &checks_edit] {
        assert_ne!(
            base_fingerprint,
            spec_fingerprint(&edited.spec),
            "edit must change the fingerprint"
        );
    }
}

#[test]
fn fingerprint_is_eight_hex_chars() {
    let upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    let fingerprint = spec_fingerprint(&upgrade.spec);
    assert_eq!(fingerprint.len(), 8);
    assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn distinct_specs_distinct_job_names() {
    use dbupgrade_operator::resources::job::job_name;

    let v1 = self_hosted_upgrade("orders", "customer/migr:v1");
    let mut v2 = v1.clone();
    v2.spec.migrations.image = "customer/migr:v2".to_string();

    let name_v1 = job_name("orders", &spec_fingerprint(&v1.spec));
    let name_v2 = job_name("orders", &spec_fingerprint(&v2.spec));
    assert_ne!(name_v1, name_v2);
    assert!(name_v1.starts_with("dbupgrade-orders-"));
}
