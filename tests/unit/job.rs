//! Migration Job generation and classification tests

use dbupgrade_operator::config::OperatorConfig;
use dbupgrade_operator::controller::{JobState, classify_job, spec_fingerprint};
use dbupgrade_operator::resources::job::{build_migration_job, job_name};
use dbupgrade_operator::resources::secret::{build_connection_secret, connection_secret_name};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};

use crate::common::self_hosted_upgrade;

#[test]
fn happy_path_artifacts_have_derived_names() {
    // Scenario: record "orders" with a self-hosted target produces a
    // connection secret and a fingerprint-suffixed Job.
    let upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    let fingerprint = spec_fingerprint(&upgrade.spec);
    let config = OperatorConfig::default();

    let secret = build_connection_secret(&upgrade, b"postgres://u:p@h:5432/app".to_vec());
    assert_eq!(
        secret.metadata.name.as_deref(),
        Some("dbupgrade-orders-connection")
    );

    let job = build_migration_job(
        &upgrade,
        &connection_secret_name("orders"),
        &fingerprint,
        &config,
    );
    assert_eq!(
        job.metadata.name.as_deref(),
        Some(job_name("orders", &fingerprint).as_str())
    );
}

#[test]
fn job_is_one_shot_with_deadline() {
    let upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    let config = OperatorConfig::default();
    let job = build_migration_job(&upgrade, "s", "ab12cd34", &config);

    let spec = job.spec.unwrap();
    assert_eq!(spec.backoff_limit, Some(0));
    assert_eq!(spec.active_deadline_seconds, Some(600));
    assert_eq!(
        spec.template.spec.unwrap().restart_policy.as_deref(),
        Some("Never")
    );
}

#[test]
fn both_stages_mount_the_scratch_volume() {
    let upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    let config = OperatorConfig::default();
    let job = build_migration_job(&upgrade, "s", "ab12cd34", &config);

    let pod_spec = job.spec.unwrap().template.spec.unwrap();
    let fetch = &pod_spec.init_containers.as_ref().unwrap()[0];
    let apply = &pod_spec.containers[0];

    assert_eq!(fetch.volume_mounts.as_ref().unwrap()[0].name, "migrations");
    assert_eq!(fetch.volume_mounts.as_ref().unwrap()[0].mount_path, "/shared");
    assert_eq!(apply.volume_mounts.as_ref().unwrap()[0].mount_path, "/migrations");
}

#[test]
fn fetch_stage_respects_env_overrides() {
    let upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    let config = OperatorConfig {
        crane_image: "registry.local/crane:debug".to_string(),
        allow_insecure_registries: true,
        ..Default::default()
    };
    let job = build_migration_job(&upgrade, "s", "ab12cd34", &config);

    let pod_spec = job.spec.unwrap().template.spec.unwrap();
    let fetch = &pod_spec.init_containers.as_ref().unwrap()[0];
    assert_eq!(fetch.image.as_deref(), Some("registry.local/crane:debug"));
    assert!(fetch.args.as_ref().unwrap()[0].contains("--insecure"));
}

fn job_with(conditions: Vec<JobCondition>, active: Option<i32>) -> Job {
    Job {
        metadata: Default::default(),
        spec: None,
        status: Some(JobStatus {
            conditions: Some(conditions),
            active,
            ..Default::default()
        }),
    }
}

fn true_condition(type_: &str, reason: Option<&str>) -> JobCondition {
    JobCondition {
        type_: type_.to_string(),
        status: "True".to_string(),
        reason: reason.map(String::from),
        ..Default::default()
    }
}

#[test]
fn classification_covers_the_variant_set() {
    assert_eq!(classify_job(None), JobState::Absent);
    assert_eq!(
        classify_job(Some(&job_with(vec![], None))),
        JobState::Pending
    );
    assert_eq!(
        classify_job(Some(&job_with(vec![], Some(1)))),
        JobState::Live
    );
    assert_eq!(
        classify_job(Some(&job_with(vec![true_condition("Complete", None)], None))),
        JobState::Succeeded
    );
    assert_eq!(
        classify_job(Some(&job_with(
            vec![true_condition("Failed", Some("BackoffLimitExceeded"))],
            None
        ))),
        JobState::Failed
    );
    assert_eq!(
        classify_job(Some(&job_with(
            vec![true_condition("Failed", Some("DeadlineExceeded"))],
            None
        ))),
        JobState::Expired
    );
}
