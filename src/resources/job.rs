//! Two-stage migration Job builder.
//!
//! Stage one exports the user's migration image filesystem with crane and
//! extracts only the migrations directory into a shared scratch volume; the
//! user's image is never executed and needs no shell. Stage two runs the
//! Atlas CLI against the extracted directory, with the database URL
//! env-expanded from the operator-managed connection Secret.
//!
//! The Job name embeds the spec fingerprint, which is how the reconciler
//! detects that an existing Job belongs to a stale spec.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    SecretKeySelector, Volume, VolumeMount,
};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::config::OperatorConfig;
use crate::crd::DBUpgrade;
use crate::resources::common::{owner_reference, standard_labels};
use crate::resources::secret::CONNECTION_SECRET_KEY;

/// Default Job deadline when the spec leaves `runner` unset.
pub const DEFAULT_ACTIVE_DEADLINE_SECONDS: i64 = 600;

/// Migration Job name for a DBUpgrade at a given spec fingerprint.
pub fn job_name(upgrade_name: &str, fingerprint: &str) -> String {
    format!("dbupgrade-{}-{}", upgrade_name, fingerprint)
}

/// Shell pipeline for the fetch stage: export the image tree for the node's
/// architecture and extract only the migrations subtree.
fn fetch_command(image: &str, migrations_dir: &str, allow_insecure: bool) -> String {
    let insecure_flag = if allow_insecure { "--insecure " } else { "" };
    format!(
        "crane export {}--platform linux/$(uname -m | sed 's/x86_64/amd64/' | sed 's/aarch64/arm64/') {} - | tar -xf - -C /shared {}",
        insecure_flag,
        image,
        migrations_dir.trim_start_matches('/')
    )
}

/// Build the migration Job for the current spec.
pub fn build_migration_job(
    upgrade: &DBUpgrade,
    secret_name: &str,
    fingerprint: &str,
    config: &OperatorConfig,
) -> Job {
    let name = job_name(&upgrade.name_any(), fingerprint);
    let migrations_dir = &upgrade.spec.migrations.dir;

    let active_deadline_seconds = upgrade
        .spec
        .runner
        .as_ref()
        .and_then(|r| r.active_deadline_seconds)
        .unwrap_or(DEFAULT_ACTIVE_DEADLINE_SECONDS);

    Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: upgrade.namespace(),
            labels: Some(standard_labels(&upgrade.name_any())),
            owner_references: Some(vec![owner_reference(upgrade)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(active_deadline_seconds),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    volumes: Some(vec![Volume {
                        name: "migrations".to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    init_containers: Some(vec![Container {
                        name: "fetch-migrations".to_string(),
                        image: Some(config.crane_image.clone()),
                        command: Some(vec!["sh".to_string(), "-c".to_string()]),
                        args: Some(vec![fetch_command(
                            &upgrade.spec.migrations.image,
                            migrations_dir,
                            config.allow_insecure_registries,
                        )]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "migrations".to_string(),
                            mount_path: "/shared".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }]),
                    containers: vec![Container {
                        name: "migrate".to_string(),
                        image: Some(config.atlas_image.clone()),
                        command: Some(vec![
                            "/atlas".to_string(),
                            "migrate".to_string(),
                            "apply".to_string(),
                        ]),
                        args: Some(vec![
                            "--dir".to_string(),
                            format!("file:///migrations{}", migrations_dir),
                            "--url".to_string(),
                            "$(DATABASE_URL)".to_string(),
                        ]),
                        env: Some(vec![EnvVar {
                            name: "DATABASE_URL".to_string(),
                            value_from: Some(EnvVarSource {
                                secret_key_ref: Some(SecretKeySelector {
                                    name: secret_name.to_string(),
                                    key: CONNECTION_SECRET_KEY.to_string(),
                                    optional: None,
                                }),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "migrations".to_string(),
                            mount_path: "/migrations".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}
