//! Shared fixtures for unit tests

use dbupgrade_operator::crd::{Condition, DBUpgrade, DBUpgradeStatus, condition_types, reasons};

/// A minimal self-hosted DBUpgrade
pub fn self_hosted_upgrade(name: &str, image: &str) -> DBUpgrade {
    let mut upgrade = DBUpgrade::new(
        name,
        serde_json::from_value(serde_json::json!({
            "migrations": {"image": image},
            "database": {
                "type": "selfHosted",
                "connection": {"urlSecretRef": {"name": "db-secret", "key": "url"}}
            }
        }))
        .unwrap(),
    );
    upgrade.metadata.namespace = Some("default".to_string());
    upgrade.metadata.uid = Some("11111111-2222-3333-4444-555555555555".to_string());
    upgrade.metadata.generation = Some(1);
    upgrade
}

/// An AWS RDS DBUpgrade with a complete aws bundle
pub fn aws_upgrade(name: &str) -> DBUpgrade {
    let mut upgrade = DBUpgrade::new(
        name,
        serde_json::from_value(serde_json::json!({
            "migrations": {"image": "customer/migr:v1"},
            "database": {
                "type": "awsRds",
                "aws": {
                    "roleArn": "arn:aws:iam::123456789012:role/dbupgrade",
                    "region": "us-east-1",
                    "host": "mydb.123456789012.us-east-1.rds.amazonaws.com",
                    "dbName": "app",
                    "username": "migrator"
                }
            }
        }))
        .unwrap(),
    );
    upgrade.metadata.namespace = Some("default".to_string());
    upgrade.metadata.uid = Some("66666666-7777-8888-9999-000000000000".to_string());
    upgrade.metadata.generation = Some(1);
    upgrade
}

/// A status with Progressing=True, as a record with a live migration has
pub fn progressing_status() -> DBUpgradeStatus {
    DBUpgradeStatus {
        observed_generation: Some(1),
        job_completed_at: None,
        conditions: vec![
            Condition {
                type_: condition_types::READY.to_string(),
                status: "False".to_string(),
                reason: reasons::INITIALIZING.to_string(),
                message: "Migration in progress".to_string(),
                last_transition_time: "2024-01-01T00:00:00+00:00".to_string(),
                observed_generation: Some(1),
            },
            Condition {
                type_: condition_types::PROGRESSING.to_string(),
                status: "True".to_string(),
                reason: reasons::MIGRATION_IN_PROGRESS.to_string(),
                message: "Job is running".to_string(),
                last_transition_time: "2024-01-01T00:00:00+00:00".to_string(),
                observed_generation: Some(1),
            },
        ],
    }
}
