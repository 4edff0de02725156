//! Database configuration policies
//!
//! Cross-field rules the CRD schema alone cannot express: each database
//! type requires its matching credential configuration, and the AWS bundle
//! must be complete when present.
//!
//! Secret existence is deliberately not checked here; that would add
//! admission latency and Secret RBAC to the webhook. The controller
//! validates the secret and reports through conditions.

use std::sync::LazyLock;

use regex::Regex;

use super::{ValidationContext, ValidationResult};
use crate::crd::DatabaseType;

static ROLE_ARN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws:iam::\d{12}:role/[\w+=,.@-]+$").expect("role arn pattern compiles")
});

/// Validate the database configuration.
pub fn validate_database(ctx: &ValidationContext) -> ValidationResult {
    let database = &ctx.upgrade.spec.database;
    let has_aws = database.aws.is_some();
    let has_connection = database.connection.is_some();

    match database.type_ {
        DatabaseType::AwsRds | DatabaseType::AwsAurora => {
            if !has_aws && !has_connection {
                return ValidationResult::denied(
                    "MissingCredentialSource",
                    &format!(
                        "database.type={} requires either aws or connection to be set",
                        database.type_
                    ),
                );
            }

            if let Some(aws) = &database.aws {
                if !ROLE_ARN_PATTERN.is_match(&aws.role_arn) {
                    return ValidationResult::denied(
                        "InvalidRoleArn",
                        &format!("database.aws.roleArn {:?} is not a valid IAM role ARN", aws.role_arn),
                    );
                }
                if aws.region.is_empty() {
                    return ValidationResult::denied(
                        "MissingAwsField",
                        "database.aws.region is required when aws is specified",
                    );
                }
                if aws.host.is_empty() {
                    return ValidationResult::denied(
                        "MissingAwsField",
                        "database.aws.host is required when aws is specified",
                    );
                }
                if aws.db_name.is_empty() {
                    return ValidationResult::denied(
                        "MissingAwsField",
                        "database.aws.dbName is required when aws is specified",
                    );
                }
                if aws.username.is_empty() {
                    return ValidationResult::denied(
                        "MissingAwsField",
                        "database.aws.username is required when aws is specified",
                    );
                }
            }
        }

        DatabaseType::SelfHosted => {
            if !has_connection {
                return ValidationResult::denied(
                    "MissingConnection",
                    "database.type=selfHosted requires connection to be set",
                );
            }
            if has_aws {
                return ValidationResult::denied(
                    "UnexpectedAwsConfig",
                    "database.aws should not be set for selfHosted type",
                );
            }
        }
    }

    if let Some(connection) = &database.connection {
        let Some(secret_ref) = &connection.url_secret_ref else {
            return ValidationResult::denied(
                "MissingSecretRef",
                "database.connection.urlSecretRef is required when connection is specified",
            );
        };
        if secret_ref.name.is_empty() {
            return ValidationResult::denied(
                "MissingSecretRef",
                "database.connection.urlSecretRef.name cannot be empty",
            );
        }
        if secret_ref.key.is_empty() {
            return ValidationResult::denied(
                "MissingSecretRef",
                "database.connection.urlSecretRef.key cannot be empty",
            );
        }
    }

    ValidationResult::allowed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DBUpgrade;

    fn upgrade_from(database: serde_json::Value) -> DBUpgrade {
        DBUpgrade::new(
            "test",
            serde_json::from_value(serde_json::json!({
                "migrations": {"image": "customer/migr:v1"},
                "database": database
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_self_hosted_valid() {
        let upgrade = upgrade_from(serde_json::json!({
            "type": "selfHosted",
            "connection": {"urlSecretRef": {"name": "db-secret", "key": "url"}}
        }));
        let ctx = ValidationContext::new(&upgrade, None);
        assert!(validate_database(&ctx).allowed);
    }

    #[test]
    fn test_self_hosted_missing_connection() {
        let upgrade = upgrade_from(serde_json::json!({"type": "selfHosted"}));
        let ctx = ValidationContext::new(&upgrade, None);
        let result = validate_database(&ctx);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("MissingConnection"));
    }

    #[test]
    fn test_self_hosted_with_aws_rejected() {
        let upgrade = upgrade_from(serde_json::json!({
            "type": "selfHosted",
            "connection": {"urlSecretRef": {"name": "db-secret", "key": "url"}},
            "aws": {
                "roleArn": "arn:aws:iam::123456789012:role/dbupgrade",
                "region": "us-east-1",
                "host": "db.example.com",
                "dbName": "app",
                "username": "migrator"
            }
        }));
        let ctx = ValidationContext::new(&upgrade, None);
        let result = validate_database(&ctx);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("UnexpectedAwsConfig"));
    }

    #[test]
    fn test_aws_requires_credential_source() {
        let upgrade = upgrade_from(serde_json::json!({"type": "awsRds"}));
        let ctx = ValidationContext::new(&upgrade, None);
        let result = validate_database(&ctx);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("MissingCredentialSource"));
    }

    #[test]
    fn test_aws_with_fallback_connection_allowed() {
        let upgrade = upgrade_from(serde_json::json!({
            "type": "awsAurora",
            "connection": {"urlSecretRef": {"name": "db-secret", "key": "url"}}
        }));
        let ctx = ValidationContext::new(&upgrade, None);
        assert!(validate_database(&ctx).allowed);
    }

    #[test]
    fn test_aws_bundle_valid() {
        let upgrade = upgrade_from(serde_json::json!({
            "type": "awsRds",
            "aws": {
                "roleArn": "arn:aws:iam::123456789012:role/dbupgrade",
                "region": "us-east-1",
                "host": "db.example.rds.amazonaws.com",
                "dbName": "app",
                "username": "migrator"
            }
        }));
        let ctx = ValidationContext::new(&upgrade, None);
        assert!(validate_database(&ctx).allowed);
    }

    #[test]
    fn test_aws_invalid_role_arn() {
        let upgrade = upgrade_from(serde_json::json!({
            "type": "awsRds",
            "aws": {
                "roleArn": "arn:aws:iam::12:role/short-account",
                "region": "us-east-1",
                "host": "db.example.rds.amazonaws.com",
                "dbName": "app",
                "username": "migrator"
            }
        }));
        let ctx = ValidationContext::new(&upgrade, None);
        let result = validate_database(&ctx);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("InvalidRoleArn"));
    }

    #[test]
    fn test_aws_empty_region_rejected() {
        let upgrade = upgrade_from(serde_json::json!({
            "type": "awsRds",
            "aws": {
                "roleArn": "arn:aws:iam::123456789012:role/dbupgrade",
                "region": "",
                "host": "db.example.rds.amazonaws.com",
                "dbName": "app",
                "username": "migrator"
            }
        }));
        let ctx = ValidationContext::new(&upgrade, None);
        let result = validate_database(&ctx);
        assert!(!result.allowed);
        assert!(result.message.unwrap().contains("region"));
    }

    #[test]
    fn test_empty_secret_ref_fields_rejected() {
        let upgrade = upgrade_from(serde_json::json!({
            "type": "selfHosted",
            "connection": {"urlSecretRef": {"name": "", "key": "url"}}
        }));
        let ctx = ValidationContext::new(&upgrade, None);
        let result = validate_database(&ctx);
        assert!(!result.allowed);
        assert!(result.message.unwrap().contains("name cannot be empty"));
    }
}
