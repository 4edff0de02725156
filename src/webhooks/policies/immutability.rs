//! Immutability and in-flight edit policies
//!
//! - No spec edit is admitted while a migration is running
//! - `database.*` (type, connection reference, aws bundle) is immutable
//!
//! Mutable fields: migrations.image, migrations.dir, everything under
//! checks and runner.

use super::{ValidationContext, ValidationResult};

/// Reject spec changes while a migration is in progress.
///
/// Interrupting a running migration could leave the schema in a partial
/// state. Status-only and metadata-only updates pass through; the reconciler
/// carries the same guard for edits that race past admission.
pub fn validate_not_progressing(ctx: &ValidationContext) -> ValidationResult {
    let Some(old) = ctx.old_upgrade else {
        return ValidationResult::allowed();
    };

    if old.spec == ctx.upgrade.spec {
        return ValidationResult::allowed();
    }

    if old.is_progressing() {
        return ValidationResult::denied(
            "MigrationInProgress",
            "cannot update spec while migration is in progress (Progressing=True); wait for current migration to complete",
        );
    }

    ValidationResult::allowed()
}

/// Reject changes to immutable fields.
pub fn validate_immutability(ctx: &ValidationContext) -> ValidationResult {
    let Some(old) = ctx.old_upgrade else {
        return ValidationResult::allowed();
    };

    let old_db = &old.spec.database;
    let new_db = &ctx.upgrade.spec.database;

    if old_db.type_ != new_db.type_ {
        return ValidationResult::denied(
            "ImmutableField",
            &format!(
                "database.type is immutable (cannot change from {} to {})",
                old_db.type_, new_db.type_
            ),
        );
    }

    let old_ref = old_db.connection.as_ref().and_then(|c| c.url_secret_ref.as_ref());
    let new_ref = new_db.connection.as_ref().and_then(|c| c.url_secret_ref.as_ref());

    match (old_ref, new_ref) {
        (Some(old_ref), Some(new_ref)) => {
            if old_ref != new_ref {
                return ValidationResult::denied(
                    "ImmutableField",
                    &format!(
                        "database.connection.urlSecretRef is immutable (cannot change from {}/{} to {}/{})",
                        old_ref.name, old_ref.key, new_ref.name, new_ref.key
                    ),
                );
            }
        }
        (None, None) => {}
        _ => {
            return ValidationResult::denied(
                "ImmutableField",
                "database.connection cannot be added or removed after creation",
            );
        }
    }

    match (&old_db.aws, &new_db.aws) {
        (Some(old_aws), Some(new_aws)) => {
            let changed = [
                (old_aws.role_arn == new_aws.role_arn, "database.aws.roleArn"),
                (old_aws.region == new_aws.region, "database.aws.region"),
                (old_aws.host == new_aws.host, "database.aws.host"),
                (old_aws.port == new_aws.port, "database.aws.port"),
                (old_aws.db_name == new_aws.db_name, "database.aws.dbName"),
                (old_aws.username == new_aws.username, "database.aws.username"),
            ];
            for (unchanged, field) in changed {
                if !unchanged {
                    return ValidationResult::denied(
                        "ImmutableField",
                        &format!("{} is immutable", field),
                    );
                }
            }
        }
        (None, None) => {}
        _ => {
            return ValidationResult::denied(
                "ImmutableField",
                "database.aws cannot be added or removed after creation",
            );
        }
    }

    ValidationResult::allowed()
}
