//! Admission webhook policies
//!
//! Each policy module exports a `validate` function that checks specific
//! rules. Structural and cross-field rules run on every admission; the
//! immutability and in-flight rules additionally need the old object and
//! only apply to UPDATE.

pub mod checks;
pub mod database;
pub mod immutability;

pub use checks::validate_checks;
pub use database::validate_database;
pub use immutability::{validate_immutability, validate_not_progressing};

use crate::crd::DBUpgrade;

/// Result of a policy validation
#[derive(Debug)]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Context for validation including the old object for UPDATE operations
pub struct ValidationContext<'a> {
    pub upgrade: &'a DBUpgrade,
    pub old_upgrade: Option<&'a DBUpgrade>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(upgrade: &'a DBUpgrade, old_upgrade: Option<&'a DBUpgrade>) -> Self {
        Self {
            upgrade,
            old_upgrade,
        }
    }

    /// Check if this is a CREATE operation (no old object)
    pub fn is_create(&self) -> bool {
        self.old_upgrade.is_none()
    }
}

/// Run all validation policies and return the first failure.
pub fn validate_all(ctx: &ValidationContext) -> ValidationResult {
    // Update-only guards run first: a record with a live migration rejects
    // any spec edit before field-level rules get a say.
    if !ctx.is_create() {
        let update_policies: Vec<fn(&ValidationContext) -> ValidationResult> =
            vec![validate_not_progressing, validate_immutability];
        for policy in update_policies {
            let result = policy(ctx);
            if !result.allowed {
                return result;
            }
        }
    }

    let policies: Vec<fn(&ValidationContext) -> ValidationResult> =
        vec![validate_database, validate_checks];
    for policy in policies {
        let result = policy(ctx);
        if !result.allowed {
            return result;
        }
    }

    ValidationResult::allowed()
}
