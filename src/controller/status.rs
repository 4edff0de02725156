//! Status and condition management for DBUpgrade resources.
//!
//! Every reconcile tick rewrites the `Ready`/`Progressing` pair from its
//! outcome in a single status update. Writes that would not change the
//! stored status are suppressed to avoid update storms.

use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use tracing::debug;

use crate::controller::Context;
use crate::controller::error::Result;
use crate::controller::reconciler::ReconcileOutcome;
use crate::crd::{Condition, DBUpgrade, DBUpgradeStatus, condition_types};
use crate::resources::common::FIELD_MANAGER;

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    /// Create from existing conditions
    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't.
    /// `lastTransitionTime` only moves when the status actually flips.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.reason = reason.to_string();
                existing.message = message.to_string();
                existing.last_transition_time = now;
                existing.observed_generation = self.generation;
            } else {
                existing.reason = reason.to_string();
                existing.message = message.to_string();
                existing.observed_generation = self.generation;
            }
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
                observed_generation: self.generation,
            });
        }
        self
    }

    /// Set the Ready condition
    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        let status = if is_ready {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::READY, status, reason, message)
    }

    /// Set the Progressing condition
    pub fn progressing(self, is_progressing: bool, reason: &str, message: &str) -> Self {
        let status = if is_progressing {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::PROGRESSING, status, reason, message)
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Project a reconcile outcome onto the status the record should carry.
///
/// `jobCompletedAt` is only ever advanced by an outcome; it is preserved
/// otherwise so bake windows survive restarts.
pub fn build_status(upgrade: &DBUpgrade, outcome: &ReconcileOutcome) -> DBUpgradeStatus {
    let generation = upgrade.metadata.generation;
    let existing = upgrade.status.clone().unwrap_or_default();

    let conditions = ConditionBuilder::from_existing(existing.conditions, generation)
        .ready(outcome.ready, outcome.ready_reason, &outcome.ready_message)
        .progressing(
            outcome.progressing,
            outcome.progress_reason,
            &outcome.progress_message,
        )
        .build();

    DBUpgradeStatus {
        observed_generation: generation,
        job_completed_at: outcome
            .job_completed_at
            .clone()
            .or(existing.job_completed_at),
        conditions,
    }
}

/// Write the outcome to the status subresource in a single update.
///
/// A write that would not change the stored status is suppressed. Update
/// conflicts surface to the caller; the watch loop retries rather than
/// looping here.
pub async fn update_status(
    ctx: &Context,
    upgrade: &DBUpgrade,
    outcome: &ReconcileOutcome,
) -> Result<()> {
    let status = build_status(upgrade, outcome);

    if upgrade.status.as_ref() == Some(&status) {
        debug!("Status unchanged, skipping update");
        return Ok(());
    }

    let namespace = upgrade.namespace().unwrap_or_default();
    let api: Api<DBUpgrade> = Api::namespaced(ctx.client.clone(), &namespace);

    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &upgrade.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;

    Ok(())
}
