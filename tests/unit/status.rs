//! Status and condition management tests

use dbupgrade_operator::controller::{ReconcileOutcome, build_status};
use dbupgrade_operator::crd::{condition_types, reasons};

use crate::common::self_hosted_upgrade;

fn complete_outcome() -> ReconcileOutcome {
    ReconcileOutcome {
        ready: true,
        ready_reason: reasons::MIGRATION_COMPLETE,
        ready_message: "Database migration completed successfully".into(),
        progressing: false,
        progress_reason: reasons::MIGRATION_COMPLETE,
        progress_message: "Job dbupgrade-orders-ab12cd34 completed".into(),
        ..Default::default()
    }
}

#[test]
fn status_carries_both_conditions() {
    let upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    let status = build_status(&upgrade, &complete_outcome());

    let ready = status
        .conditions
        .iter()
        .find(|c| c.type_ == condition_types::READY)
        .unwrap();
    let progressing = status
        .conditions
        .iter()
        .find(|c| c.type_ == condition_types::PROGRESSING)
        .unwrap();

    assert_eq!(ready.status, "True");
    assert_eq!(ready.reason, reasons::MIGRATION_COMPLETE);
    assert_eq!(progressing.status, "False");
}

#[test]
fn observed_generation_tracks_metadata() {
    let mut upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    upgrade.metadata.generation = Some(7);

    let status = build_status(&upgrade, &ReconcileOutcome::default());
    assert_eq!(status.observed_generation, Some(7));
    for condition in &status.conditions {
        assert_eq!(condition.observed_generation, Some(7));
    }
}

#[test]
fn second_identical_tick_produces_equal_status() {
    // Write suppression depends on two consecutive builds of the same
    // outcome being deep-equal.
    let mut upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    let outcome = complete_outcome();

    let first = build_status(&upgrade, &outcome);
    upgrade.status = Some(first.clone());
    let second = build_status(&upgrade, &outcome);

    assert_eq!(first, second);
}

#[test]
fn job_completed_at_survives_unrelated_ticks() {
    let mut upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    let mut with_completion = complete_outcome();
    with_completion.job_completed_at = Some("2024-06-01T12:00:00+00:00".to_string());

    upgrade.status = Some(build_status(&upgrade, &with_completion));

    // A later tick that does not set a completion time must not clear it.
    let status = build_status(&upgrade, &ReconcileOutcome::default());
    assert_eq!(
        status.job_completed_at.as_deref(),
        Some("2024-06-01T12:00:00+00:00")
    );
}

#[test]
fn transition_time_stable_while_status_unchanged() {
    let mut upgrade = self_hosted_upgrade("orders", "customer/migr:v1");
    let pending = ReconcileOutcome {
        progressing: true,
        progress_reason: reasons::JOB_PENDING,
        progress_message: "Job is pending".into(),
        ..Default::default()
    };

    let first = build_status(&upgrade, &pending);
    upgrade.status = Some(first.clone());

    let running = ReconcileOutcome {
        progressing: true,
        progress_reason: reasons::MIGRATION_IN_PROGRESS,
        progress_message: "Job is running".into(),
        ..Default::default()
    };
    let second = build_status(&upgrade, &running);

    let first_progressing = first
        .conditions
        .iter()
        .find(|c| c.type_ == condition_types::PROGRESSING)
        .unwrap();
    let second_progressing = second
        .conditions
        .iter()
        .find(|c| c.type_ == condition_types::PROGRESSING)
        .unwrap();

    // Reason moved but status stayed True, so the transition time holds.
    assert_eq!(second_progressing.reason, reasons::MIGRATION_IN_PROGRESS);
    assert_eq!(
        first_progressing.last_transition_time,
        second_progressing.last_transition_time
    );
}
