//! Reconciler for DBUpgrade resources.
//!
//! Each tick is a single pass: every decision is computed into one
//! `ReconcileOutcome`, written in one status update, followed by at most one
//! event and a requeue delay. Status never flaps between two concurrent
//! decisions for the same record because the runtime serializes reconciles
//! per key.
//!
//! ## Overview
//!
//! 1. Route by database type; AWS kinds need either an aws bundle or a
//!    fallback connection secret.
//! 2. Validate the user's secret for static-URL targets.
//! 3. Ensure the operator-managed connection Secret (fresh token for AWS).
//! 4. Fingerprint the spec and locate the owned migration Job.
//! 5. A Job from a stale spec is replaced, but never while it is running.
//! 6. With no Job: run prechecks, then create the Job.
//! 7. With the current Job: classify it and, on success, wait out the bake
//!    window and run postchecks before declaring Ready.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, PropagationPolicy};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use crate::aws::{self, ConnectionScheme, RdsAuthConfig};
use crate::checks::metrics::MetricsChecker;
use crate::checks::version::check_min_pod_versions;
use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::fingerprint::spec_fingerprint;
use crate::controller::status::update_status;
use crate::crd::{DBUpgrade, DatabaseType, SecretKeyRef, reasons};
use crate::resources::job::{build_migration_job, job_name};
use crate::resources::secret::ensure_connection_secret;

/// Event reasons emitted against DBUpgrade records.
pub mod events {
    pub const SECRET_NOT_FOUND: &str = "SecretNotFound";
    pub const SPEC_CHANGED: &str = "SpecChanged";
    pub const MIGRATION_STARTED: &str = "MigrationStarted";
    pub const MIGRATION_SUCCEEDED: &str = "MigrationSucceeded";
    pub const MIGRATION_FAILED: &str = "MigrationFailed";
    pub const PRE_CHECK_FAILED: &str = "PreCheckFailed";
    pub const POST_CHECK_FAILED: &str = "PostCheckFailed";
}

/// Observable state of the migration Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// No Job exists for this record.
    Absent,
    /// Job exists but no pod has started.
    Pending,
    /// At least one pod is running.
    Live,
    /// Terminal success condition present.
    Succeeded,
    /// Terminal failure condition present.
    Failed,
    /// Deadline exceeded; treated as failed.
    Expired,
}

/// Classify a Job into its observable state from its conditions and active
/// counter.
pub fn classify_job(job: Option<&Job>) -> JobState {
    let Some(job) = job else {
        return JobState::Absent;
    };

    if let Some(conditions) = job.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        for condition in conditions {
            if condition.status != "True" {
                continue;
            }
            match condition.type_.as_str() {
                "Complete" => return JobState::Succeeded,
                "Failed" => {
                    if condition.reason.as_deref() == Some("DeadlineExceeded") {
                        return JobState::Expired;
                    }
                    return JobState::Failed;
                }
                _ => {}
            }
        }
    }

    if job.status.as_ref().and_then(|s| s.active).unwrap_or(0) > 0 {
        return JobState::Live;
    }

    JobState::Pending
}

/// Event carried by an outcome.
#[derive(Debug, Clone)]
pub struct OutcomeEvent {
    pub type_: EventType,
    pub reason: &'static str,
    pub action: &'static str,
    pub note: String,
}

/// Everything a tick decided, applied in one status write.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub ready: bool,
    pub ready_reason: &'static str,
    pub ready_message: String,
    pub progressing: bool,
    pub progress_reason: &'static str,
    pub progress_message: String,
    pub requeue_after: Option<Duration>,
    pub event: Option<OutcomeEvent>,
    /// Set when the Job succeeded; drives bake-window arithmetic.
    pub job_completed_at: Option<String>,
}

impl Default for ReconcileOutcome {
    fn default() -> Self {
        Self {
            ready: false,
            ready_reason: reasons::INITIALIZING,
            ready_message: String::new(),
            progressing: false,
            progress_reason: reasons::INITIALIZING,
            progress_message: String::new(),
            requeue_after: None,
            event: None,
            job_completed_at: None,
        }
    }
}

impl ReconcileOutcome {
    /// A not-ready, not-progressing outcome with one reason on both
    /// conditions.
    fn blocked(reason: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            ready_reason: reason,
            ready_message: message.clone(),
            progress_reason: reason,
            progress_message: message,
            ..Default::default()
        }
    }

    fn requeue(mut self, after: Duration) -> Self {
        self.requeue_after = Some(after);
        self
    }

    fn with_event(mut self, event: OutcomeEvent) -> Self {
        self.event = Some(event);
        self
    }
}

/// Main reconciliation function for DBUpgrade.
#[instrument(skip(upgrade, ctx), fields(name = %upgrade.name_any(), namespace = upgrade.namespace().unwrap_or_default()))]
pub async fn reconcile(upgrade: Arc<DBUpgrade>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = std::time::Instant::now();
    let namespace = upgrade.namespace().unwrap_or_default();
    let name = upgrade.name_any();

    // Held until this tick's status write lands; shutdown drains on it.
    let _in_flight = ctx.track_reconcile();

    debug!("Reconciling DBUpgrade");

    let outcome = reconcile_db_upgrade(&upgrade, &ctx, &namespace).await;

    // Single status write; a conflict surfaces to the watch loop for retry.
    update_status(&ctx, &upgrade, &outcome).await?;

    if let Some(event) = &outcome.event {
        ctx.publish_event(
            &upgrade,
            event.type_.clone(),
            event.reason,
            event.action,
            Some(event.note.clone()),
        )
        .await;
    }

    ctx.record_reconcile(&namespace, &name, start_time.elapsed().as_secs_f64());

    match outcome.requeue_after {
        Some(after) => Ok(Action::requeue(after)),
        None => Ok(Action::await_change()),
    }
}

/// Error policy for the controller.
pub fn error_policy(upgrade: Arc<DBUpgrade>, error: &Error, ctx: Arc<Context>) -> Action {
    let namespace = upgrade.namespace().unwrap_or_default();
    let name = upgrade.name_any();
    ctx.record_error(&namespace, &name);

    let backoff = BackoffConfig::default();
    let delay = backoff.delay_for_error(error, 0);

    if error.is_retryable() {
        warn!("Reconcile error for {} (retrying in {:?}): {}", name, delay, error);
    } else {
        error!("Permanent reconcile error for {}: {}", name, error);
    }

    Action::requeue(delay)
}

/// Compute the outcome for one tick.
async fn reconcile_db_upgrade(upgrade: &DBUpgrade, ctx: &Context, ns: &str) -> ReconcileOutcome {
    let database = &upgrade.spec.database;

    // AWS kinds need a way to mint or read credentials.
    if database.type_.is_aws() && database.aws.is_none() && static_secret_ref(upgrade).is_none() {
        return ReconcileOutcome::blocked(
            reasons::CLOUD_CONFIG_MISSING,
            format!(
                "database.aws or database.connection is required for {}",
                database.type_
            ),
        );
    }

    // selfHosted targets read the user's secret; check it up front so the
    // condition names the missing piece. AWS kinds on the fallback secret
    // surface lookup failures through the ensure step below instead.
    if database.type_ == DatabaseType::SelfHosted
        && let Err(e) = validate_user_secret(upgrade, ctx, ns).await
    {
        info!("Secret validation failed: {}", e);
        let message = e.to_string();
        return ReconcileOutcome::blocked(reasons::SECRET_NOT_FOUND, message.clone())
            .requeue(Duration::from_secs(30))
            .with_event(OutcomeEvent {
                type_: EventType::Warning,
                reason: events::SECRET_NOT_FOUND,
                action: "ValidateSecret",
                note: message,
            });
    }

    // Operator-managed Secret the Job reads its URL from. AWS tokens are
    // short-lived, so this rewrites on every tick for AWS kinds.
    let migration_secret = match ensure_migration_secret(upgrade, ctx, ns).await {
        Ok(secret) => secret,
        Err(Error::CloudAuthError(message)) => {
            error!("Failed to mint database token: {}", message);
            return ReconcileOutcome::blocked(reasons::CLOUD_AUTH_ERROR, message)
                .requeue(Duration::from_secs(10));
        }
        Err(Error::CloudConfigMissing(message)) => {
            return ReconcileOutcome::blocked(reasons::CLOUD_CONFIG_MISSING, message);
        }
        Err(e) => {
            error!("Failed to ensure migration secret: {}", e);
            let mut outcome = ReconcileOutcome::blocked(
                reasons::SECRET_NOT_FOUND,
                "Failed to create migration secret",
            )
            .requeue(Duration::from_secs(10));
            outcome.progress_message = e.to_string();
            return outcome;
        }
    };

    let current_fingerprint = spec_fingerprint(&upgrade.spec);

    let existing_job = match find_job_for_upgrade(upgrade, ctx, ns).await {
        Ok(job) => job,
        Err(e) => {
            error!("Failed to look up migration Job: {}", e);
            let mut outcome = ReconcileOutcome::blocked(
                reasons::INITIALIZING,
                "Error checking for existing Job",
            )
            .requeue(Duration::from_secs(5));
            outcome.progress_message = e.to_string();
            return outcome;
        }
    };

    let expected_job_name = job_name(&upgrade.name_any(), &current_fingerprint);

    if let Some(job) = &existing_job
        && job.name_any() != expected_job_name
    {
        return replace_stale_job(upgrade, ctx, ns, job, &expected_job_name).await;
    }

    match existing_job {
        None => create_migration_job(upgrade, ctx, ns, &migration_secret, &current_fingerprint).await,
        Some(job) => sync_job_status(upgrade, ctx, ns, &job).await,
    }
}

/// Handle a Job left over from a previous spec fingerprint.
///
/// A running migration is never disturbed; this is the server-side
/// complement to the admission no-edit-while-running rule, catching edits
/// that raced past it.
async fn replace_stale_job(
    upgrade: &DBUpgrade,
    ctx: &Context,
    ns: &str,
    job: &Job,
    expected_job_name: &str,
) -> ReconcileOutcome {
    if classify_job(Some(job)) == JobState::Live {
        info!(
            old_job = %job.name_any(),
            expected_job = %expected_job_name,
            "Spec changed but migration is running, waiting for completion"
        );
        return ReconcileOutcome {
            ready_reason: reasons::INITIALIZING,
            ready_message: "Waiting for current migration to complete".into(),
            progressing: true,
            progress_reason: reasons::MIGRATION_IN_PROGRESS,
            progress_message: "Cannot apply new spec while migration is running".into(),
            requeue_after: Some(Duration::from_secs(10)),
            ..Default::default()
        };
    }

    info!(
        old_job = %job.name_any(),
        expected_job = %expected_job_name,
        "Spec changed, deleting completed Job"
    );

    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), ns);
    let params = DeleteParams {
        propagation_policy: Some(PropagationPolicy::Background),
        ..Default::default()
    };
    if let Err(e) = jobs.delete(&job.name_any(), &params).await
        && !is_not_found(&e)
    {
        error!("Failed to delete stale Job: {}", e);
        return ReconcileOutcome {
            ready_reason: reasons::INITIALIZING,
            ready_message: "Cleaning up stale Job".into(),
            progress_reason: reasons::INITIALIZING,
            progress_message: "Deleting Job from previous spec".into(),
            requeue_after: Some(Duration::from_secs(5)),
            ..Default::default()
        };
    }

    // Next tick creates the Job for the new fingerprint.
    ReconcileOutcome {
        ready_reason: reasons::INITIALIZING,
        ready_message: "Spec changed, preparing new migration".into(),
        progress_reason: reasons::INITIALIZING,
        progress_message: "Deleted old Job, will create new one".into(),
        requeue_after: Some(Duration::from_secs(2)),
        event: Some(OutcomeEvent {
            type_: EventType::Normal,
            reason: events::SPEC_CHANGED,
            action: "ReplaceJob",
            note: "Spec changed, starting new migration".into(),
        }),
        ..Default::default()
    }
}

/// Run prechecks and create the migration Job.
async fn create_migration_job(
    upgrade: &DBUpgrade,
    ctx: &Context,
    ns: &str,
    migration_secret: &Secret,
    fingerprint: &str,
) -> ReconcileOutcome {
    if upgrade.spec.checks.is_some() {
        let precheck = run_pre_checks(upgrade, ctx, ns).await;
        if let Some(outcome) = precheck {
            return outcome;
        }
    }

    let expected_job_name = job_name(&upgrade.name_any(), fingerprint);
    info!(job = %expected_job_name, "Creating migration Job");

    let secret_name = migration_secret.name_any();
    let job = build_migration_job(upgrade, &secret_name, fingerprint, &ctx.config);

    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), ns);
    match jobs.create(&Default::default(), &job).await {
        Ok(created) => ReconcileOutcome {
            ready_reason: reasons::INITIALIZING,
            ready_message: "Migration Job created".into(),
            progressing: true,
            progress_reason: reasons::JOB_PENDING,
            progress_message: format!("Created Job {}", created.name_any()),
            requeue_after: Some(Duration::from_secs(5)),
            event: Some(OutcomeEvent {
                type_: EventType::Normal,
                reason: events::MIGRATION_STARTED,
                action: "CreateJob",
                note: format!("Created migration Job {}", created.name_any()),
            }),
            ..Default::default()
        },
        Err(e) if is_already_exists(&e) => {
            // Raced with a previous tick's create.
            ReconcileOutcome {
                ready_reason: reasons::INITIALIZING,
                ready_message: "Job creation in progress".into(),
                progressing: true,
                progress_reason: reasons::JOB_PENDING,
                progress_message: "Migration Job being created".into(),
                requeue_after: Some(Duration::from_secs(2)),
                ..Default::default()
            }
        }
        Err(e) => {
            error!("Failed to create migration Job: {}", e);
            let mut outcome = ReconcileOutcome::blocked(
                reasons::JOB_FAILED,
                "Failed to create migration Job",
            )
            .requeue(Duration::from_secs(30));
            outcome.progress_message = e.to_string();
            outcome
        }
    }
}

/// Map the Job's state to an outcome.
async fn sync_job_status(
    upgrade: &DBUpgrade,
    ctx: &Context,
    ns: &str,
    job: &Job,
) -> ReconcileOutcome {
    match classify_job(Some(job)) {
        JobState::Absent => ReconcileOutcome::blocked(
            reasons::INITIALIZING,
            "Waiting for Job creation",
        ),

        JobState::Succeeded => {
            // Completion time from the Job, else preserved status (survives
            // restarts), else now.
            let job_completed_at = job
                .status
                .as_ref()
                .and_then(|s| s.completion_time.as_ref())
                .map(|t| t.0.to_rfc3339())
                .or_else(|| {
                    upgrade
                        .status
                        .as_ref()
                        .and_then(|s| s.job_completed_at.clone())
                })
                .unwrap_or_else(|| Utc::now().to_rfc3339());

            if has_post_checks(upgrade)
                && let Some(mut outcome) = run_post_checks(upgrade, ctx, ns, &job_completed_at).await
            {
                outcome.job_completed_at = Some(job_completed_at);
                return outcome;
            }

            info!(job = %job.name_any(), "Migration completed successfully");
            ReconcileOutcome {
                ready: true,
                ready_reason: reasons::MIGRATION_COMPLETE,
                ready_message: "Database migration completed successfully".into(),
                progress_reason: reasons::MIGRATION_COMPLETE,
                progress_message: format!("Job {} completed", job.name_any()),
                job_completed_at: Some(job_completed_at),
                event: Some(OutcomeEvent {
                    type_: EventType::Normal,
                    reason: events::MIGRATION_SUCCEEDED,
                    action: "MonitorJob",
                    note: "Database migration completed successfully".into(),
                }),
                ..Default::default()
            }
        }

        JobState::Failed | JobState::Expired => ReconcileOutcome {
            ready_reason: reasons::JOB_FAILED,
            ready_message: "Migration Job failed".into(),
            progress_reason: reasons::JOB_FAILED,
            progress_message: format!("Job {} failed", job.name_any()),
            event: Some(OutcomeEvent {
                type_: EventType::Warning,
                reason: events::MIGRATION_FAILED,
                action: "MonitorJob",
                note: "Database migration failed".into(),
            }),
            ..Default::default()
        },

        JobState::Live => ReconcileOutcome {
            ready_reason: reasons::INITIALIZING,
            ready_message: "Migration in progress".into(),
            progressing: true,
            progress_reason: reasons::MIGRATION_IN_PROGRESS,
            progress_message: format!("Job {} is running", job.name_any()),
            requeue_after: Some(Duration::from_secs(10)),
            ..Default::default()
        },

        JobState::Pending => ReconcileOutcome {
            ready_reason: reasons::INITIALIZING,
            ready_message: "Migration Job pending".into(),
            progressing: true,
            progress_reason: reasons::JOB_PENDING,
            progress_message: format!("Job {} is pending", job.name_any()),
            requeue_after: Some(Duration::from_secs(5)),
            ..Default::default()
        },
    }
}

/// Run prechecks; `None` means all gates passed.
async fn run_pre_checks(upgrade: &DBUpgrade, ctx: &Context, ns: &str) -> Option<ReconcileOutcome> {
    let checks = upgrade.spec.checks.as_ref()?;

    if !checks.pre.min_pod_versions.is_empty() {
        match check_min_pod_versions(&ctx.client, ns, &checks.pre.min_pod_versions).await {
            Err(e) => {
                error!("Failed to run pod version check: {}", e);
                return Some(
                    ReconcileOutcome::blocked(
                        reasons::PRE_CHECK_IMAGE_VERSION_FAILED,
                        e.to_string(),
                    )
                    .requeue(Duration::from_secs(30)),
                );
            }
            Ok(result) if !result.passed => {
                info!("Pod version precheck failed: {}", result.message);
                return Some(
                    ReconcileOutcome::blocked(
                        reasons::PRE_CHECK_IMAGE_VERSION_FAILED,
                        result.message.clone(),
                    )
                    .requeue(Duration::from_secs(60))
                    .with_event(OutcomeEvent {
                        type_: EventType::Warning,
                        reason: events::PRE_CHECK_FAILED,
                        action: "RunChecks",
                        note: result.message,
                    }),
                );
            }
            Ok(result) => info!("Pod version precheck passed: {}", result.message),
        }
    }

    if !checks.pre.metrics.is_empty() {
        let checker = MetricsChecker::new(ctx.client.clone());
        match checker.check_metrics(ns, &checks.pre.metrics).await {
            Err(e) => {
                error!("Failed to run metric precheck: {}", e);
                return Some(
                    ReconcileOutcome::blocked(reasons::PRE_CHECK_METRIC_FAILED, e.to_string())
                        .requeue(Duration::from_secs(30)),
                );
            }
            Ok(result) if !result.passed => {
                info!("Metric precheck failed: {}", result.message);
                return Some(
                    ReconcileOutcome::blocked(
                        reasons::PRE_CHECK_METRIC_FAILED,
                        result.message.clone(),
                    )
                    .requeue(Duration::from_secs(60))
                    .with_event(OutcomeEvent {
                        type_: EventType::Warning,
                        reason: events::PRE_CHECK_FAILED,
                        action: "RunChecks",
                        note: result.message,
                    }),
                );
            }
            Ok(result) => info!("Metric precheck passed: {}", result.message),
        }
    }

    None
}

/// Run postchecks after the bake window; `None` means all gates passed.
async fn run_post_checks(
    upgrade: &DBUpgrade,
    ctx: &Context,
    ns: &str,
    job_completed_at: &str,
) -> Option<ReconcileOutcome> {
    let checks = upgrade.spec.checks.as_ref()?;
    if checks.post.metrics.is_empty() {
        return None;
    }

    let max_bake_seconds = checks
        .post
        .metrics
        .iter()
        .map(|m| m.bake_seconds)
        .max()
        .unwrap_or(0);

    // Bake windows are timestamp-compare plus requeue, never a sleep, so
    // they survive operator restarts.
    if max_bake_seconds > 0
        && let Some(remaining) = bake_time_remaining(job_completed_at, max_bake_seconds, Utc::now())
    {
        let elapsed = max_bake_seconds as i64 - remaining;
        info!(
            elapsed,
            required = max_bake_seconds,
            remaining,
            "Waiting for bake time"
        );
        return Some(ReconcileOutcome {
            ready_reason: reasons::POST_CHECK_BAKE_TIME_WAITING,
            ready_message: format!("Waiting for bake time: {}s remaining", remaining),
            progressing: true,
            progress_reason: reasons::POST_CHECK_BAKE_TIME_WAITING,
            progress_message: format!(
                "Bake time: {}/{} seconds elapsed",
                elapsed, max_bake_seconds
            ),
            requeue_after: Some(Duration::from_secs(remaining as u64)),
            ..Default::default()
        });
    }

    let checker = MetricsChecker::new(ctx.client.clone());
    match checker.check_metrics(ns, &checks.post.metrics).await {
        Err(e) => {
            error!("Failed to run metric postcheck: {}", e);
            Some(
                ReconcileOutcome::blocked(reasons::POST_CHECK_FAILED, e.to_string())
                    .requeue(Duration::from_secs(30)),
            )
        }
        Ok(result) if !result.passed => {
            info!("Metric postcheck failed: {}", result.message);
            Some(
                ReconcileOutcome::blocked(reasons::POST_CHECK_FAILED, result.message.clone())
                    .requeue(Duration::from_secs(60))
                    .with_event(OutcomeEvent {
                        type_: EventType::Warning,
                        reason: events::POST_CHECK_FAILED,
                        action: "RunChecks",
                        note: result.message,
                    }),
            )
        }
        Ok(result) => {
            info!("Metric postcheck passed: {}", result.message);
            None
        }
    }
}

/// Seconds of bake window still open, or `None` once it has elapsed.
///
/// Elapsed time is computed from the persisted completion timestamp, not
/// from process start, so a restart mid-window resumes where it left off.
pub fn bake_time_remaining(
    job_completed_at: &str,
    max_bake_seconds: i32,
    now: DateTime<Utc>,
) -> Option<i64> {
    let completed_at = DateTime::parse_from_rfc3339(job_completed_at)
        .ok()?
        .with_timezone(&Utc);
    let elapsed = now.signed_duration_since(completed_at).num_seconds();
    let remaining = max_bake_seconds as i64 - elapsed;
    (remaining > 0).then_some(remaining)
}

fn has_post_checks(upgrade: &DBUpgrade) -> bool {
    upgrade
        .spec
        .checks
        .as_ref()
        .is_some_and(|c| !c.post.metrics.is_empty())
}

/// Reference to the user's static URL secret, when one is configured.
fn static_secret_ref(upgrade: &DBUpgrade) -> Option<&SecretKeyRef> {
    upgrade
        .spec
        .database
        .connection
        .as_ref()?
        .url_secret_ref
        .as_ref()
}

/// Check that the user's referenced secret exists and carries the key.
async fn validate_user_secret(upgrade: &DBUpgrade, ctx: &Context, ns: &str) -> Result<()> {
    let secret_ref = static_secret_ref(upgrade).ok_or_else(|| {
        Error::InvalidConfig(
            "database.connection.urlSecretRef is required for a static connection URL".into(),
        )
    })?;

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
    let secret = secrets.get_opt(&secret_ref.name).await?.ok_or_else(|| {
        Error::SecretNotFound(format!(
            "secret {:?} not found in namespace {:?}",
            secret_ref.name, ns
        ))
    })?;

    let has_key = secret
        .data
        .as_ref()
        .is_some_and(|d| d.contains_key(&secret_ref.key));
    if !has_key {
        return Err(Error::SecretNotFound(format!(
            "key {:?} not found in secret {:?}",
            secret_ref.key, secret_ref.name
        )));
    }

    Ok(())
}

/// Resolve the connection URL and write it into the operator-managed Secret.
async fn ensure_migration_secret(upgrade: &DBUpgrade, ctx: &Context, ns: &str) -> Result<Secret> {
    let database = &upgrade.spec.database;

    let (connection_url, always_write) = if let Some(aws_spec) = &database.aws {
        let auth_config = RdsAuthConfig {
            region: aws_spec.region.clone(),
            host: aws_spec.host.clone(),
            port: aws_spec.port,
            username: aws_spec.username.clone(),
            db_name: aws_spec.db_name.clone(),
            role_arn: aws_spec.role_arn.clone(),
            // The role trust policy gates on this tag; it confines each
            // role to its own record.
            external_id: aws::external_id(ns, &upgrade.name_any()),
        };

        let token = ctx.aws.generate_rds_auth_token(&auth_config).await?;
        let url = aws::build_connection_url(ConnectionScheme::Postgres, &auth_config, &token);
        // Tokens expire within 15 minutes; always rewrite.
        (url.into_bytes(), true)
    } else {
        let secret_ref = static_secret_ref(upgrade).ok_or_else(|| {
            Error::CloudConfigMissing(format!(
                "database.connection is required for {}",
                database.type_
            ))
        })?;

        let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
        let customer_secret = secrets.get_opt(&secret_ref.name).await?.ok_or_else(|| {
            Error::SecretNotFound(format!("secret {:?} not found", secret_ref.name))
        })?;
        let url = customer_secret
            .data
            .as_ref()
            .and_then(|d| d.get(&secret_ref.key))
            .map(|b| b.0.clone())
            .ok_or_else(|| {
                Error::SecretNotFound(format!(
                    "key {:?} not found in secret {:?}",
                    secret_ref.key, secret_ref.name
                ))
            })?;
        (url, false)
    };

    ensure_connection_secret(&ctx.client, upgrade, connection_url, always_write).await
}

/// Find the migration Job owned by this DBUpgrade (list-and-filter by owner
/// UID).
async fn find_job_for_upgrade(upgrade: &DBUpgrade, ctx: &Context, ns: &str) -> Result<Option<Job>> {
    let uid = upgrade.metadata.uid.clone().unwrap_or_default();
    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), ns);
    let job_list = jobs.list(&ListParams::default()).await?;

    Ok(job_list.items.into_iter().find(|job| {
        job.metadata
            .owner_references
            .as_ref()
            .is_some_and(|owners| owners.iter().any(|o| o.uid == uid))
    }))
}

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(ae) if ae.code == 404)
}

fn is_already_exists(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(ae) if ae.code == 409)
}
