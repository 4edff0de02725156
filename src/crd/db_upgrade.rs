//! DBUpgrade CRD for declarative database schema migrations.
//!
//! A DBUpgrade describes a migration image, a target database, and optional
//! gating checks. The controller drives the record to completion by
//! launching a two-stage migration Job and reporting progress through the
//! `Ready`/`Progressing` condition pair.
//!
//! # Safety First Design
//!
//! - Migration Jobs never retry (backoffLimit 0); migrations are assumed
//!   idempotent and atomic at the tool layer.
//! - Jobs are keyed by a spec fingerprint, so a spec edit always produces a
//!   fresh Job rather than mutating a running one.
//! - Spec edits are rejected at admission while a migration is in flight.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DBUpgrade is the Schema for declarative database schema migrations.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "dbupgrade.example",
    version = "v1alpha1",
    kind = "DBUpgrade",
    plural = "dbupgrades",
    shortname = "dbu",
    namespaced,
    status = "DBUpgradeStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Progressing", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Progressing\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Progressing\")].reason"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DBUpgradeSpec {
    /// Migration image and layout configuration.
    pub migrations: MigrationsSpec,

    /// Target database configuration.
    pub database: DatabaseSpec,

    /// Optional pre- and post-migration gating checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<ChecksSpec>,

    /// Migration Job runner configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerSpec>,
}

/// Where migration files come from.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationsSpec {
    /// Container image holding the migration files. The image is never
    /// executed; its filesystem is exported and the migrations directory
    /// extracted.
    pub image: String,

    /// Directory inside the image containing migration files.
    #[serde(default = "default_migrations_dir")]
    pub dir: String,
}

fn default_migrations_dir() -> String {
    "/migrations".to_string()
}

/// Target database configuration.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Kind of database target.
    #[serde(rename = "type")]
    pub type_: DatabaseType,

    /// Connection secret reference (required for selfHosted, optional
    /// fallback for AWS kinds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionSpec>,

    /// AWS bundle for IAM-authenticated RDS/Aurora targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsSpec>,
}

/// Kind of database target.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DatabaseType {
    /// User supplies a connection URL in an opaque Secret.
    SelfHosted,
    /// AWS RDS instance; the operator mints short-lived IAM auth tokens.
    AwsRds,
    /// AWS Aurora cluster; same credential plane as RDS.
    AwsAurora,
}

impl DatabaseType {
    /// Returns true for the AWS-managed kinds.
    pub fn is_aws(&self) -> bool {
        matches!(self, DatabaseType::AwsRds | DatabaseType::AwsAurora)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseType::SelfHosted => write!(f, "selfHosted"),
            DatabaseType::AwsRds => write!(f, "awsRds"),
            DatabaseType::AwsAurora => write!(f, "awsAurora"),
        }
    }
}

/// Connection details for a database reachable with a static URL.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    /// Reference to a user-owned Secret key holding the connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_secret_ref: Option<SecretKeyRef>,
}

/// Reference to a single key inside a Secret in the same namespace.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Name of the Secret.
    pub name: String,

    /// Key within the Secret.
    pub key: String,
}

/// AWS bundle for IAM-authenticated database access.
///
/// The operator (not the migration Job) assumes this role to mint RDS auth
/// tokens. The role's trust policy must allow the operator's identity and
/// must require the external ID `{namespace}/{name}` of the DBUpgrade, which
/// prevents cross-tenant role assumption.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwsSpec {
    /// IAM role ARN assumed to generate RDS auth tokens. The role needs
    /// `rds-db:connect` on the target database.
    pub role_arn: String,

    /// AWS region of the database.
    pub region: String,

    /// Database endpoint hostname.
    pub host: String,

    /// Database port.
    #[serde(default = "default_port")]
    pub port: i32,

    /// Database name.
    pub db_name: String,

    /// Database username (must be an IAM-enabled database user).
    pub username: String,
}

fn default_port() -> i32 {
    5432
}

/// Pre- and post-migration gating checks.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChecksSpec {
    /// Checks evaluated before the migration Job is created.
    #[serde(default)]
    pub pre: PreChecksSpec,

    /// Checks evaluated after the migration Job succeeds.
    #[serde(default)]
    pub post: PostChecksSpec,
}

/// Gates evaluated before a migration starts.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PreChecksSpec {
    /// Minimum image versions required of label-selected pods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub min_pod_versions: Vec<MinPodVersionCheck>,

    /// Metric thresholds that must hold (list-map keyed by name).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricCheck>,
}

/// Gates evaluated after a migration succeeds.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostChecksSpec {
    /// Metric thresholds that must hold (list-map keyed by name).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricCheck>,
}

/// Requires pods matched by a selector to run at least a minimum version.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MinPodVersionCheck {
    /// Label selector for the pods to check.
    pub selector: LabelSelector,

    /// Minimum required version (image-tag semver, leading `v` tolerated).
    pub min_version: String,

    /// Restrict the check to one named container per pod. When unset, all
    /// containers and init containers are examined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// When true (default), pods with non-semver image tags fail the check.
    /// When false, such pods are skipped.
    #[serde(default = "default_true")]
    pub strict_mode: bool,

    /// Reserved. Declared for forward compatibility; current checkers do not
    /// enforce it.
    #[serde(default)]
    pub disallow_downgrade: bool,
}

fn default_true() -> bool {
    true
}

/// A single metric threshold gate.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricCheck {
    /// Unique, non-empty name (list-map key).
    pub name: String,

    /// Which metrics API serves this metric.
    #[serde(default)]
    pub source: MetricSource,

    /// Name of the metric to query.
    pub metric_name: String,

    /// What to query the metric for.
    pub target: MetricTarget,

    /// Threshold the reduced value must satisfy.
    pub threshold: ThresholdSpec,

    /// Reduction applied when the query returns multiple values.
    #[serde(default)]
    pub reduce: ReduceFunction,

    /// Seconds to wait after migration success before evaluating
    /// (post-checks only). Realized as timestamp-compare plus requeue, so it
    /// survives operator restarts.
    #[serde(default)]
    pub bake_seconds: i32,

    /// Interval between metric evaluations.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: i32,
}

fn default_interval_seconds() -> i32 {
    15
}

/// Which metrics API serves a metric.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum MetricSource {
    /// custom.metrics.k8s.io (pod- and object-level metrics).
    #[default]
    Custom,
    /// external.metrics.k8s.io.
    External,
}

/// What a metric query is keyed on. Exactly one binding must match `type`.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricTarget {
    /// Kind of target.
    #[serde(rename = "type")]
    pub type_: MetricTargetType,

    /// Pods binding (required when type=Pods).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods: Option<PodsTarget>,

    /// Object binding (required when type=Object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectTarget>,

    /// External binding (optional when type=External).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalTarget>,
}

/// Kind of metric target.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum MetricTargetType {
    Pods,
    Object,
    External,
}

impl std::fmt::Display for MetricTargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricTargetType::Pods => write!(f, "Pods"),
            MetricTargetType::Object => write!(f, "Object"),
            MetricTargetType::External => write!(f, "External"),
        }
    }
}

/// Pod-population metric target.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodsTarget {
    /// Label selector for the pods whose metric values are collected.
    pub selector: LabelSelector,
}

/// Single-object metric target.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTarget {
    /// Reference to the object the metric is keyed on.
    #[serde(rename = "ref")]
    pub ref_: ObjectReference,

    /// Selector for sub-resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

/// Reference to a Kubernetes object in the DBUpgrade's namespace.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the object (`v1` or `group/version`).
    pub api_version: String,

    /// Kind of the object.
    pub kind: String,

    /// Name of the object.
    pub name: String,
}

/// External metric target.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTarget {
    /// Metric label selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

/// A threshold condition over a reduced metric value.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSpec {
    /// Comparison operator.
    pub operator: ThresholdOperator,

    /// Value to compare against, as a decimal quantity string (`"5"`,
    /// `"1.5"`, `"250m"`). Use decimal fractions for ratios (`"0.05"` for
    /// 5%), not percentage notation.
    pub value: Quantity,
}

/// Comparison operator for a threshold.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ThresholdOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
}

impl std::fmt::Display for ThresholdOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThresholdOperator::GreaterThan => write!(f, ">"),
            ThresholdOperator::GreaterThanOrEqual => write!(f, ">="),
            ThresholdOperator::LessThan => write!(f, "<"),
            ThresholdOperator::LessThanOrEqual => write!(f, "<="),
        }
    }
}

/// Reduction applied to a set of metric values.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum ReduceFunction {
    #[default]
    Max,
    Avg,
    Sum,
    Min,
}

/// Migration Job runner configuration.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSpec {
    /// Deadline for the migration Job. May exceed 15 minutes even with RDS
    /// IAM auth; tokens only gate connection establishment, not open
    /// connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
}

/// Observed state of a DBUpgrade.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DBUpgradeStatus {
    /// Generation of the most recently observed spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// When the migration Job last completed successfully (RFC3339). Drives
    /// bake-window arithmetic across operator restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_completed_at: Option<String>,

    /// Latest observations of the DBUpgrade's state, keyed by type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Kubernetes-style status condition.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True or False.
    pub status: String,

    /// Machine-readable reason for the condition's last transition.
    pub reason: String,

    /// Human-readable message.
    pub message: String,

    /// Last time the condition transitioned between statuses.
    pub last_transition_time: String,

    /// Generation observed when the condition was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Condition types for DBUpgrade. Exactly these two are authoritative:
/// `Ready=True` means the schema matches the observed spec; `Progressing=True`
/// means work is in flight (including a bake window).
pub mod condition_types {
    /// Migration for the current spec completed successfully.
    pub const READY: &str = "Ready";
    /// A migration is in flight or a bake window is open.
    pub const PROGRESSING: &str = "Progressing";
}

/// Stable, machine-readable reason codes carried on both conditions.
pub mod reasons {
    /// No migration Job exists yet for the current spec.
    pub const INITIALIZING: &str = "Initializing";
    /// Migration Job created but not yet running.
    pub const JOB_PENDING: &str = "JobPending";
    /// Migration Job is running.
    pub const MIGRATION_IN_PROGRESS: &str = "MigrationInProgress";
    /// Migration and all post-checks succeeded.
    pub const MIGRATION_COMPLETE: &str = "MigrationComplete";
    /// Migration Job failed or exceeded its deadline.
    pub const JOB_FAILED: &str = "JobFailed";
    /// User connection secret or key is missing.
    pub const SECRET_NOT_FOUND: &str = "SecretNotFound";
    /// STS role assumption or token generation failed.
    pub const CLOUD_AUTH_ERROR: &str = "CloudAuthError";
    /// AWS kind with neither an aws bundle nor a fallback connection secret.
    pub const CLOUD_CONFIG_MISSING: &str = "CloudConfigMissing";
    /// Pods below the minimum required version.
    pub const PRE_CHECK_IMAGE_VERSION_FAILED: &str = "PreCheckImageVersionFailed";
    /// Pre-migration metric gate failed.
    pub const PRE_CHECK_METRIC_FAILED: &str = "PreCheckMetricFailed";
    /// Waiting out the post-migration bake window.
    pub const POST_CHECK_BAKE_TIME_WAITING: &str = "PostCheckBakeTimeWaiting";
    /// Post-migration metric gate failed.
    pub const POST_CHECK_FAILED: &str = "PostCheckFailed";
}

impl DBUpgrade {
    /// Look up a condition by type.
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
            .iter()
            .find(|c| c.type_ == type_)
    }

    /// True when the Progressing condition is currently True.
    pub fn is_progressing(&self) -> bool {
        self.condition(condition_types::PROGRESSING)
            .is_some_and(|c| c.status == "True")
    }
}
