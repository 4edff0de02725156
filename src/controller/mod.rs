pub mod context;
pub mod error;
pub mod fingerprint;
pub mod reconciler;
pub mod status;

pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use fingerprint::spec_fingerprint;
pub use reconciler::{JobState, ReconcileOutcome, classify_job, error_policy, reconcile};
pub use status::{ConditionBuilder, build_status, update_status};
