//! Check configuration policies
//!
//! - minPodVersions minimum versions must parse as semver
//! - each metric check binds exactly one target matching its type
//! - threshold values must be non-zero quantities
//! - metric names are unique within pre and within post

use std::collections::HashSet;

use super::{ValidationContext, ValidationResult};
use crate::checks::quantity_to_f64;
use crate::checks::version::is_valid_min_version;
use crate::crd::{MetricCheck, MetricTargetType};

/// Validate check configurations.
pub fn validate_checks(ctx: &ValidationContext) -> ValidationResult {
    let Some(checks) = &ctx.upgrade.spec.checks else {
        return ValidationResult::allowed();
    };

    for (i, check) in checks.pre.min_pod_versions.iter().enumerate() {
        if !is_valid_min_version(&check.min_version) {
            return ValidationResult::denied(
                "InvalidMinVersion",
                &format!(
                    "checks.pre.minPodVersions[{}].minVersion {:?} is not valid semver",
                    i, check.min_version
                ),
            );
        }
    }

    if let Some(result) = validate_metric_list(&checks.pre.metrics, "pre") {
        return result;
    }
    if let Some(result) = validate_metric_list(&checks.post.metrics, "post") {
        return result;
    }

    ValidationResult::allowed()
}

fn validate_metric_list(metrics: &[MetricCheck], phase: &str) -> Option<ValidationResult> {
    let mut names: HashSet<&str> = HashSet::new();

    for metric in metrics {
        if metric.name.is_empty() {
            return Some(ValidationResult::denied(
                "InvalidMetricCheck",
                &format!("checks.{}.metrics entries require a non-empty name", phase),
            ));
        }
        if !names.insert(metric.name.as_str()) {
            return Some(ValidationResult::denied(
                "DuplicateMetricName",
                &format!(
                    "checks.{}.metrics name {:?} is duplicated; names must be unique",
                    phase, metric.name
                ),
            ));
        }
        if let Err(message) = validate_metric_check(metric) {
            return Some(ValidationResult::denied(
                "InvalidMetricCheck",
                &format!("{}-check metric {:?}: {}", phase, metric.name, message),
            ));
        }
    }

    None
}

/// Validate a single metric check: target bindings and threshold.
fn validate_metric_check(metric: &MetricCheck) -> Result<(), String> {
    let target = &metric.target;

    match target.type_ {
        MetricTargetType::Pods => {
            if target.pods.is_none() {
                return Err("target.type=Pods requires target.pods to be set".into());
            }
            if target.object.is_some() {
                return Err("target.type=Pods should not have target.object set".into());
            }
            if target.external.is_some() {
                return Err("target.type=Pods should not have target.external set".into());
            }
        }
        MetricTargetType::Object => {
            if target.object.is_none() {
                return Err("target.type=Object requires target.object to be set".into());
            }
            if target.pods.is_some() {
                return Err("target.type=Object should not have target.pods set".into());
            }
            if target.external.is_some() {
                return Err("target.type=Object should not have target.external set".into());
            }
        }
        MetricTargetType::External => {
            // External's selector binding is optional.
            if target.pods.is_some() {
                return Err("target.type=External should not have target.pods set".into());
            }
            if target.object.is_some() {
                return Err("target.type=External should not have target.object set".into());
            }
        }
    }

    match quantity_to_f64(&metric.threshold.value) {
        None => return Err("threshold.value cannot be empty".into()),
        Some(v) if v == 0.0 => return Err("threshold.value cannot be zero".into()),
        Some(_) => {}
    }

    Ok(())
}
