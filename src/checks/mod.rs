//! Gating checks evaluated before and after migrations.
//!
//! Version checks gate on the image versions of a label-selected pod
//! population; metric checks gate on values served by the custom and
//! external metrics APIs. Gate failures are first-class results, not
//! errors; errors are reserved for API failures.

pub mod metrics;
pub mod version;

pub use metrics::{MetricCheckResult, MetricsChecker, quantity_to_f64};
pub use version::{
    VersionCheckResult, check_min_pod_versions, compare_versions, extract_version_from_image,
};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::controller::error::{Error, Result};

/// Render a LabelSelector as a label-selector query string.
///
/// An empty selector selects everything and renders as the empty string.
pub(crate) fn selector_query(selector: &LabelSelector) -> Result<String> {
    let mut terms: Vec<String> = Vec::new();

    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            terms.push(format!("{}={}", key, value));
        }
    }

    if let Some(exprs) = &selector.match_expressions {
        for expr in exprs {
            let values = expr.values.clone().unwrap_or_default();
            match expr.operator.as_str() {
                "In" => terms.push(format!("{} in ({})", expr.key, values.join(","))),
                "NotIn" => terms.push(format!("{} notin ({})", expr.key, values.join(","))),
                "Exists" => terms.push(expr.key.clone()),
                "DoesNotExist" => terms.push(format!("!{}", expr.key)),
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "unsupported label selector operator: {}",
                        other
                    )));
                }
            }
        }
    }

    Ok(terms.join(","))
}
