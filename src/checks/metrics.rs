//! Metric threshold gate.
//!
//! Queries the custom metrics API (pod and object targets) or the external
//! metrics API, reduces the returned values, and compares the result
//! against a quantity threshold. The adapters serve fixed-precision
//! decimals; both sides of the comparison go through the same milli-valued
//! float conversion.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::Client;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use tracing::info;

use crate::controller::error::{Error, Result};
use crate::crd::{MetricCheck, MetricSource, MetricTargetType, ReduceFunction, ThresholdOperator};

const CUSTOM_METRICS_BASE: &str = "/apis/custom.metrics.k8s.io/v1beta2";
const EXTERNAL_METRICS_BASE: &str = "/apis/external.metrics.k8s.io/v1beta1";

/// Result of a metric gate.
#[derive(Debug, Clone, Default)]
pub struct MetricCheckResult {
    pub passed: bool,
    pub message: String,
    /// Raw values returned by the metrics API.
    pub values: Vec<f64>,
    /// Value after applying the reduce function.
    pub reduced_value: f64,
    /// Threshold compared against.
    pub threshold_value: f64,
}

/// Wire format of the custom metrics API.
#[derive(Debug, Deserialize)]
struct MetricValueList {
    #[serde(default)]
    items: Vec<MetricValue>,
}

#[derive(Debug, Deserialize)]
struct MetricValue {
    value: Quantity,
}

/// Wire format of the external metrics API.
#[derive(Debug, Deserialize)]
struct ExternalMetricValueList {
    #[serde(default)]
    items: Vec<ExternalMetricValue>,
}

#[derive(Debug, Deserialize)]
struct ExternalMetricValue {
    value: Quantity,
}

/// Client for the custom and external metrics adapter APIs.
///
/// The adapter groups have no typed Rust client, so queries go out as raw
/// API-group requests over the shared Kubernetes client.
pub struct MetricsChecker {
    client: Client,
}

impl MetricsChecker {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Evaluate metric checks in declaration order; the first failing check
    /// short-circuits with its own message.
    pub async fn check_metrics(
        &self,
        namespace: &str,
        checks: &[MetricCheck],
    ) -> Result<MetricCheckResult> {
        for check in checks {
            let result = self.check_single_metric(namespace, check).await.map_err(
                |e| match e {
                    Error::MetricsApiError(msg) => {
                        Error::MetricsApiError(format!("failed to check metric {}: {}", check.name, msg))
                    }
                    other => other,
                },
            )?;

            if !result.passed {
                return Ok(result);
            }
        }

        Ok(MetricCheckResult {
            passed: true,
            message: format!("All {} metric check(s) passed", checks.len()),
            ..Default::default()
        })
    }

    async fn check_single_metric(
        &self,
        namespace: &str,
        check: &MetricCheck,
    ) -> Result<MetricCheckResult> {
        let values = match check.source {
            MetricSource::Custom => self.custom_metric_values(namespace, check).await?,
            MetricSource::External => self.external_metric_values(namespace, check).await?,
        };

        if values.is_empty() {
            return Ok(MetricCheckResult {
                passed: false,
                message: format!("No metric values found for {}", check.metric_name),
                ..Default::default()
            });
        }

        let reduced_value = reduce_values(&values, check.reduce);
        let threshold_value = quantity_to_f64(&check.threshold.value).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "threshold value {:?} is not a parseable quantity",
                check.threshold.value.0
            ))
        })?;
        let passed = compare_threshold(reduced_value, threshold_value, check.threshold.operator);

        info!(
            check = %check.name,
            metric = %check.metric_name,
            ?values,
            reduced = reduced_value,
            threshold = threshold_value,
            operator = %check.threshold.operator,
            passed,
            "Metric check result"
        );

        let message = format!(
            "Metric {} value {:.4} {} {} {:.4}",
            check.metric_name,
            reduced_value,
            if passed {
                "satisfies"
            } else {
                "does not satisfy"
            },
            check.threshold.operator,
            threshold_value
        );

        Ok(MetricCheckResult {
            passed,
            message,
            values,
            reduced_value,
            threshold_value,
        })
    }

    async fn custom_metric_values(
        &self,
        namespace: &str,
        check: &MetricCheck,
    ) -> Result<Vec<f64>> {
        let path = match check.target.type_ {
            MetricTargetType::Pods => {
                let pods = check.target.pods.as_ref().ok_or_else(|| {
                    Error::InvalidConfig("pods target configuration required for Pods type".into())
                })?;
                let selector = super::selector_query(&pods.selector)?;
                with_selector(
                    format!(
                        "{}/namespaces/{}/pods/*/{}",
                        CUSTOM_METRICS_BASE, namespace, check.metric_name
                    ),
                    &selector,
                )
            }
            MetricTargetType::Object => {
                let object = check.target.object.as_ref().ok_or_else(|| {
                    Error::InvalidConfig(
                        "object target configuration required for Object type".into(),
                    )
                })?;
                let resource = resource_path_segment(&object.ref_.api_version, &object.ref_.kind);
                format!(
                    "{}/namespaces/{}/{}/{}/{}",
                    CUSTOM_METRICS_BASE, namespace, resource, object.ref_.name, check.metric_name
                )
            }
            MetricTargetType::External => {
                return Err(Error::InvalidConfig(
                    "unsupported target type External for custom metrics".into(),
                ));
            }
        };

        let list: MetricValueList = self.get(&path).await?;
        Ok(list.items.iter().map(|i| milli_value(&i.value)).collect())
    }

    async fn external_metric_values(
        &self,
        namespace: &str,
        check: &MetricCheck,
    ) -> Result<Vec<f64>> {
        let selector = match check.target.external.as_ref().and_then(|e| e.selector.as_ref()) {
            Some(selector) => super::selector_query(selector)?,
            None => String::new(),
        };

        let path = with_selector(
            format!(
                "{}/namespaces/{}/{}",
                EXTERNAL_METRICS_BASE, namespace, check.metric_name
            ),
            &selector,
        );

        let list: ExternalMetricValueList = self.get(&path).await?;
        Ok(list.items.iter().map(|i| milli_value(&i.value)).collect())
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = http::Request::builder()
            .uri(path)
            .body(Vec::new())
            .map_err(|e| Error::MetricsApiError(e.to_string()))?;

        self.client
            .request(request)
            .await
            .map_err(|e| Error::MetricsApiError(e.to_string()))
    }
}

fn with_selector(path: String, selector: &str) -> String {
    if selector.is_empty() {
        path
    } else {
        format!(
            "{}?labelSelector={}",
            path,
            utf8_percent_encode(selector, NON_ALPHANUMERIC)
        )
    }
}

/// Resource path segment for the custom metrics API: the lowercase plural,
/// qualified with the API group for non-core kinds.
fn resource_path_segment(api_version: &str, kind: &str) -> String {
    let plural = pluralize(kind);
    match api_version.split_once('/') {
        Some((group, _version)) => format!("{}.{}", plural, group),
        None => plural,
    }
}

/// Naive kind pluralization; matches the adapter's resource naming for
/// common kinds.
fn pluralize(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if lower.ends_with('s') {
        format!("{}es", lower)
    } else if let Some(stem) = lower.strip_suffix('y') {
        format!("{}ies", stem)
    } else {
        format!("{}s", lower)
    }
}

/// Adapter values are fixed-precision decimals; collapse to milli precision
/// the way the adapters' milli representation does.
fn milli_value(value: &Quantity) -> f64 {
    match quantity_to_f64(value) {
        Some(v) => (v * 1000.0).round() / 1000.0,
        None => 0.0,
    }
}

/// Convert a quantity string to a float, honoring decimal and binary SI
/// suffixes.
pub fn quantity_to_f64(quantity: &Quantity) -> Option<f64> {
    let s = quantity.0.trim();
    if s.is_empty() {
        return None;
    }

    // Plain decimals (including exponent forms like "12e3") end in a digit
    // or dot and need no suffix handling.
    if s.ends_with(|c: char| c.is_ascii_digit() || c == '.') {
        return s.parse::<f64>().ok();
    }

    let (number, multiplier): (&str, f64) = if let Some(rest) = s.strip_suffix("Ki") {
        (rest, 1024.0)
    } else if let Some(rest) = s.strip_suffix("Mi") {
        (rest, 1024.0 * 1024.0)
    } else if let Some(rest) = s.strip_suffix("Gi") {
        (rest, 1024.0 * 1024.0 * 1024.0)
    } else if let Some(rest) = s.strip_suffix("Ti") {
        (rest, 1024.0f64.powi(4))
    } else if let Some(rest) = s.strip_suffix('n') {
        (rest, 1e-9)
    } else if let Some(rest) = s.strip_suffix('u') {
        (rest, 1e-6)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 1e-3)
    } else if let Some(rest) = s.strip_suffix('k') {
        (rest, 1e3)
    } else if let Some(rest) = s.strip_suffix('M') {
        (rest, 1e6)
    } else if let Some(rest) = s.strip_suffix('G') {
        (rest, 1e9)
    } else if let Some(rest) = s.strip_suffix('T') {
        (rest, 1e12)
    } else {
        return None;
    };

    number.parse::<f64>().ok().map(|v| v * multiplier)
}

/// Apply a reduce function to a non-empty value set.
pub fn reduce_values(values: &[f64], reduce: ReduceFunction) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    match reduce {
        ReduceFunction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        ReduceFunction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ReduceFunction::Sum => values.iter().sum(),
        ReduceFunction::Avg => values.iter().sum::<f64>() / values.len() as f64,
    }
}

/// Evaluate a threshold comparison.
pub fn compare_threshold(value: f64, threshold: f64, operator: ThresholdOperator) -> bool {
    match operator {
        ThresholdOperator::GreaterThan => value > threshold,
        ThresholdOperator::GreaterThanOrEqual => value >= threshold,
        ThresholdOperator::LessThan => value < threshold,
        ThresholdOperator::LessThanOrEqual => value <= threshold,
    }
}
