//! Pod image-version gate.
//!
//! Walks the pods matched by a label selector, extracts a comparable
//! version from each container's image tag, and fails the gate when any pod
//! runs below the required minimum. Non-semver tags are failures in strict
//! mode and skips otherwise; a population where nothing could be checked
//! never passes vacuously.

use std::cmp::Ordering;
use std::sync::LazyLock;

use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};
use regex::Regex;
use semver::Version;

use crate::controller::error::{Error, Result};
use crate::crd::MinPodVersionCheck;

/// Semver-shaped prefix of an image tag, with optional leading `v`,
/// prerelease, and build metadata.
static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+\.\d+\.\d+(?:-[\w.]+)?(?:\+[\w.]+)?)").expect("version pattern compiles")
});

/// Result of a pod version gate.
#[derive(Debug, Clone, Default)]
pub struct VersionCheckResult {
    pub passed: bool,
    pub message: String,
    /// Pods that failed the check.
    pub failed_pods: Vec<PodVersionInfo>,
    /// Pods skipped for non-semver tags (strict mode off).
    pub skipped_pods: Vec<PodVersionInfo>,
}

/// Version observation for a single pod container.
#[derive(Debug, Clone)]
pub struct PodVersionInfo {
    pub name: String,
    pub namespace: String,
    pub container_name: String,
    pub image: String,
    pub version: String,
}

/// Run every configured version check; the first failing check wins.
pub async fn check_min_pod_versions(
    client: &Client,
    namespace: &str,
    checks: &[MinPodVersionCheck],
) -> Result<VersionCheckResult> {
    for check in checks {
        let result = check_single_pod_version(client, namespace, check).await?;
        if !result.passed {
            return Ok(result);
        }
    }

    Ok(VersionCheckResult {
        passed: true,
        message: "All pod version checks passed".to_string(),
        ..Default::default()
    })
}

async fn check_single_pod_version(
    client: &Client,
    namespace: &str,
    check: &MinPodVersionCheck,
) -> Result<VersionCheckResult> {
    let selector = super::selector_query(&check.selector)?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let mut params = ListParams::default();
    if !selector.is_empty() {
        params = params.labels(&selector);
    }
    let pod_list = pods.list(&params).await?;

    let min_version = parse_version(&check.min_version).ok_or_else(|| {
        Error::InvalidConfig(format!(
            "invalid minimum version {:?}",
            check.min_version
        ))
    })?;

    Ok(evaluate_pods(&pod_list.items, check, &min_version, &selector))
}

/// Evaluate a single check against an already-listed pod population.
pub fn evaluate_pods(
    pods: &[Pod],
    check: &MinPodVersionCheck,
    min_version: &Version,
    selector: &str,
) -> VersionCheckResult {
    if pods.is_empty() {
        return VersionCheckResult {
            passed: false,
            message: format!("No pods found matching selector {:?}", selector),
            ..Default::default()
        };
    }

    let mut failed_pods = Vec::new();
    let mut skipped_pods = Vec::new();
    let mut checked_count = 0usize;

    for pod in pods {
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let pod_ns = pod.metadata.namespace.clone().unwrap_or_default();
        let spec = match &pod.spec {
            Some(spec) => spec,
            None => continue,
        };

        let containers = spec
            .containers
            .iter()
            .chain(spec.init_containers.iter().flatten());

        for container in containers {
            if let Some(wanted) = &check.container_name
                && &container.name != wanted
            {
                continue;
            }

            let image = container.image.clone().unwrap_or_default();
            let mut info = PodVersionInfo {
                name: pod_name.clone(),
                namespace: pod_ns.clone(),
                container_name: container.name.clone(),
                image: image.clone(),
                version: String::new(),
            };

            let Some(image_version) = extract_version_from_image(&image) else {
                info.version = "unknown".to_string();
                if check.strict_mode {
                    failed_pods.push(info);
                } else {
                    skipped_pods.push(info);
                }
                if check.container_name.is_some() {
                    break;
                }
                continue;
            };

            let Some(pod_version) = parse_version(&image_version) else {
                info.version = image_version;
                if check.strict_mode {
                    failed_pods.push(info);
                } else {
                    skipped_pods.push(info);
                }
                if check.container_name.is_some() {
                    break;
                }
                continue;
            };

            info.version = image_version;
            checked_count += 1;

            if pod_version < *min_version {
                failed_pods.push(info);
            }

            // Named container found for this pod; stop scanning the rest.
            if check.container_name.is_some() {
                break;
            }
        }
    }

    if !failed_pods.is_empty() {
        let mut message = format!(
            "{} pod(s) have version below minimum {}",
            failed_pods.len(),
            check.min_version
        );
        if !skipped_pods.is_empty() {
            message.push_str(&format!(
                " ({} skipped due to non-semver tags)",
                skipped_pods.len()
            ));
        }
        return VersionCheckResult {
            passed: false,
            message,
            failed_pods,
            skipped_pods,
        };
    }

    // Everything skipped and nothing checked cannot count as a pass.
    if checked_count == 0 && !skipped_pods.is_empty() {
        return VersionCheckResult {
            passed: false,
            message: format!(
                "No pods with semver tags found ({} skipped); cannot validate versions",
                skipped_pods.len()
            ),
            skipped_pods,
            ..Default::default()
        };
    }

    let mut message = format!(
        "All {} pod(s) meet minimum version {}",
        checked_count, check.min_version
    );
    if !skipped_pods.is_empty() {
        message.push_str(&format!(
            " ({} skipped due to non-semver tags)",
            skipped_pods.len()
        ));
    }
    VersionCheckResult {
        passed: true,
        message,
        skipped_pods,
        ..Default::default()
    }
}

/// Extract a comparable version from an image reference.
///
/// Handles `nginx:1.21.0`, `gcr.io/project/app:v2.1.0`, and
/// `registry.example.com:5000/app:1.0.0-rc1`. Digest-only references,
/// `latest`, and non-numeric tags yield `None`.
pub fn extract_version_from_image(image: &str) -> Option<String> {
    // Drop a digest suffix.
    let image = match image.find('@') {
        Some(idx) => &image[..idx],
        None => image,
    };

    // The tag separator is the last colon after the last slash; a colon
    // before the last slash is a registry port.
    let last_slash = image.rfind('/').map(|i| i as isize).unwrap_or(-1);
    let tag_start = match image.rfind(':') {
        Some(idx) if (idx as isize) > last_slash => idx,
        _ => return None,
    };

    let tag = &image[tag_start + 1..];
    if tag.is_empty() || tag == "latest" {
        return None;
    }

    if let Some(matched) = VERSION_PATTERN.find(tag) {
        return Some(matched.as_str().to_string());
    }

    // Permissive fallback for digit-leading tags like "1.2".
    if tag.starts_with(|c: char| c.is_ascii_digit()) {
        return Some(tag.to_string());
    }

    None
}

/// Parse a version string leniently: a leading `v` is stripped and missing
/// minor/patch components are padded with zeros, so `1.2`-style tags still
/// compare.
fn parse_version(version: &str) -> Option<Version> {
    let version = version.strip_prefix('v').unwrap_or(version);
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }

    // Pad the numeric core to three components, preserving any prerelease
    // or build suffix.
    let suffix_start = version.find(['-', '+']).unwrap_or(version.len());
    let (core, suffix) = version.split_at(suffix_start);
    let dots = core.matches('.').count();
    if dots >= 2 {
        return None;
    }
    let padded = format!("{}{}{}", core, ".0".repeat(2 - dots), suffix);
    Version::parse(&padded).ok()
}

/// Compare two version strings with semver precedence.
pub fn compare_versions(a: &str, b: &str) -> Result<Ordering> {
    let left =
        parse_version(a).ok_or_else(|| Error::InvalidConfig(format!("invalid version {:?}", a)))?;
    let right =
        parse_version(b).ok_or_else(|| Error::InvalidConfig(format!("invalid version {:?}", b)))?;
    Ok(left.cmp(&right))
}

/// Validate that a minimum-version string parses.
pub fn is_valid_min_version(version: &str) -> bool {
    parse_version(version).is_some()
}
