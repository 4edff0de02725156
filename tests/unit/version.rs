//! Pod version gate boundary tests
//!
//! Exercises the gate evaluation against synthetic pod populations: the
//! strict/skip split for non-semver tags, empty populations, and the
//! all-skipped vacuous-pass guard.

use dbupgrade_operator::checks::version::evaluate_pods;
use dbupgrade_operator::checks::{compare_versions, extract_version_from_image};
use dbupgrade_operator::crd::MinPodVersionCheck;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::ObjectMeta;
use semver::Version;

fn pod(name: &str, image: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    }
}

fn check(min_version: &str, strict: bool) -> MinPodVersionCheck {
    MinPodVersionCheck {
        selector: LabelSelector::default(),
        min_version: min_version.to_string(),
        container_name: None,
        strict_mode: strict,
        disallow_downgrade: false,
    }
}

#[test]
fn pods_below_minimum_fail_the_gate() {
    // Pods labeled app=svc run nginx:1.24.0 against a 1.25.0 minimum.
    let pods = vec![pod("svc-0", "nginx:1.24.0"), pod("svc-1", "nginx:1.24.0")];
    let result = evaluate_pods(&pods, &check("1.25.0", true), &Version::new(1, 25, 0), "app=svc");

    assert!(!result.passed);
    assert_eq!(result.failed_pods.len(), 2);
    assert!(result.message.contains("below minimum 1.25.0"));
}

#[test]
fn rolled_pods_pass_the_gate() {
    let pods = vec![pod("svc-0", "nginx:1.25.0"), pod("svc-1", "nginx:1.25.0")];
    let result = evaluate_pods(&pods, &check("1.25.0", true), &Version::new(1, 25, 0), "app=svc");
    assert!(result.passed);
}

#[test]
fn non_semver_tag_strict_counts_as_failure() {
    let pods = vec![pod("svc-0", "nginx:mainline")];
    let result = evaluate_pods(&pods, &check("1.25.0", true), &Version::new(1, 25, 0), "");
    assert!(!result.passed);
    assert_eq!(result.failed_pods.len(), 1);
}

#[test]
fn non_semver_tag_lenient_is_skipped() {
    let pods = vec![pod("svc-0", "nginx:mainline"), pod("svc-1", "nginx:1.26.0")];
    let result = evaluate_pods(&pods, &check("1.25.0", false), &Version::new(1, 25, 0), "");
    assert!(result.passed);
    assert_eq!(result.skipped_pods.len(), 1);
}

#[test]
fn all_skipped_population_never_passes_vacuously() {
    let pods = vec![pod("svc-0", "nginx:mainline"), pod("svc-1", "nginx:latest")];
    let result = evaluate_pods(&pods, &check("1.25.0", false), &Version::new(1, 25, 0), "");
    assert!(!result.passed);
}

#[test]
fn empty_selector_match_fails() {
    let result = evaluate_pods(&[], &check("1.25.0", true), &Version::new(1, 25, 0), "app=nope");
    assert!(!result.passed);
    assert!(result.message.contains("No pods found"));
}

#[test]
fn prerelease_orders_below_release() {
    let pods = vec![pod("svc-0", "app:2.0.0-rc.1")];
    let result = evaluate_pods(&pods, &check("2.0.0", true), &Version::new(2, 0, 0), "");
    assert!(!result.passed);
}

#[test]
fn two_component_tags_still_compare() {
    // The permissive fallback returns "1.26" verbatim; comparison pads it.
    assert_eq!(extract_version_from_image("nginx:1.26"), Some("1.26".to_string()));
    let pods = vec![pod("svc-0", "nginx:1.26")];
    let result = evaluate_pods(&pods, &check("1.25.0", true), &Version::new(1, 25, 0), "");
    assert!(result.passed);
}

#[test]
fn compare_versions_semver_precedence() {
    assert_eq!(
        compare_versions("1.2.3-alpha", "1.2.3").unwrap(),
        std::cmp::Ordering::Less
    );
    assert_eq!(
        compare_versions("v1.25.0", "1.25.0").unwrap(),
        std::cmp::Ordering::Equal
    );
}
