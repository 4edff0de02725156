// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property-based tests for the DBUpgrade operator
//!
//! These tests use proptest to verify that:
//! 1. Fingerprinting is deterministic and sensitive to spec edits
//! 2. Image-tag parsing never panics on arbitrary input
//! 3. Metric reduction and threshold comparison behave consistently
//! 4. Quantity parsing is total over arbitrary strings

use proptest::prelude::*;

use dbupgrade_operator::checks::metrics::{compare_threshold, reduce_values};
use dbupgrade_operator::checks::{extract_version_from_image, quantity_to_f64};
use dbupgrade_operator::controller::spec_fingerprint;
use dbupgrade_operator::crd::{DBUpgradeSpec, ReduceFunction, ThresholdOperator};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

// =============================================================================
// Strategy generators
// =============================================================================

/// Generate plausible image references
fn image_ref() -> impl Strategy<Value = String> {
    "[a-z]{1,10}(/[a-z]{1,10})?(:[a-zA-Z0-9._-]{1,12})?"
}

/// Generate a valid self-hosted spec with the given image
fn spec_with_image(image: &str) -> DBUpgradeSpec {
    serde_json::from_value(serde_json::json!({
        "migrations": {"image": image},
        "database": {
            "type": "selfHosted",
            "connection": {"urlSecretRef": {"name": "db-secret", "key": "url"}}
        }
    }))
    .unwrap()
}

fn reduce_function() -> impl Strategy<Value = ReduceFunction> {
    prop_oneof![
        Just(ReduceFunction::Max),
        Just(ReduceFunction::Min),
        Just(ReduceFunction::Sum),
        Just(ReduceFunction::Avg),
    ]
}

proptest! {
    #[test]
    fn fingerprint_is_deterministic(image in image_ref()) {
        let spec = spec_with_image(&image);
        prop_assert_eq!(spec_fingerprint(&spec), spec_fingerprint(&spec.clone()));
        prop_assert_eq!(spec_fingerprint(&spec).len(), 8);
    }

    #[test]
    fn fingerprint_differs_for_distinct_images(a in image_ref(), b in image_ref()) {
        prop_assume!(a != b);
        let spec_a = spec_with_image(&a);
        let spec_b = spec_with_image(&b);
        prop_assert_ne!(spec_fingerprint(&spec_a), spec_fingerprint(&spec_b));
    }

    #[test]
    fn tag_extraction_never_panics(image in ".{0,60}") {
        let _ = extract_version_from_image(&image);
    }

    #[test]
    fn extracted_versions_start_with_digit_or_v(image in image_ref()) {
        if let Some(version) = extract_version_from_image(&image) {
            let first = version.chars().next().unwrap();
            prop_assert!(first == 'v' || first.is_ascii_digit());
        }
    }

    #[test]
    fn quantity_parsing_is_total(s in ".{0,20}") {
        let _ = quantity_to_f64(&Quantity(s));
    }

    #[test]
    fn reduction_stays_within_bounds(
        values in prop::collection::vec(-1e6f64..1e6, 1..20),
        reduce in reduce_function(),
    ) {
        let reduced = reduce_values(&values, reduce);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        match reduce {
            ReduceFunction::Sum => prop_assert!(reduced.is_finite()),
            _ => prop_assert!(reduced >= min - 1e-9 && reduced <= max + 1e-9),
        }
    }

    #[test]
    fn min_never_exceeds_avg_never_exceeds_max(
        values in prop::collection::vec(-1e6f64..1e6, 1..20),
    ) {
        let min = reduce_values(&values, ReduceFunction::Min);
        let avg = reduce_values(&values, ReduceFunction::Avg);
        let max = reduce_values(&values, ReduceFunction::Max);
        prop_assert!(min <= avg + 1e-9);
        prop_assert!(avg <= max + 1e-9);
    }

    #[test]
    fn threshold_operators_partition_the_line(value in -1e6f64..1e6, threshold in -1e6f64..1e6) {
        let gt = compare_threshold(value, threshold, ThresholdOperator::GreaterThan);
        let lte = compare_threshold(value, threshold, ThresholdOperator::LessThanOrEqual);
        prop_assert_ne!(gt, lte);

        let lt = compare_threshold(value, threshold, ThresholdOperator::LessThan);
        let gte = compare_threshold(value, threshold, ThresholdOperator::GreaterThanOrEqual);
        prop_assert_ne!(lt, gte);
    }
}
