//! Property-based tests for quantization laws

use super::{fit, fit_parallel, transform, FeatureBounds, QuantizerConfig, MAX_BIT_WIDTH};
use proptest::prelude::*;

fn arb_bounds() -> impl Strategy<Value = FeatureBounds> {
    (-1e9f64..1e9, 0.0f64..1e9, 1u8..=MAX_BIT_WIDTH).prop_map(|(min, span, bit_width)| {
        FeatureBounds::new("f", min, min + span, bit_width).unwrap()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_transform_stays_in_domain(bounds in arb_bounds(), value in any::<f64>()) {
        let q = transform(value, &bounds);
        prop_assert!(q <= bounds.max_code());
    }

    #[test]
    fn prop_boundaries_are_exact(bounds in arb_bounds()) {
        prop_assume!(!bounds.is_degenerate());
        prop_assert_eq!(transform(bounds.min(), &bounds), 0);
        prop_assert_eq!(transform(bounds.max(), &bounds), bounds.max_code());
    }

    #[test]
    fn prop_wide_bounds_are_exact(
        min in -1e308f64..0.0,
        max in 0.0f64..1e308,
        value in any::<f64>(),
        bit_width in 1u8..=MAX_BIT_WIDTH,
    ) {
        let bounds = FeatureBounds::new("f", min, max, bit_width).unwrap();
        prop_assert_eq!(transform(min, &bounds), 0);
        prop_assert_eq!(transform(max, &bounds), bounds.max_code());
        prop_assert!(transform(value, &bounds) <= bounds.max_code());
    }

    #[test]
    fn prop_degenerate_is_zero(
        at in -1e9f64..1e9,
        value in any::<f64>(),
        bit_width in 1u8..=MAX_BIT_WIDTH,
    ) {
        let bounds = FeatureBounds::new("f", at, at, bit_width).unwrap();
        prop_assert_eq!(transform(value, &bounds), 0);
    }

    #[test]
    fn prop_monotonic(bounds in arb_bounds(), a in -2e9f64..2e9, b in -2e9f64..2e9) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(transform(lo, &bounds) <= transform(hi, &bounds));
    }

    #[test]
    fn prop_parallel_fit_matches_sequential(
        column in proptest::collection::vec(-1e6f64..1e6, 1..2000),
        chunk in 1usize..300,
    ) {
        let config = QuantizerConfig::default();
        let sequential = fit("f", &column, config).unwrap();
        let parallel = fit_parallel("f", &column, config, chunk).unwrap();
        prop_assert_eq!(sequential, parallel);
    }

    #[test]
    fn prop_fitted_column_covers_domain(
        column in proptest::collection::vec(-1e6f64..1e6, 1..500),
    ) {
        let bounds = fit("f", &column, QuantizerConfig::default()).unwrap();
        for &value in &column {
            prop_assert!(bounds.contains(transform(value, &bounds)));
        }
    }
}
