// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use dashstore_core::entity::RegressionMode;
use dashstore_stats::StatSummary;
use proptest::prelude::*;
use rand::{Rng, SeedableRng};

fn two_pass(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ssd: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (mean, ssd)
}

fn close(actual: f64, expected: f64, scale: f64) -> bool {
    (actual - expected).abs() <= 1e-9 * (expected.abs() + scale)
}

fn summary(values: &[f64]) -> StatSummary {
    StatSummary::from_values("x", RegressionMode::LowerIsBetter, values)
}

fn assert_same(a: &StatSummary, b: &StatSummary, scale: f64) {
    assert_eq!(a.count(), b.count());
    assert!(close(a.mean(), b.mean(), scale), "mean {} vs {}", a.mean(), b.mean());
    assert!(
        close(a.sum_squared_deviation(), b.sum_squared_deviation(), scale * scale),
        "ssd {} vs {}",
        a.sum_squared_deviation(),
        b.sum_squared_deviation()
    );
    assert_eq!(a.min(), b.min());
    assert_eq!(a.max(), b.max());
}

#[test]
fn test_large_stream_matches_two_pass() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let values: Vec<f64> = (0..10_000).map(|_| 1_000.0 + rng.gen_range(-50.0..50.0)).collect();
    let (mean, ssd) = two_pass(&values);
    let s = summary(&values);

    assert_eq!(s.count(), 10_000);
    assert!(close(s.mean(), mean, 0.0));
    assert!(close(s.sum_squared_deviation(), ssd, 0.0));
    assert!(close(s.variance(), ssd / 9_999.0, 0.0));
}

#[test]
fn test_rollup_of_ten_thousand_singletons() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let values: Vec<f64> = (0..10_000).map(|_| rng.gen_range(0.0..5_000.0)).collect();
    let singles: Vec<StatSummary> = values.iter().map(|v| summary(&[*v])).collect();
    let merged = StatSummary::merge_all("x", RegressionMode::LowerIsBetter, &singles);
    assert_same(&merged, &summary(&values), 5_000.0);
}

proptest! {
    #[test]
    fn prop_update_matches_two_pass(values in prop::collection::vec(-1_000.0f64..1_000.0, 2..2_000)) {
        let (mean, ssd) = two_pass(&values);
        let s = summary(&values);
        prop_assert_eq!(s.count(), values.len() as u64);
        prop_assert!(close(s.mean(), mean, 1_000.0));
        prop_assert!(close(s.sum_squared_deviation(), ssd, 1_000.0 * 1_000.0));
        prop_assert!(s.variance() >= 0.0);
    }

    #[test]
    fn prop_merge_equals_concatenation(
        values in prop::collection::vec(-1_000.0f64..1_000.0, 1..500),
        split in 0usize..500,
    ) {
        // Skewed splits (empty or single-element sides) included.
        let split = split.min(values.len());
        let mut left = summary(&values[..split]);
        left.merge(&summary(&values[split..]));
        assert_same(&left, &summary(&values), 1_000.0);
    }

    #[test]
    fn prop_merge_is_associative(
        a in prop::collection::vec(0.0f64..100.0, 0..50),
        b in prop::collection::vec(0.0f64..100.0, 0..50),
        c in prop::collection::vec(0.0f64..100.0, 0..50),
    ) {
        let mut left = summary(&a);
        left.merge(&summary(&b));
        left.merge(&summary(&c));

        let mut bc = summary(&b);
        bc.merge(&summary(&c));
        let mut right = summary(&a);
        right.merge(&bc);

        assert_same(&left, &right, 100.0);
    }

    #[test]
    fn prop_merge_is_commutative(
        a in prop::collection::vec(-1_000.0f64..1_000.0, 0..5),
        b in prop::collection::vec(-1_000.0f64..1_000.0, 0..1_000),
    ) {
        // One side tiny, the other up to a thousand values.
        let mut ab = summary(&a);
        ab.merge(&summary(&b));
        let mut ba = summary(&b);
        ba.merge(&summary(&a));
        assert_same(&ab, &ba, 1_000.0);
    }

    #[test]
    fn prop_singleton_merge_equals_update(values in prop::collection::vec(-50.0f64..50.0, 1..200)) {
        let mut merged = StatSummary::new("x", RegressionMode::LowerIsBetter);
        for v in &values {
            merged.merge(&summary(&[*v]));
        }
        assert_same(&merged, &summary(&values), 50.0);
    }

    #[test]
    fn prop_stored_form_is_lossless(values in prop::collection::vec(-10.0f64..10.0, 1..50)) {
        let s = summary(&values);
        let back = StatSummary::from_stored(&s.to_stored(), s.regression_mode());
        prop_assert_eq!(back, s);
    }
}
