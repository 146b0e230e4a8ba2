//! Critical Path Tests for the Dump-and-Hedge Bot
//!
//! These tests verify the core trading formulas:
//! 1. Dump detection: (old - new) / old >= threshold within a 1-5s span
//! 2. Weighted-average position accumulation
//! 3. Expected profit at hedge time: shares * 1 - total cost
//! 4. Settlement correction: total += actual - expected
//!
//! Run with: cargo test --test hedge_cycle_tests

// ============================================================================
// DUMP DETECTION
// ============================================================================

/// Dump predicate over a (timestamp, price) series: the freshest point at
/// least 3s stale (or the earliest point) must sit `threshold` above the
/// newest point, 1-5 seconds apart.
fn is_dump(points: &[(i64, f64)], now: i64, threshold: f64) -> bool {
    if points.len() < 2 {
        return false;
    }
    let cutoff = now - 3;

    let old = points
        .iter()
        .filter(|(ts, _)| *ts <= cutoff)
        .max_by_key(|(ts, _)| *ts)
        .or_else(|| points.first());
    let new = points.iter().max_by_key(|(ts, _)| *ts);

    let (Some(&(old_ts, old_price)), Some(&(new_ts, new_price))) = (old, new) else {
        return false;
    };
    if old_price <= 0.0 {
        return false;
    }
    let span = new_ts - old_ts;
    if !(1..=5).contains(&span) {
        return false;
    }
    let drop = old_price - new_price;
    drop > 0.0 && drop / old_price >= threshold
}

#[test]
fn test_dump_sharp_drop_detected() {
    // 20% in 3 seconds clears a 15% threshold.
    let points = [(100, 0.50), (101, 0.50), (103, 0.40)];
    assert!(is_dump(&points, 103, 0.15));
}

#[test]
fn test_dump_threshold_inclusive() {
    // Exactly 15%: 0.50 -> 0.425.
    let points = [(100, 0.50), (103, 0.425)];
    assert!(is_dump(&points, 103, 0.15));
}

#[test]
fn test_dump_rejects_six_second_drift() {
    // Same 15% drop, but measured over 6 seconds.
    let points = [(100, 0.50), (106, 0.425)];
    assert!(!is_dump(&points, 106, 0.15));
}

#[test]
fn test_dump_rejects_rise() {
    // A 20% *rise* is not a dump.
    let points = [(100, 0.50), (103, 0.60)];
    assert!(!is_dump(&points, 103, 0.15));
}

#[test]
fn test_dump_rejects_same_second_jitter() {
    let points = [(100, 0.50), (100, 0.40)];
    assert!(!is_dump(&points, 100, 0.15));
}

#[test]
fn test_dump_needs_two_points() {
    assert!(!is_dump(&[(100, 0.50)], 100, 0.15));
    assert!(!is_dump(&[], 100, 0.15));
}

// ============================================================================
// WEIGHTED-AVERAGE POSITION
// ============================================================================

/// Fold a fill into a running (shares, avg_price) position.
fn fold_fill(shares: f64, avg_price: f64, new_shares: f64, price: f64) -> (f64, f64) {
    let old_total = shares * avg_price;
    let total_shares = shares + new_shares;
    let avg = if total_shares > 0.0 {
        (old_total + new_shares * price) / total_shares
    } else {
        price
    };
    (total_shares, avg)
}

#[test]
fn test_weighted_average_two_fills() {
    let (shares, avg) = fold_fill(0.0, 0.0, 5.0, 0.40);
    let (shares, avg) = fold_fill(shares, avg, 5.0, 0.60);
    assert!((shares - 10.0).abs() < 1e-9);
    assert!((avg - 0.50).abs() < 1e-9, "avg should be 0.50, got {avg}");
}

#[test]
fn test_weighted_average_first_fill_is_price() {
    let (shares, avg) = fold_fill(0.0, 0.0, 10.0, 0.37);
    assert_eq!(shares, 10.0);
    assert!((avg - 0.37).abs() < 1e-9);
}

#[test]
fn test_weighted_average_uneven_fills() {
    // 10 @ 0.40 + 30 @ 0.60 = 40 @ 0.55
    let (shares, avg) = fold_fill(10.0, 0.40, 30.0, 0.60);
    assert!((shares - 40.0).abs() < 1e-9);
    assert!((avg - 0.55).abs() < 1e-9);
}

// ============================================================================
// EXPECTED PROFIT AT HEDGE TIME
// ============================================================================

/// A winning share pays out 1 unit; expected profit is the guaranteed payout
/// minus both legs' cost.
fn expected_profit(leg1_price: f64, leg1_shares: f64, leg2_price: f64, leg2_shares: f64) -> f64 {
    let total_cost = leg1_price * leg1_shares + leg2_price * leg2_shares;
    leg2_shares * 1.0 - total_cost
}

#[test]
fn test_expected_profit_hedge_met() {
    // Leg 1 at 0.45, leg 2 at 0.50, 10 shares each: locked profit 0.5.
    let profit = expected_profit(0.45, 10.0, 0.50, 10.0);
    assert!((profit - 0.5).abs() < 1e-9);
}

#[test]
fn test_expected_profit_stop_loss_can_be_negative() {
    // Forced hedge at 0.80 against a 0.50 entry: guaranteed loss of 3.0.
    let profit = expected_profit(0.50, 10.0, 0.80, 10.0);
    assert!((profit + 3.0).abs() < 1e-9);
}

#[test]
fn test_expected_profit_zero_at_parity() {
    // Combined cost of exactly 1.0 per share locks in nothing.
    let profit = expected_profit(0.55, 10.0, 0.45, 10.0);
    assert!(profit.abs() < 1e-9);
}

// ============================================================================
// SETTLEMENT CORRECTION
// ============================================================================

/// Replace the expected profit in a running total with the actual settlement
/// profit; cycles that never completed a hedge carry expected = 0.
fn corrected_total(total: f64, expected: f64, actual: f64) -> f64 {
    if expected != 0.0 {
        total - expected + actual
    } else {
        total + actual
    }
}

#[test]
fn test_settlement_correction_replaces_expected() {
    // Expected 0.5 booked earlier, actual resolution paid 5.5: net +5.0.
    let total = corrected_total(0.5, 0.5, 5.5);
    assert!((total - 5.5).abs() < 1e-9);
}

#[test]
fn test_settlement_correction_one_legged_cycle() {
    // No hedge ever completed: actual profit lands directly.
    let total = corrected_total(0.0, 0.0, -4.5);
    assert!((total + 4.5).abs() < 1e-9);
}

#[test]
fn test_settlement_profit_per_side() {
    // 10 Up shares @ 0.45 average, Up wins: 10*1 - 10*0.45 = 5.5.
    let up_shares = 10.0_f64;
    let up_avg = 0.45_f64;
    let winner_profit = up_shares * 1.0 - up_shares * up_avg;
    assert!((winner_profit - 5.5).abs() < 1e-9);

    // The same side losing forfeits its cost.
    let loser_profit = -(up_shares * up_avg);
    assert!((loser_profit + 4.5).abs() < 1e-9);
}

// ============================================================================
// FULL CYCLE WALKTHROUGH
// ============================================================================

#[test]
fn test_full_dump_hedge_settlement_cycle() {
    let threshold = 0.15_f64;
    let sum_target = 0.95_f64;
    let shares = 10.0_f64;

    // Step 1: the Up book collapses 0.50 -> 0.40 in 3 seconds.
    let tape = [(100, 0.50), (101, 0.50), (102, 0.49), (103, 0.40)];
    assert!(is_dump(&tape, 103, threshold), "dump should qualify");

    // Step 2: leg 1 fills at the dumped ask.
    let leg1_price = 0.40_f64;
    let (leg1_shares, leg1_avg) = fold_fill(0.0, 0.0, shares, leg1_price);

    // Step 3: the opposite ask cheapens until the sum target is met.
    let opposite_ask = 0.55_f64;
    assert!(leg1_price + opposite_ask <= sum_target);

    // Step 4: hedge fills, locking in the spread.
    let locked = expected_profit(leg1_avg, leg1_shares, opposite_ask, shares);
    assert!((locked - 0.5).abs() < 1e-9);

    // Step 5: Up resolves as the winner; the correction replaces the
    // locked-in estimate with the realized number.
    let actual = (shares * 1.0 - shares * leg1_avg) - shares * opposite_ask;
    assert!((actual - 0.5).abs() < 1e-9, "hedged book pays the spread");
    let total = corrected_total(locked, locked, actual);
    assert!((total - actual).abs() < 1e-9);
}
