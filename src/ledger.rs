//! Per-cycle position ledger and profit accounting.
//!
//! Every executed leg is folded into a `CycleTrade` keyed by
//! (condition id, period timestamp). The ledger also carries the running
//! period/total profit accumulators: expected profit is added when a hedge
//! cycle completes and replaced by the actual settlement profit when the
//! market resolves.

use std::collections::HashMap;

use crate::models::{OutcomeSide, PERIOD_DURATION_SECS};

/// Share counts at or below this are treated as rounding noise at settlement.
pub const DUST_SHARES: f64 = 0.001;

/// Composite key for one market-period cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CycleKey {
    pub condition_id: String,
    pub period_timestamp: i64,
}

impl CycleKey {
    pub fn new(condition_id: &str, period_timestamp: i64) -> Self {
        Self {
            condition_id: condition_id.to_string(),
            period_timestamp,
        }
    }
}

/// Accumulated position for one market-period.
#[derive(Debug, Clone)]
pub struct CycleTrade {
    pub condition_id: String,
    pub period_timestamp: i64,
    pub up_token_id: Option<String>,
    pub down_token_id: Option<String>,
    pub up_shares: f64,
    pub down_shares: f64,
    pub up_avg_price: f64,
    pub down_avg_price: f64,
    /// Profit locked in when the hedge cycle completed; 0.0 for cycles that
    /// never completed a hedge.
    pub expected_profit: f64,
}

impl CycleTrade {
    fn new(condition_id: &str, period_timestamp: i64) -> Self {
        Self {
            condition_id: condition_id.to_string(),
            period_timestamp,
            up_token_id: None,
            down_token_id: None,
            up_shares: 0.0,
            down_shares: 0.0,
            up_avg_price: 0.0,
            down_avg_price: 0.0,
            expected_profit: 0.0,
        }
    }

    fn record_leg(&mut self, side: OutcomeSide, token_id: &str, shares: f64, price: f64) {
        let (total_shares, avg_price, stored_token) = match side {
            OutcomeSide::Up => (
                &mut self.up_shares,
                &mut self.up_avg_price,
                &mut self.up_token_id,
            ),
            OutcomeSide::Down => (
                &mut self.down_shares,
                &mut self.down_avg_price,
                &mut self.down_token_id,
            ),
        };

        let old_total = *total_shares * *avg_price;
        *total_shares += shares;
        *avg_price = if *total_shares > 0.0 {
            (old_total + shares * price) / *total_shares
        } else {
            price
        };
        *stored_token = Some(token_id.to_string());
    }

    /// Realized profit given the resolved winner flags: winning shares pay
    /// out 1 unit each, losing shares forfeit their cost. Dust positions are
    /// ignored.
    pub fn settlement_profit(&self, up_won: bool, down_won: bool) -> f64 {
        let mut profit = 0.0;
        if self.up_shares > DUST_SHARES {
            if up_won {
                profit += self.up_shares * 1.0 - self.up_shares * self.up_avg_price;
            } else {
                profit -= self.up_shares * self.up_avg_price;
            }
        }
        if self.down_shares > DUST_SHARES {
            if down_won {
                profit += self.down_shares * 1.0 - self.down_shares * self.down_avg_price;
            } else {
                profit -= self.down_shares * self.down_avg_price;
            }
        }
        profit
    }
}

/// Ledger of open cycles plus running profit accumulators.
#[derive(Debug, Default)]
pub struct PositionLedger {
    trades: HashMap<CycleKey, CycleTrade>,
    total_profit: f64,
    period_profit: f64,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an executed leg into the cycle's weighted-average position.
    /// Accumulative only: repeated fills add, they never replace history.
    pub fn record_fill(
        &mut self,
        condition_id: &str,
        period_timestamp: i64,
        side: OutcomeSide,
        token_id: &str,
        shares: f64,
        price: f64,
    ) {
        let key = CycleKey::new(condition_id, period_timestamp);
        let trade = self
            .trades
            .entry(key)
            .or_insert_with(|| CycleTrade::new(condition_id, period_timestamp));
        trade.record_leg(side, token_id, shares, price);
    }

    /// Stamp the expected profit on a completed hedge cycle and add it to
    /// both profit accumulators.
    pub fn record_expected_profit(&mut self, key: &CycleKey, expected: f64) {
        if let Some(trade) = self.trades.get_mut(key) {
            trade.expected_profit = expected;
        }
        self.period_profit += expected;
        self.total_profit += expected;
    }

    pub fn get(&self, key: &CycleKey) -> Option<&CycleTrade> {
        self.trades.get(key)
    }

    pub fn open_cycles(&self) -> usize {
        self.trades.len()
    }

    /// Keys of every tracked cycle whose settlement period has ended.
    pub fn due_keys(&self, now: i64) -> Vec<CycleKey> {
        self.trades
            .keys()
            .filter(|k| now >= k.period_timestamp + PERIOD_DURATION_SECS)
            .cloned()
            .collect()
    }

    /// Replace the cycle's expected profit with the actual settlement profit
    /// in both accumulators and retire the trade. Returns the removed trade;
    /// `None` when the cycle was already retired, making repeated
    /// reconciliation a no-op.
    pub fn apply_settlement(&mut self, key: &CycleKey, actual_profit: f64) -> Option<CycleTrade> {
        let trade = self.trades.remove(key)?;
        if trade.expected_profit != 0.0 {
            self.total_profit = self.total_profit - trade.expected_profit + actual_profit;
            self.period_profit = self.period_profit - trade.expected_profit + actual_profit;
        } else {
            self.total_profit += actual_profit;
            self.period_profit += actual_profit;
        }
        Some(trade)
    }

    pub fn total_profit(&self) -> f64 {
        self.total_profit
    }

    pub fn period_profit(&self) -> f64 {
        self.period_profit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COND: &str = "0xc0ffee";
    const PERIOD: i64 = 1_700_000_100;

    #[test]
    fn test_weighted_average_accumulation() {
        let mut ledger = PositionLedger::new();
        ledger.record_fill(COND, PERIOD, OutcomeSide::Up, "tok-up", 5.0, 0.40);
        ledger.record_fill(COND, PERIOD, OutcomeSide::Up, "tok-up", 5.0, 0.60);

        let trade = ledger.get(&CycleKey::new(COND, PERIOD)).unwrap();
        assert!((trade.up_shares - 10.0).abs() < 1e-9);
        assert!((trade.up_avg_price - 0.50).abs() < 1e-9);
        assert_eq!(trade.up_token_id.as_deref(), Some("tok-up"));
        assert_eq!(trade.down_shares, 0.0);
    }

    #[test]
    fn test_first_fill_sets_average_to_price() {
        let mut ledger = PositionLedger::new();
        ledger.record_fill(COND, PERIOD, OutcomeSide::Down, "tok-down", 10.0, 0.37);

        let trade = ledger.get(&CycleKey::new(COND, PERIOD)).unwrap();
        assert!((trade.down_avg_price - 0.37).abs() < 1e-9);
    }

    #[test]
    fn test_settlement_profit_winner_and_loser() {
        let mut ledger = PositionLedger::new();
        ledger.record_fill(COND, PERIOD, OutcomeSide::Up, "tok-up", 10.0, 0.45);
        ledger.record_fill(COND, PERIOD, OutcomeSide::Down, "tok-down", 10.0, 0.50);

        let trade = ledger.get(&CycleKey::new(COND, PERIOD)).unwrap();
        // Up wins: 10 - 4.5 = +5.5; Down loses: -5.0. Net +0.5.
        assert!((trade.settlement_profit(true, false) - 0.5).abs() < 1e-9);
        // Down wins instead: -4.5 + (10 - 5.0) = +0.5 as well (hedged).
        assert!((trade.settlement_profit(false, true) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_settlement_profit_ignores_dust() {
        let mut ledger = PositionLedger::new();
        ledger.record_fill(COND, PERIOD, OutcomeSide::Up, "tok-up", 0.0005, 0.45);

        let trade = ledger.get(&CycleKey::new(COND, PERIOD)).unwrap();
        assert_eq!(trade.settlement_profit(true, false), 0.0);
    }

    #[test]
    fn test_settlement_replaces_expected_profit() {
        let mut ledger = PositionLedger::new();
        let key = CycleKey::new(COND, PERIOD);
        ledger.record_fill(COND, PERIOD, OutcomeSide::Up, "tok-up", 10.0, 0.45);
        ledger.record_expected_profit(&key, 0.5);
        assert!((ledger.total_profit() - 0.5).abs() < 1e-9);

        // Up wins outright: actual profit 10 - 4.5 = 5.5, so the running
        // total moves by +5.0 net.
        let removed = ledger.apply_settlement(&key, 5.5);
        assert!(removed.is_some());
        assert!((ledger.total_profit() - 5.5).abs() < 1e-9);
        assert!((ledger.period_profit() - 5.5).abs() < 1e-9);
    }

    #[test]
    fn test_settlement_without_expected_profit_adds_directly() {
        let mut ledger = PositionLedger::new();
        let key = CycleKey::new(COND, PERIOD);
        // One-legged cycle that never hedged: no expected profit recorded.
        ledger.record_fill(COND, PERIOD, OutcomeSide::Down, "tok-down", 10.0, 0.30);

        ledger.apply_settlement(&key, -3.0);
        assert!((ledger.total_profit() + 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_settlement_is_idempotent() {
        let mut ledger = PositionLedger::new();
        let key = CycleKey::new(COND, PERIOD);
        ledger.record_fill(COND, PERIOD, OutcomeSide::Up, "tok-up", 10.0, 0.45);
        ledger.record_expected_profit(&key, 0.5);

        assert!(ledger.apply_settlement(&key, 5.5).is_some());
        let total_after_first = ledger.total_profit();

        // Second reconciliation: trade already removed, totals untouched.
        assert!(ledger.apply_settlement(&key, 5.5).is_none());
        assert_eq!(ledger.total_profit(), total_after_first);
        assert_eq!(ledger.open_cycles(), 0);
    }

    #[test]
    fn test_due_keys_respects_period_end() {
        let mut ledger = PositionLedger::new();
        ledger.record_fill(COND, PERIOD, OutcomeSide::Up, "tok-up", 10.0, 0.45);

        assert!(ledger.due_keys(PERIOD + 899).is_empty());
        assert_eq!(ledger.due_keys(PERIOD + 900).len(), 1);
    }
}
