//! Settlement reconciliation for completed market-periods.
//!
//! Runs on its own timer, independent of the per-market poll loops. Every
//! tracked cycle whose period has ended is checked against the resolved
//! market: winning positions are redeemed on-chain (live mode) and the
//! expected profit recorded at hedge time is replaced by the realized
//! outcome. Reconciliation is the only path that removes a cycle from the
//! ledger.

use anyhow::Result;
use tracing::warn;

use crate::ledger::DUST_SHARES;
use crate::models::PERIOD_DURATION_SECS;
use crate::trader::DumpHedgeTrader;

impl DumpHedgeTrader {
    /// Sweep every due cycle once. Markets that have not resolved yet are
    /// deferred to the next sweep; a second sweep over an already-settled
    /// cycle is a no-op.
    pub async fn check_market_closures(&mut self, now: i64) -> Result<()> {
        for key in self.ledger.due_keys(now) {
            // The settled flag lives on the cycle state for this exact
            // (condition, period); a rolled-over state never matches.
            let already_settled = self
                .market_states
                .get(&key.condition_id)
                .map(|s| s.period_timestamp == key.period_timestamp && s.settled)
                .unwrap_or(false);
            if already_settled {
                continue;
            }

            let Some(trade) = self.ledger.get(&key).cloned() else {
                continue;
            };

            let short_id = &trade.condition_id[..8.min(trade.condition_id.len())];
            let since_close = now - (trade.period_timestamp + PERIOD_DURATION_SECS);
            self.log_event(&format!(
                "Market {short_id} closed {}m {}s ago | Checking resolution...",
                since_close / 60,
                since_close % 60
            ));

            let details = match self.api.get_market_details(&key.condition_id).await {
                Ok(details) => details,
                Err(e) => {
                    warn!("Failed to fetch market {short_id}: {e}");
                    continue;
                }
            };

            if !details.closed {
                self.log_event(&format!("Market {short_id} not yet closed, will retry"));
                continue;
            }
            self.log_event(&format!("Market {short_id} is closed and resolved"));

            let winner_of = |token_id: &Option<String>| -> bool {
                token_id.as_deref().is_some_and(|id| {
                    details.tokens.iter().any(|t| t.token_id == id && t.winner)
                })
            };
            let up_won = winner_of(&trade.up_token_id);
            let down_won = winner_of(&trade.down_token_id);

            if trade.up_shares > DUST_SHARES {
                if up_won {
                    self.redeem_side(&key.condition_id, trade.up_token_id.as_deref(), "Up")
                        .await;
                    let value = trade.up_shares * 1.0;
                    let cost = trade.up_avg_price * trade.up_shares;
                    self.log_event(&format!(
                        "Market Closed - Up Winner: {:.2} @ ${:.4} | Profit: ${:.2}",
                        trade.up_shares,
                        trade.up_avg_price,
                        value - cost
                    ));
                } else {
                    self.log_event(&format!(
                        "Market Closed - Up Lost: {:.2} @ ${:.4}",
                        trade.up_shares, trade.up_avg_price
                    ));
                }
            }

            if trade.down_shares > DUST_SHARES {
                if down_won {
                    self.redeem_side(&key.condition_id, trade.down_token_id.as_deref(), "Down")
                        .await;
                    let value = trade.down_shares * 1.0;
                    let cost = trade.down_avg_price * trade.down_shares;
                    self.log_event(&format!(
                        "Market Closed - Down Winner: {:.2} @ ${:.4} | Profit: ${:.2}",
                        trade.down_shares,
                        trade.down_avg_price,
                        value - cost
                    ));
                } else {
                    self.log_event(&format!(
                        "Market Closed - Down Lost: {:.2} @ ${:.4}",
                        trade.down_shares, trade.down_avg_price
                    ));
                }
            }

            let actual_profit = trade.settlement_profit(up_won, down_won);
            self.ledger.apply_settlement(&key, actual_profit);

            self.log_event(&format!(
                "Period Profit: ${:.2} | Total Profit: ${:.2}",
                self.period_profit(),
                self.total_profit()
            ));

            if let Some(state) = self.market_states.get_mut(&key.condition_id) {
                if state.period_timestamp == key.period_timestamp {
                    state.settled = true;
                }
            }
            self.log_event("Trade removed from tracking");
        }
        Ok(())
    }

    /// Redeem a winning side on-chain. Failures are logged and swallowed:
    /// the position was economically won, so profit accounting proceeds and
    /// redemption can be retried manually.
    async fn redeem_side(&self, condition_id: &str, token_id: Option<&str>, outcome: &str) {
        if self.simulation {
            return;
        }
        let (Some(executor), Some(token_id)) = (self.executor.as_ref(), token_id) else {
            return;
        };
        match executor
            .redeem_winning_position(condition_id, token_id, outcome)
            .await
        {
            Ok(receipt) => self.log_event(&format!("Redeemed {outcome} position. Tx: {}", receipt.tx_hash)),
            Err(e) => warn!("Failed to redeem {outcome} token: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ledger::{CycleKey, PositionLedger};
    use crate::models::OutcomeSide;
    use crate::polymarket::MarketDetails;

    const COND: &str = "0xfeedbeef";
    const PERIOD: i64 = 1_700_000_100;

    fn winner_of(details: &MarketDetails, token_id: Option<&str>) -> bool {
        token_id.is_some_and(|id| details.tokens.iter().any(|t| t.token_id == id && t.winner))
    }

    fn resolved_details(up_wins: bool) -> MarketDetails {
        serde_json::from_str(&format!(
            r#"{{
                "closed": true,
                "tokens": [
                    {{"token_id": "111", "outcome": "Up", "winner": {}}},
                    {{"token_id": "222", "outcome": "Down", "winner": {}}}
                ]
            }}"#,
            up_wins, !up_wins
        ))
        .unwrap()
    }

    #[test]
    fn test_winner_matching_by_token_id() {
        let details = resolved_details(true);
        assert!(winner_of(&details, Some("111")));
        assert!(!winner_of(&details, Some("222")));
        // Unknown token or never-traded side resolves to a loss.
        assert!(!winner_of(&details, Some("999")));
        assert!(!winner_of(&details, None));
    }

    #[test]
    fn test_full_settlement_flow_corrects_totals() {
        // Hedged cycle: Up 10 @ 0.45, Down 10 @ 0.50, expected 0.5 locked in.
        let mut ledger = PositionLedger::new();
        let key = CycleKey::new(COND, PERIOD);
        ledger.record_fill(COND, PERIOD, OutcomeSide::Up, "111", 10.0, 0.45);
        ledger.record_fill(COND, PERIOD, OutcomeSide::Down, "222", 10.0, 0.50);
        ledger.record_expected_profit(&key, 0.5);

        let details = resolved_details(true);
        let trade = ledger.get(&key).unwrap().clone();
        let up_won = winner_of(&details, trade.up_token_id.as_deref());
        let down_won = winner_of(&details, trade.down_token_id.as_deref());
        let actual = trade.settlement_profit(up_won, down_won);

        // Up pays out 10, cost was 9.5 total: actual +0.5 equals expected.
        assert!((actual - 0.5).abs() < 1e-9);
        ledger.apply_settlement(&key, actual);
        assert!((ledger.total_profit() - 0.5).abs() < 1e-9);
        assert_eq!(ledger.open_cycles(), 0);
    }

    #[test]
    fn test_one_legged_settlement_uses_actual_only() {
        // Leg 1 filled, market resolved against it before any hedge:
        // expected profit was never recorded.
        let mut ledger = PositionLedger::new();
        let key = CycleKey::new(COND, PERIOD);
        ledger.record_fill(COND, PERIOD, OutcomeSide::Up, "111", 10.0, 0.45);

        let details = resolved_details(false);
        let trade = ledger.get(&key).unwrap().clone();
        let actual = trade.settlement_profit(
            winner_of(&details, trade.up_token_id.as_deref()),
            winner_of(&details, trade.down_token_id.as_deref()),
        );

        assert!((actual + 4.5).abs() < 1e-9);
        ledger.apply_settlement(&key, actual);
        assert!((ledger.total_profit() + 4.5).abs() < 1e-9);
    }
}
