//! Dump-and-hedge trading state machine.
//!
//! One `MarketCycleState` per tracked market-period walks through
//! watch -> wait-for-hedge -> complete. A qualifying one-sided price dump
//! buys the dropped side; the opposite side is bought once the combined
//! per-share cost falls under the sum target, or force-bought at the
//! stop-loss deadline. Executed legs land in the `PositionLedger`;
//! settlement reconciliation (settlement.rs) retires completed cycles.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::StrategyConfig;
use crate::executor::Executor;
use crate::history::HistoryLog;
use crate::ledger::{CycleKey, PositionLedger};
use crate::models::{MarketSnapshot, OutcomeSide};
use crate::polymarket::PolymarketClient;
use crate::price_history::PriceHistory;

/// Both legs of a completed hedge cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub leg1_side: OutcomeSide,
    pub leg1_entry_price: f64,
    pub leg1_shares: f64,
    pub leg2_side: OutcomeSide,
    pub leg2_entry_price: f64,
    pub leg2_shares: f64,
    pub total_cost: f64,
}

/// Phase of one market-period cycle. Transitions are one-directional.
#[derive(Debug, Clone, PartialEq)]
pub enum TradingPhase {
    /// Post-open watch window is active (or expired with no fill).
    WatchingForDump { round_start: i64, window_end: i64 },
    /// Leg 1 filled, awaiting a cheap enough opposite leg.
    WaitingForHedge {
        leg1_side: OutcomeSide,
        leg1_token_id: String,
        leg1_entry_price: f64,
        leg1_shares: f64,
        leg1_timestamp: i64,
    },
    /// Both legs filled, or the cycle was discovered past its window
    /// (`summary: None`). Nothing left to do until settlement.
    CycleComplete { summary: Option<CycleSummary> },
}

/// Per market-period tracking state.
#[derive(Debug)]
pub struct MarketCycleState {
    pub condition_id: String,
    pub period_timestamp: i64,
    pub up_token_id: Option<String>,
    pub down_token_id: Option<String>,
    pub up_history: PriceHistory,
    pub down_history: PriceHistory,
    pub phase: TradingPhase,
    pub settled: bool,
}

/// The dump-and-hedge state machine over all tracked markets.
pub struct DumpHedgeTrader {
    pub(crate) api: Arc<PolymarketClient>,
    pub(crate) executor: Option<Arc<Executor>>,
    pub(crate) history: Arc<HistoryLog>,
    pub(crate) simulation: bool,
    shares_per_leg: f64,
    sum_target: f64,
    move_threshold: f64,
    watch_window_minutes: i64,
    stop_loss_max_wait_minutes: i64,
    pub(crate) market_states: HashMap<String, MarketCycleState>,
    pub(crate) ledger: PositionLedger,
}

impl DumpHedgeTrader {
    pub fn new(
        api: Arc<PolymarketClient>,
        executor: Option<Arc<Executor>>,
        history: Arc<HistoryLog>,
        simulation: bool,
        strategy: &StrategyConfig,
    ) -> Self {
        Self {
            api,
            executor,
            history,
            simulation,
            shares_per_leg: strategy.shares_per_leg,
            sum_target: strategy.sum_target,
            move_threshold: strategy.move_threshold,
            watch_window_minutes: strategy.watch_window_minutes,
            stop_loss_max_wait_minutes: strategy.stop_loss_max_wait_minutes,
            market_states: HashMap::new(),
            ledger: PositionLedger::new(),
        }
    }

    /// Log a trading event to the console and the history file.
    pub(crate) fn log_event(&self, message: &str) {
        info!("{message}");
        self.history.append_line(message);
    }

    pub fn total_profit(&self) -> f64 {
        self.ledger.total_profit()
    }

    pub fn period_profit(&self) -> f64 {
        self.ledger.period_profit()
    }

    pub fn open_cycles(&self) -> usize {
        self.ledger.open_cycles()
    }

    /// Drop all per-market state for a fresh settlement period. Open ledger
    /// entries survive; only settlement reconciliation retires them.
    pub fn reset_period(&mut self) {
        self.market_states.clear();
        self.log_event("Dump-hedge trader: period reset");
    }

    /// Process one polled snapshot for its market-period.
    pub async fn process_snapshot(&mut self, snapshot: &MarketSnapshot, now: i64) -> Result<()> {
        let condition_id = snapshot.condition_id.clone();
        let period = snapshot.period_timestamp;
        let market_name = snapshot.market_name.clone();

        self.ensure_cycle_state(&market_name, &condition_id, period, now);

        let up_ask = snapshot.up_ask();
        let down_ask = snapshot.down_ask();

        let (phase, up_token, down_token) = {
            let Some(state) = self.market_states.get_mut(&condition_id) else {
                return Ok(());
            };
            if let Some(quote) = &snapshot.up {
                state.up_token_id = Some(quote.token_id.clone());
            }
            if let Some(quote) = &snapshot.down {
                state.down_token_id = Some(quote.token_id.clone());
            }

            // A missing or zero ask would read as a 100% dump; skip the tick
            // without feeding the trackers.
            if up_ask <= 0.0 || down_ask <= 0.0 {
                return Ok(());
            }
            state.up_history.observe(now, up_ask);
            state.down_history.observe(now, down_ask);

            (
                state.phase.clone(),
                state.up_token_id.clone(),
                state.down_token_id.clone(),
            )
        };

        match phase {
            TradingPhase::WatchingForDump { window_end, .. } => {
                // Window expired with no dump: intentional terminal no-op.
                if now > window_end {
                    return Ok(());
                }
                self.check_for_dump(
                    &market_name,
                    &condition_id,
                    period,
                    now,
                    up_ask,
                    down_ask,
                    up_token,
                    down_token,
                )
                .await
            }
            TradingPhase::WaitingForHedge {
                leg1_side,
                leg1_entry_price,
                leg1_shares,
                leg1_timestamp,
                ..
            } => {
                let opposite_side = leg1_side.opposite();
                let (opposite_ask, opposite_token) = match opposite_side {
                    OutcomeSide::Up => (up_ask, up_token),
                    OutcomeSide::Down => (down_ask, down_token),
                };
                self.try_hedge(
                    &market_name,
                    &condition_id,
                    period,
                    now,
                    leg1_side,
                    leg1_entry_price,
                    leg1_shares,
                    leg1_timestamp,
                    opposite_side,
                    opposite_ask,
                    opposite_token,
                )
                .await
            }
            TradingPhase::CycleComplete { .. } => Ok(()),
        }
    }

    /// Create or replace the cycle state when a new period timestamp shows up
    /// for this market.
    fn ensure_cycle_state(&mut self, market_name: &str, condition_id: &str, period: i64, now: i64) {
        let fresh = match self.market_states.get(condition_id) {
            Some(state) => state.period_timestamp != period,
            None => true,
        };
        if !fresh {
            return;
        }

        let round_start = period;
        let window_end = round_start + self.watch_window_minutes * 60;
        let phase = if now <= window_end {
            self.log_event(&format!(
                "{market_name}: New round started (period: {period}) | Watch window: {} minutes (active)",
                self.watch_window_minutes
            ));
            TradingPhase::WatchingForDump {
                round_start,
                window_end,
            }
        } else {
            self.log_event(&format!(
                "{market_name}: New round detected (period: {period}) | Watch window already passed"
            ));
            TradingPhase::CycleComplete { summary: None }
        };

        self.market_states.insert(
            condition_id.to_string(),
            MarketCycleState {
                condition_id: condition_id.to_string(),
                period_timestamp: period,
                up_token_id: None,
                down_token_id: None,
                up_history: PriceHistory::new(),
                down_history: PriceHistory::new(),
                phase,
                settled: false,
            },
        );
    }

    /// Watch phase: first side to show a qualifying dump gets bought. Up is
    /// checked first and wins a same-tick tie.
    #[allow(clippy::too_many_arguments)]
    async fn check_for_dump(
        &mut self,
        market_name: &str,
        condition_id: &str,
        period: i64,
        now: i64,
        up_ask: f64,
        down_ask: f64,
        up_token: Option<String>,
        down_token: Option<String>,
    ) -> Result<()> {
        let dumped = [
            (OutcomeSide::Up, up_ask, up_token),
            (OutcomeSide::Down, down_ask, down_token),
        ]
        .into_iter()
        .find(|(side, _, _)| {
            let Some(state) = self.market_states.get(condition_id) else {
                return false;
            };
            let tracker = match side {
                OutcomeSide::Up => &state.up_history,
                OutcomeSide::Down => &state.down_history,
            };
            tracker.is_dump(now, self.move_threshold)
        });

        let Some((side, ask, Some(token_id))) = dumped else {
            return Ok(());
        };

        self.log_event(&format!(
            "{market_name}: {} dump detected! Buying {} shares @ ${ask:.4}",
            side.label().to_uppercase(),
            self.shares_per_leg
        ));

        self.execute_buy(market_name, side, &token_id, self.shares_per_leg, ask)
            .await?;
        self.ledger
            .record_fill(condition_id, period, side, &token_id, self.shares_per_leg, ask);
        self.set_phase(
            condition_id,
            TradingPhase::WaitingForHedge {
                leg1_side: side,
                leg1_token_id: token_id,
                leg1_entry_price: ask,
                leg1_shares: self.shares_per_leg,
                leg1_timestamp: now,
            },
        );
        Ok(())
    }

    /// Hedge phase: stop-loss first, then the sum-target hedge, otherwise a
    /// throttled wait line.
    #[allow(clippy::too_many_arguments)]
    async fn try_hedge(
        &mut self,
        market_name: &str,
        condition_id: &str,
        period: i64,
        now: i64,
        leg1_side: OutcomeSide,
        leg1_entry_price: f64,
        leg1_shares: f64,
        leg1_timestamp: i64,
        opposite_side: OutcomeSide,
        opposite_ask: f64,
        opposite_token: Option<String>,
    ) -> Result<()> {
        let elapsed_minutes = (now - leg1_timestamp) / 60;
        let total_price = leg1_entry_price + opposite_ask;

        if elapsed_minutes >= self.stop_loss_max_wait_minutes {
            let Some(token_id) = opposite_token else {
                return Ok(());
            };
            self.log_event(&format!(
                "{market_name}: STOP LOSS TRIGGERED (hedge not met after {} minutes) | Buying opposite to hedge",
                self.stop_loss_max_wait_minutes
            ));
            // Leg-1 share count keeps both legs balanced; price is whatever
            // the book asks.
            return self
                .complete_cycle(
                    market_name,
                    condition_id,
                    period,
                    leg1_side,
                    leg1_entry_price,
                    leg1_shares,
                    opposite_side,
                    &token_id,
                    opposite_ask,
                    leg1_shares,
                    true,
                )
                .await;
        }

        if total_price <= self.sum_target {
            if let Some(token_id) = opposite_token {
                self.log_event(&format!(
                    "{market_name}: Hedge condition met! Leg1: ${leg1_entry_price:.4} + Opposite: ${opposite_ask:.4} = ${total_price:.4} <= {}",
                    self.sum_target
                ));
                self.log_event(&format!(
                    "{market_name}: Buying {} {} shares @ ${opposite_ask:.4} (Leg 2)",
                    self.shares_per_leg,
                    opposite_side.label()
                ));
                return self
                    .complete_cycle(
                        market_name,
                        condition_id,
                        period,
                        leg1_side,
                        leg1_entry_price,
                        leg1_shares,
                        opposite_side,
                        &token_id,
                        opposite_ask,
                        self.shares_per_leg,
                        false,
                    )
                    .await;
            }
        }

        // Once every 10 whole seconds, not every tick.
        if now % 10 == 0 {
            self.log_event(&format!(
                "{market_name}: Waiting for hedge... Leg1: ${leg1_entry_price:.4} + {}: ${opposite_ask:.4} = ${total_price:.4} (need <= {}) | Wait: {elapsed_minutes}m",
                opposite_side.label(),
                self.sum_target
            ));
        }
        Ok(())
    }

    /// Buy leg 2, record it, lock in the expected profit, and finish the
    /// cycle.
    #[allow(clippy::too_many_arguments)]
    async fn complete_cycle(
        &mut self,
        market_name: &str,
        condition_id: &str,
        period: i64,
        leg1_side: OutcomeSide,
        leg1_entry_price: f64,
        leg1_shares: f64,
        leg2_side: OutcomeSide,
        leg2_token_id: &str,
        leg2_price: f64,
        leg2_shares: f64,
        stop_loss: bool,
    ) -> Result<()> {
        self.execute_buy(market_name, leg2_side, leg2_token_id, leg2_shares, leg2_price)
            .await?;
        self.ledger
            .record_fill(condition_id, period, leg2_side, leg2_token_id, leg2_shares, leg2_price);

        let total_cost = leg1_entry_price * leg1_shares + leg2_price * leg2_shares;
        let total_price_per_share = leg1_entry_price + leg2_price;
        // Winning shares pay out 1 unit each.
        let expected_profit = leg2_shares * 1.0 - total_cost;
        let profit_percent = if total_price_per_share > 0.0 {
            (1.0 - total_price_per_share) / total_price_per_share * 100.0
        } else {
            0.0
        };

        if stop_loss {
            self.log_event(&format!(
                "{market_name}: Stop loss hedge complete! Expected profit: ${expected_profit:.2} ({profit_percent:.2}%)"
            ));
        } else {
            self.log_event(&format!(
                "{market_name}: Cycle complete! Locked in ~{profit_percent:.2}% profit | Expected profit: ${expected_profit:.2}"
            ));
        }

        self.ledger
            .record_expected_profit(&CycleKey::new(condition_id, period), expected_profit);

        self.set_phase(
            condition_id,
            TradingPhase::CycleComplete {
                summary: Some(CycleSummary {
                    leg1_side,
                    leg1_entry_price,
                    leg1_shares,
                    leg2_side,
                    leg2_entry_price: leg2_price,
                    leg2_shares,
                    total_cost,
                }),
            },
        );
        Ok(())
    }

    /// Place a buy at the current ask. In simulation mode the order is only
    /// logged; in live mode a gateway failure propagates and the phase is not
    /// advanced, so the same condition is re-evaluated next tick.
    async fn execute_buy(
        &self,
        market_name: &str,
        side: OutcomeSide,
        token_id: &str,
        shares: f64,
        price: f64,
    ) -> Result<()> {
        self.log_event(&format!(
            "{market_name} BUY {} {shares} shares @ ${price:.4}",
            side.label()
        ));
        if self.simulation {
            self.log_event("SIMULATION: Order executed");
            return Ok(());
        }

        let executor = self
            .executor
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Live mode without an order executor"))?;
        executor.market_buy(token_id, price, shares).await?;
        self.log_event("REAL: Order placed");
        Ok(())
    }

    fn set_phase(&mut self, condition_id: &str, phase: TradingPhase) {
        if let Some(state) = self.market_states.get_mut(condition_id) {
            state.phase = phase;
        }
    }
}
