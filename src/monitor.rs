//! Per-asset market polling and period rollover.
//!
//! One `MarketMonitor` tracks the active up/down market for one asset:
//! it refreshes outcome token ids at most once per settlement period,
//! quotes both books each tick, and assembles the snapshot the trader
//! consumes. The rollover watcher sleeps until the next period boundary,
//! re-resolves the asset's market by slug, and resets per-market trader
//! state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::history::HistoryLog;
use crate::models::{MarketSnapshot, TokenQuote, PERIOD_DURATION_SECS};
use crate::polymarket::{Market, PolymarketClient, PriceSide};
use crate::trader::DumpHedgeTrader;

/// Minimum seconds between outcome token refreshes (one settlement period).
const TOKEN_REFRESH_SECS: i64 = 900;

pub struct MarketMonitor {
    api: Arc<PolymarketClient>,
    history: Arc<HistoryLog>,
    market_name: String,
    market: Market,
    up_token_id: Option<String>,
    down_token_id: Option<String>,
    last_token_refresh: Option<i64>,
}

impl MarketMonitor {
    pub fn new(
        api: Arc<PolymarketClient>,
        history: Arc<HistoryLog>,
        market_name: String,
        market: Market,
    ) -> Self {
        Self {
            api,
            history,
            market_name,
            market,
            up_token_id: None,
            down_token_id: None,
            last_token_refresh: None,
        }
    }

    /// Swap in a freshly discovered market after a period rollover.
    pub fn update_market(&mut self, market: Market) {
        info!(
            "{}: New market: {} ({})",
            self.market_name, market.slug, market.condition_id
        );
        self.market = market;
        self.up_token_id = None;
        self.down_token_id = None;
        self.last_token_refresh = None;
    }

    pub fn market_name(&self) -> &str {
        &self.market_name
    }

    /// Period start encoded as the slug's trailing integer.
    pub fn period_timestamp(&self) -> i64 {
        extract_timestamp_from_slug(&self.market.slug)
    }

    /// Re-resolve outcome token ids, at most once per settlement period.
    async fn refresh_tokens(&mut self, now: i64) {
        let due = match self.last_token_refresh {
            Some(last) => now - last >= TOKEN_REFRESH_SECS,
            None => true,
        };
        if !due {
            return;
        }

        let condition_id = self.market.condition_id.clone();
        info!(
            "{}: Refreshing tokens for market: {}...",
            self.market_name,
            &condition_id[..16.min(condition_id.len())]
        );

        match self.api.get_market_details(&condition_id).await {
            Ok(details) => {
                for token in &details.tokens {
                    let outcome = token.outcome.to_uppercase();
                    if outcome.contains("UP") || outcome == "1" {
                        self.up_token_id = Some(token.token_id.clone());
                    } else if outcome.contains("DOWN") || outcome == "0" {
                        self.down_token_id = Some(token.token_id.clone());
                    }
                }
            }
            Err(e) => warn!("{}: Token refresh failed: {e}", self.market_name),
        }
        self.last_token_refresh = Some(now);
    }

    /// Quote one token's book. A failed side is logged and left empty; the
    /// quote is `None` only when both sides failed.
    async fn fetch_token_quote(&self, token_id: Option<&str>, outcome: &str) -> Option<TokenQuote> {
        let token_id = token_id?;

        let (bid, ask) = tokio::join!(
            self.api.get_best_price(token_id, PriceSide::Buy),
            self.api.get_best_price(token_id, PriceSide::Sell),
        );

        let bid = bid
            .map_err(|e| warn!("{}: {outcome} bid fetch failed: {e}", self.market_name))
            .ok();
        let ask = ask
            .map_err(|e| warn!("{}: {outcome} ask fetch failed: {e}", self.market_name))
            .ok();

        if bid.is_none() && ask.is_none() {
            return None;
        }
        Some(TokenQuote {
            token_id: token_id.to_string(),
            bid,
            ask,
        })
    }

    /// Assemble one snapshot: refresh tokens if due, quote both books
    /// concurrently, log the one-line summary.
    pub async fn fetch_snapshot(&mut self) -> Result<MarketSnapshot> {
        let now = Utc::now().timestamp();
        self.refresh_tokens(now).await;

        let period_timestamp = self.period_timestamp();
        let duration = extract_duration_from_slug(&self.market.slug);
        let period_end = period_timestamp + duration;
        let seconds_remaining = (period_end - now).max(0);

        let (up, down) = tokio::join!(
            self.fetch_token_quote(self.up_token_id.as_deref(), "Up"),
            self.fetch_token_quote(self.down_token_id.as_deref(), "Down"),
        );

        let snapshot = MarketSnapshot {
            market_name: self.market_name.clone(),
            condition_id: self.market.condition_id.clone(),
            up,
            down,
            period_timestamp,
            seconds_remaining,
        };

        let format_quote = |quote: &Option<TokenQuote>| match quote {
            Some(q) => format!("BID:${:.2} ASK:${:.2}", q.bid_or_zero(), q.ask_or_zero()),
            None => "N/A".to_string(),
        };
        self.history.append_line(&format!(
            "{} Up Token {} Down Token {} remaining time:{} market_timestamp:{}",
            snapshot.market_name,
            format_quote(&snapshot.up),
            format_quote(&snapshot.down),
            format_remaining(snapshot.seconds_remaining),
            snapshot.period_timestamp
        ));

        Ok(snapshot)
    }
}

/// Trailing integer of the slug, 0 when absent.
pub fn extract_timestamp_from_slug(slug: &str) -> i64 {
    slug.rsplit('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Period length encoded in the slug.
pub fn extract_duration_from_slug(slug: &str) -> i64 {
    if slug.contains("-1h-") {
        3600
    } else {
        PERIOD_DURATION_SECS
    }
}

fn format_remaining(secs: i64) -> String {
    if secs == 0 {
        return "0s".to_string();
    }
    let minutes = secs / 60;
    let seconds = secs % 60;
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Poll loop for one asset. Ticks are serialized: the trader finishes each
/// snapshot before the next fetch starts.
pub async fn run_poll_loop(
    monitor: Arc<RwLock<MarketMonitor>>,
    trader: Arc<RwLock<DumpHedgeTrader>>,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let snapshot = match monitor.write().await.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Error fetching market data: {e}");
                continue;
            }
        };

        let now = Utc::now().timestamp();
        if let Err(e) = trader.write().await.process_snapshot(&snapshot, now).await {
            warn!("Error processing snapshot: {e}");
        }
    }
    info!("Poll loop stopped");
}

/// Rollover watcher for one asset: wake at each period boundary, re-resolve
/// the market, and reset per-market trader state.
pub async fn run_rollover_watcher(
    api: Arc<PolymarketClient>,
    asset: String,
    monitor: Arc<RwLock<MarketMonitor>>,
    trader: Arc<RwLock<DumpHedgeTrader>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_processed_period: Option<i64> = None;

    loop {
        let (market_name, next_boundary) = {
            let m = monitor.read().await;
            (
                m.market_name().to_string(),
                m.period_timestamp() + PERIOD_DURATION_SECS,
            )
        };

        let now = Utc::now().timestamp();
        let sleep_secs = (next_boundary - now).max(0) as u64;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => {}
            _ = shutdown.changed() => break,
        }

        let now = Utc::now().timestamp();
        let current_period = now / PERIOD_DURATION_SECS * PERIOD_DURATION_SECS;
        if last_processed_period == Some(current_period) {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                _ = shutdown.changed() => break,
            }
        }

        info!("New period detected for {market_name}! (Period: {current_period}) Discovering new market...");
        last_processed_period = Some(current_period);

        match api.discover_market_for_asset(&asset).await {
            Ok(market) => {
                monitor.write().await.update_market(market);
                trader.write().await.reset_period();
            }
            Err(e) => {
                error!("Failed to discover new {market_name} market: {e}");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(10)) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    info!("Rollover watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_timestamp_from_slug() {
        assert_eq!(
            extract_timestamp_from_slug("btc-updown-15m-1700000100"),
            1_700_000_100
        );
        assert_eq!(extract_timestamp_from_slug("no-trailing-number"), 0);
        assert_eq!(extract_timestamp_from_slug("nodashes"), 0);
    }

    #[test]
    fn test_extract_duration_from_slug() {
        assert_eq!(extract_duration_from_slug("btc-updown-15m-1700000100"), 900);
        assert_eq!(extract_duration_from_slug("eth-updown-1h-1700000000"), 3600);
        assert_eq!(extract_duration_from_slug("mystery-slug"), 900);
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(0), "0s");
        assert_eq!(format_remaining(45), "45s");
        assert_eq!(format_remaining(192), "3m 12s");
    }
}
