//! Shared market data types passed between the poller and the trader.

/// One outcome side of a binary up/down market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeSide {
    Up,
    Down,
}

impl OutcomeSide {
    pub fn opposite(self) -> Self {
        match self {
            OutcomeSide::Up => OutcomeSide::Down,
            OutcomeSide::Down => OutcomeSide::Up,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OutcomeSide::Up => "Up",
            OutcomeSide::Down => "Down",
        }
    }
}

impl std::fmt::Display for OutcomeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Best bid/ask for one outcome token. A side is `None` when the price fetch
/// failed this tick.
#[derive(Debug, Clone)]
pub struct TokenQuote {
    pub token_id: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

impl TokenQuote {
    pub fn ask_or_zero(&self) -> f64 {
        self.ask.unwrap_or(0.0)
    }

    pub fn bid_or_zero(&self) -> f64 {
        self.bid.unwrap_or(0.0)
    }
}

/// Length of one settlement period in seconds.
pub const PERIOD_DURATION_SECS: i64 = 900;

/// One polled view of a tracked market, handed to the trading state machine.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub market_name: String,
    pub condition_id: String,
    pub up: Option<TokenQuote>,
    pub down: Option<TokenQuote>,
    /// Period start, parsed from the market slug.
    pub period_timestamp: i64,
    pub seconds_remaining: i64,
}

impl MarketSnapshot {
    pub fn up_ask(&self) -> f64 {
        self.up.as_ref().map(TokenQuote::ask_or_zero).unwrap_or(0.0)
    }

    pub fn down_ask(&self) -> f64 {
        self.down.as_ref().map(TokenQuote::ask_or_zero).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_side() {
        assert_eq!(OutcomeSide::Up.opposite(), OutcomeSide::Down);
        assert_eq!(OutcomeSide::Down.opposite(), OutcomeSide::Up);
    }

    #[test]
    fn test_missing_quote_reads_as_zero() {
        let snapshot = MarketSnapshot {
            market_name: "BTC 15m".to_string(),
            condition_id: "0xabc".to_string(),
            up: None,
            down: Some(TokenQuote {
                token_id: "123".to_string(),
                bid: Some(0.46),
                ask: None,
            }),
            period_timestamp: 0,
            seconds_remaining: 900,
        };
        assert_eq!(snapshot.up_ask(), 0.0);
        assert_eq!(snapshot.down_ask(), 0.0);
    }
}
