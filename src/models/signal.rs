//! Trading signals emitted by strategy evaluators.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a signal asks the execution layer to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Hold => "HOLD",
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse risk classification attached to signals and risk decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// A trading decision proposed by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub action: SignalAction,

    pub symbol: String,

    /// Staking platform or other venue qualifier, when the position is keyed by more than the symbol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,

    /// Confidence in the decision (0 to 100)
    pub confidence: f64,

    /// Reference price at emission time
    pub price: Decimal,

    /// Quantity in asset units; `None` means "whatever is held" for exits
    pub quantity: Option<Decimal>,

    /// Human-readable explanation
    pub reason: String,

    pub timestamp: DateTime<Utc>,

    pub risk_level: RiskLevel,

    /// Set when the signal was produced by a stop-loss or emergency exit
    #[serde(default)]
    pub stop_loss: bool,
}

impl TradingSignal {
    pub fn buy(symbol: impl Into<String>, price: Decimal, quantity: Decimal, now: DateTime<Utc>) -> Self {
        Self::new(SignalAction::Buy, symbol, price, Some(quantity), now)
    }

    pub fn sell(symbol: impl Into<String>, price: Decimal, quantity: Decimal, now: DateTime<Utc>) -> Self {
        Self::new(SignalAction::Sell, symbol, price, Some(quantity), now)
    }

    fn new(
        action: SignalAction,
        symbol: impl Into<String>,
        price: Decimal,
        quantity: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            symbol: symbol.into(),
            venue: None,
            confidence: 50.0,
            price,
            quantity,
            reason: String::new(),
            timestamp: now,
            risk_level: RiskLevel::Medium,
            stop_loss: false,
        }
    }

    /// Set confidence, clamped into `[0, 100]`. Non-finite values collapse to 0.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    pub fn as_stop_loss(mut self) -> Self {
        self.stop_loss = true;
        self
    }

    /// Ledger key: the symbol, qualified by venue when present.
    pub fn position_key(&self) -> String {
        position_key(&self.symbol, self.venue.as_deref())
    }

    /// Notional value (`price × quantity`) of the signal.
    pub fn notional(&self) -> Decimal {
        self.quantity.map(|q| q * self.price).unwrap_or(Decimal::ZERO)
    }
}

/// Build the ledger key for a symbol and optional venue.
pub fn position_key(symbol: &str, venue: Option<&str>) -> String {
    match venue {
        Some(v) => format!("{}@{}", symbol, v),
        None => symbol.to_string(),
    }
}
