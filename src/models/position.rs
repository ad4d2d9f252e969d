//! Position model: the holdings a strategy currently carries for one ledger key.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Quantities below this are treated as a closed position.
pub const QUANTITY_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// A single DCA purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub quantity: Decimal,
    pub amount: Decimal,
}

/// Lifecycle of a staked position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StakingStatus {
    Active,
    Unlocking,
    Unlocked,
}

/// Strategy-specific data carried alongside the common position core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PositionExtension {
    #[default]
    Plain,
    Dca {
        purchases: Vec<Purchase>,
    },
    Staking {
        platform: String,
        apy: f64,
        lock_period_days: u32,
        started_at: DateTime<Utc>,
        unlock_at: DateTime<Utc>,
        status: StakingStatus,
        /// Rewards accrued since the last compounding, in asset units
        accrued_rewards: Decimal,
        last_compounded_at: DateTime<Utc>,
    },
    Channel {
        stop_loss_price: Decimal,
        take_profit_price: Option<Decimal>,
    },
}

/// Open position for a ledger key (symbol, optionally qualified by venue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,

    /// Ledger key (symbol or symbol@venue)
    pub key: String,

    /// Units held
    pub quantity: Decimal,

    /// Weighted average entry price
    pub average_price: Decimal,

    /// Last marked price
    pub current_price: Decimal,

    /// Cost basis in USD
    pub cost_basis: Decimal,

    /// Unrealized P&L in USD
    pub unrealized_pnl: Decimal,

    /// P&L realized by partial sells of this position
    pub realized_pnl: Decimal,

    pub opened_at: DateTime<Utc>,

    pub last_updated: DateTime<Utc>,

    #[serde(default)]
    pub extension: PositionExtension,
}

impl Position {
    /// Create a new position from the first fill.
    pub fn new(symbol: String, key: String, quantity: Decimal, price: Decimal, now: DateTime<Utc>) -> Self {
        let cost_basis = quantity * price;
        Self {
            symbol,
            key,
            quantity,
            average_price: price,
            current_price: price,
            cost_basis,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            opened_at: now,
            last_updated: now,
            extension: PositionExtension::Plain,
        }
    }

    /// Update position P&L based on current market price.
    pub fn update_price(&mut self, current_price: Decimal, now: DateTime<Utc>) {
        self.current_price = current_price;
        self.unrealized_pnl = self.market_value() - self.cost_basis;
        self.last_updated = now;
    }

    /// Add to position (averaging in).
    pub fn add(&mut self, quantity: Decimal, price: Decimal, now: DateTime<Utc>) {
        let total_cost = self.cost_basis + quantity * price;
        let new_quantity = self.quantity + quantity;

        if !new_quantity.is_zero() {
            self.average_price = total_cost / new_quantity;
        }

        self.quantity = new_quantity;
        self.cost_basis = total_cost;
        self.update_price(price, now);
    }

    /// Reduce position size at `price`, returning the realized P&L.
    pub fn reduce(&mut self, quantity: Decimal, price: Decimal, now: DateTime<Utc>) -> Decimal {
        let reduce_qty = quantity.min(self.quantity);
        let realized = reduce_qty * (price - self.average_price);

        self.quantity -= reduce_qty;
        self.cost_basis = self.quantity * self.average_price;
        self.realized_pnl += realized;
        self.update_price(price, now);

        realized
    }

    /// Check if this position is closed (size is zero or negligible).
    pub fn is_closed(&self) -> bool {
        self.quantity < QUANTITY_EPSILON
    }

    pub fn market_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    /// Unrealized return in percent of cost basis.
    pub fn return_pct(&self) -> f64 {
        if self.cost_basis.is_zero() {
            return 0.0;
        }
        (self.unrealized_pnl / self.cost_basis).to_f64().unwrap_or(0.0) * 100.0
    }
}
