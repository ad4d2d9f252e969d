//! Position ledger: cash, open positions and closed-trade log for one strategy.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{PerformanceSummary, Position, SignalAction, QUANTITY_EPSILON};

/// A fully or partially closed lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub key: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Result of applying a trade to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fill {
    /// Quantity actually executed (may be less than requested)
    pub quantity: Decimal,
    pub price: Decimal,
    /// Realized P&L for sells
    pub realized_pnl: Decimal,
}

impl Fill {
    pub fn is_empty(&self) -> bool {
        self.quantity.is_zero()
    }
}

/// Cash plus positions keyed by ledger key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLedger {
    initial_capital: Decimal,
    cash: Decimal,
    positions: BTreeMap<String, Position>,
    closed: Vec<ClosedTrade>,
    realized_pnl: Decimal,
}

impl PositionLedger {
    pub fn new(capital: Decimal) -> Self {
        Self {
            initial_capital: capital,
            cash: capital,
            positions: BTreeMap::new(),
            closed: Vec::new(),
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn position(&self, key: &str) -> Option<&Position> {
        self.positions.get(key)
    }

    pub fn position_mut(&mut self, key: &str) -> Option<&mut Position> {
        self.positions.get_mut(key)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn positions_for<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a Position> + 'a {
        self.positions.values().filter(move |p| p.symbol == symbol)
    }

    /// Market value held in `symbol` across every venue.
    pub fn symbol_exposure(&self, symbol: &str) -> Decimal {
        self.positions_for(symbol).map(Position::market_value).sum()
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    /// Mark every position on `symbol` to `price`.
    pub fn mark(&mut self, symbol: &str, price: Decimal, now: DateTime<Utc>) {
        for pos in self.positions.values_mut().filter(|p| p.symbol == symbol) {
            pos.update_price(price, now);
        }
    }

    /// Apply an executed trade.
    ///
    /// BUY quantities are capped by available cash; SELL quantities are capped by
    /// the held quantity. A position whose remaining quantity falls below
    /// [`QUANTITY_EPSILON`] is removed.
    pub fn apply_trade(
        &mut self,
        symbol: &str,
        key: &str,
        action: SignalAction,
        quantity: Decimal,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Fill {
        if quantity <= Decimal::ZERO || price <= Decimal::ZERO {
            return Fill::default();
        }

        match action {
            SignalAction::Hold => Fill::default(),
            SignalAction::Buy => {
                let affordable = self.cash / price;
                let qty = quantity.min(affordable);
                if qty < QUANTITY_EPSILON {
                    debug!(key = %key, cash = %self.cash, "Buy skipped, insufficient cash");
                    return Fill::default();
                }

                self.cash -= qty * price;
                match self.positions.get_mut(key) {
                    Some(pos) => pos.add(qty, price, now),
                    None => {
                        let pos = Position::new(symbol.to_string(), key.to_string(), qty, price, now);
                        self.positions.insert(key.to_string(), pos);
                    }
                }

                Fill {
                    quantity: qty,
                    price,
                    realized_pnl: Decimal::ZERO,
                }
            }
            SignalAction::Sell => {
                let Some(pos) = self.positions.get_mut(key) else {
                    return Fill::default();
                };

                let qty = quantity.min(pos.quantity);
                let entry_price = pos.average_price;
                let opened_at = pos.opened_at;
                let realized = pos.reduce(qty, price, now);
                self.cash += qty * price;
                self.realized_pnl += realized;

                self.closed.push(ClosedTrade {
                    symbol: pos.symbol.clone(),
                    key: key.to_string(),
                    quantity: qty,
                    entry_price,
                    exit_price: price,
                    pnl: realized,
                    opened_at,
                    closed_at: now,
                });

                if pos.is_closed() {
                    // Dust left below epsilon is folded back into cash
                    self.cash += pos.quantity * price;
                    self.positions.remove(key);
                    debug!(key = %key, "Position closed");
                }

                Fill {
                    quantity: qty,
                    price,
                    realized_pnl: realized,
                }
            }
        }
    }

    /// Add quantity without spending cash (staking rewards).
    pub fn credit(&mut self, key: &str, quantity: Decimal, now: DateTime<Utc>) -> Decimal {
        let Some(pos) = self.positions.get_mut(key) else {
            return Decimal::ZERO;
        };
        if quantity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        pos.quantity += quantity;
        if !pos.quantity.is_zero() {
            pos.average_price = pos.cost_basis / pos.quantity;
        }
        let price = pos.current_price;
        pos.update_price(price, now);
        quantity
    }

    pub fn market_value(&self) -> Decimal {
        self.positions.values().map(Position::market_value).sum()
    }

    pub fn invested(&self) -> Decimal {
        self.positions.values().map(|p| p.cost_basis).sum()
    }

    /// Cash plus marked value of all positions.
    pub fn total_value(&self) -> Decimal {
        self.cash + self.market_value()
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn summary(&self, strategy_id: &str) -> PerformanceSummary {
        let wins = self.closed.iter().filter(|t| t.pnl > Decimal::ZERO).count();
        let win_rate = if self.closed.is_empty() {
            0.0
        } else {
            wins as f64 / self.closed.len() as f64
        };

        PerformanceSummary {
            strategy_id: strategy_id.to_string(),
            cash: self.cash,
            invested: self.invested(),
            market_value: self.market_value(),
            total_value: self.total_value(),
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl(),
            open_positions: self.positions.len(),
            closed_trades: self.closed.len(),
            win_rate,
        }
    }
}
