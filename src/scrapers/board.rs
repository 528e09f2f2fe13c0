//! bitFlyer Lightning board types
//!
//! Wire shapes for the `getboard` snapshot and the `lightning_board_*` diff
//! channel, plus the sorted read projection handed to consumers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the book a level rests on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Bid,
    Ask,
}

/// Single price level (aggregate size resting at one price)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// A size of zero (or below) on the wire means "delete this price"
    #[inline]
    pub fn is_removal(&self) -> bool {
        self.size <= Decimal::ZERO
    }
}

/// Full board as returned by `GET /v1/getboard`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub mid_price: Decimal,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

/// Incremental board message from the diff channel.
///
/// Absent fields carry no information; an absent side is not an empty side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bids: Option<Vec<PriceLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asks: Option<Vec<PriceLevel>>,
}

impl BoardUpdate {
    pub fn with_mid_price(mut self, mid_price: Decimal) -> Self {
        self.mid_price = Some(mid_price);
        self
    }

    pub fn with_bids(mut self, bids: Vec<PriceLevel>) -> Self {
        self.bids = Some(bids);
        self
    }

    pub fn with_asks(mut self, asks: Vec<PriceLevel>) -> Self {
        self.asks = Some(asks);
        self
    }
}

/// Read-only projection of the reconciled board
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoardView {
    /// Bids sorted by price descending (best bid first)
    pub bids: Vec<PriceLevel>,
    /// Asks sorted by price ascending (best ask first)
    pub asks: Vec<PriceLevel>,
    pub mid_price: Option<Decimal>,
    pub spread: Option<Decimal>,
}

impl BoardView {
    #[inline]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Truncate both sides to `depth` levels from the top of book
    pub fn top(&self, depth: usize) -> BoardView {
        BoardView {
            bids: self.bids.iter().take(depth).copied().collect(),
            asks: self.asks.iter().take(depth).copied().collect(),
            mid_price: self.mid_price,
            spread: self.spread,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
