//! Order book module
//!
//! Reconstructs per-instrument market-by-order books from decoded exchange
//! events and tracks the top-of-book history.

mod book;
mod manager;
mod metrics;
mod price_level;

pub use book::{Order, OrderBook};
pub use manager::OrderBookManager;
pub use metrics::BookMetrics;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Prices are carried at the instrument's 2-decimal quoting precision
pub type Price = Decimal;
pub type Quantity = u64;
pub type OrderId = u64;
pub type InstrumentId = u64;

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Offer,
}

/// Book action carried by an order message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    New,
    Change,
    Delete,
    /// Any other wire action code (delete-thru, delete-from, overlay, ...)
    Unknown(u8),
}

impl Action {
    /// Map an `MDUpdateAction` wire code
    pub fn from_wire(code: u8) -> Self {
        match code {
            0 => Action::New,
            1 => Action::Change,
            2 => Action::Delete,
            other => Action::Unknown(other),
        }
    }
}

/// What to do with a NEW for an order id that is already open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateNewPolicy {
    /// Treat the NEW as a CHANGE of the open order
    #[default]
    Upsert,
    /// Drop the NEW and keep the open order untouched
    Reject,
}

/// A normalized order message, ready to be applied to a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub instrument_id: InstrumentId,
    pub order_id: OrderId,
    pub action: Action,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    /// Nanoseconds since the Unix epoch
    pub event_time: u64,
}

/// A single aggregated level in a depth query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub total_size: Quantity,
    pub order_count: usize,
}

/// Up to N non-empty levels per side, best first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depth {
    pub bids: Vec<DepthLevel>,
    pub offers: Vec<DepthLevel>,
}

/// Point-in-time read of the best bid and offer of one instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopOfBook {
    pub timestamp_ns: u64,
    pub instrument_id: InstrumentId,
    pub symbol: String,
    pub best_bid_price: Option<Price>,
    pub best_bid_size: Quantity,
    pub best_offer_price: Option<Price>,
    pub best_offer_size: Quantity,
    /// best offer - best bid, absent unless both sides are populated
    pub spread: Option<Price>,
    /// (best bid + best offer) / 2, absent unless both sides are populated
    pub mid_price: Option<Price>,
}

impl TopOfBook {
    pub(crate) fn new(
        timestamp_ns: u64,
        instrument_id: InstrumentId,
        symbol: &str,
        (best_bid_price, best_bid_size): (Option<Price>, Quantity),
        (best_offer_price, best_offer_size): (Option<Price>, Quantity),
    ) -> Self {
        let (spread, mid_price) = match (best_bid_price, best_offer_price) {
            (Some(bid), Some(offer)) => (Some(offer - bid), Some((bid + offer) / Decimal::from(2))),
            _ => (None, None),
        };

        Self {
            timestamp_ns,
            instrument_id,
            symbol: symbol.to_string(),
            best_bid_price,
            best_bid_size,
            best_offer_price,
            best_offer_size,
            spread,
            mid_price,
        }
    }

    /// True if the best prices (not sizes) of both sides are equal
    pub fn same_prices(&self, other: &TopOfBook) -> bool {
        self.best_bid_price == other.best_bid_price
            && self.best_offer_price == other.best_offer_price
    }

    /// Both sides have at least one resting order
    pub fn is_two_sided(&self) -> bool {
        self.best_bid_price.is_some() && self.best_offer_price.is_some()
    }

    /// The snapshot timestamp as a UTC datetime
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.timestamp_ns as i64)
    }
}
