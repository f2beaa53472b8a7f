//! Core order book implementation
//!
//! Market-by-order book for a single instrument. Orders are indexed by id and
//! aggregated into per-side price level indexes.

use std::collections::HashMap;
use tracing::{debug, trace};

use super::price_level::PriceLevelIndex;
use super::{
    BookMetrics, Depth, DuplicateNewPolicy, InstrumentId, OrderId, Price, Quantity, Side, TopOfBook,
};

/// An open order resting in the book
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_id: OrderId,
    pub price: Price,
    pub quantity: Quantity,
    /// Fixed at creation
    pub side: Side,
    pub last_update_time: u64,
}

/// Order book for a single instrument
#[derive(Debug, Clone)]
pub struct OrderBook {
    instrument_id: InstrumentId,
    symbol: String,
    /// Open orders by id
    orders: HashMap<OrderId, Order>,
    bids: PriceLevelIndex,
    offers: PriceLevelIndex,
    /// Event time of the last applied event
    last_update_time: u64,
    duplicate_policy: DuplicateNewPolicy,
    metrics: BookMetrics,
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new(instrument_id: InstrumentId, symbol: &str) -> Self {
        Self::with_policy(instrument_id, symbol, DuplicateNewPolicy::default())
    }

    /// Create with an explicit duplicate-NEW policy
    pub fn with_policy(
        instrument_id: InstrumentId,
        symbol: &str,
        duplicate_policy: DuplicateNewPolicy,
    ) -> Self {
        Self {
            instrument_id,
            symbol: symbol.to_string(),
            orders: HashMap::new(),
            bids: PriceLevelIndex::new(Side::Bid),
            offers: PriceLevelIndex::new(Side::Offer),
            last_update_time: 0,
            duplicate_policy,
            metrics: BookMetrics::default(),
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut PriceLevelIndex {
        match side {
            Side::Bid => &mut self.bids,
            Side::Offer => &mut self.offers,
        }
    }

    fn levels(&self, side: Side) -> &PriceLevelIndex {
        match side {
            Side::Bid => &self.bids,
            Side::Offer => &self.offers,
        }
    }

    /// Open a new order
    ///
    /// A NEW for an id that is already open is handled per the book's
    /// [`DuplicateNewPolicy`]: upserted into a modify, or dropped.
    pub fn add_order(
        &mut self,
        order_id: OrderId,
        price: Price,
        quantity: Quantity,
        side: Side,
        event_time: u64,
    ) {
        if self.orders.contains_key(&order_id) {
            self.metrics.duplicate_news += 1;
            match self.duplicate_policy {
                DuplicateNewPolicy::Upsert => {
                    trace!(order_id, %price, quantity, "Duplicate NEW upserted as modify");
                    self.modify_order(order_id, price, quantity, event_time);
                }
                DuplicateNewPolicy::Reject => {
                    self.metrics.rejected_news += 1;
                    debug!(instrument_id = self.instrument_id, order_id, "Duplicate NEW rejected");
                }
            }
            return;
        }

        self.levels_mut(side).insert(order_id, price, quantity);
        self.orders.insert(
            order_id,
            Order {
                order_id,
                price,
                quantity,
                side,
                last_update_time: event_time,
            },
        );
        self.last_update_time = event_time;
        self.metrics.adds += 1;
        self.assert_consistent();
    }

    /// Move an open order to a new price and/or quantity
    ///
    /// Unknown order ids are ignored. The order keeps its original side.
    pub fn modify_order(
        &mut self,
        order_id: OrderId,
        new_price: Price,
        new_quantity: Quantity,
        event_time: u64,
    ) {
        let Some((side, old_price)) = self.orders.get(&order_id).map(|o| (o.side, o.price)) else {
            self.metrics.unknown_order_refs += 1;
            trace!(
                instrument_id = self.instrument_id,
                order_id,
                "Modify for unknown order ignored"
            );
            return;
        };

        let levels = self.levels_mut(side);
        if old_price == new_price {
            let updated = levels.update_quantity(order_id, new_price, new_quantity);
            debug_assert!(updated, "order {order_id} missing from its level");
        } else {
            let removed = levels.remove(order_id, old_price);
            debug_assert!(removed.is_some(), "order {order_id} missing from its level");
            levels.insert(order_id, new_price, new_quantity);
        }

        if let Some(order) = self.orders.get_mut(&order_id) {
            order.price = new_price;
            order.quantity = new_quantity;
            order.last_update_time = event_time;
        }
        self.last_update_time = event_time;
        self.metrics.modifies += 1;
        self.assert_consistent();
    }

    /// Close an open order
    ///
    /// Unknown order ids are ignored.
    pub fn delete_order(&mut self, order_id: OrderId, event_time: u64) {
        let Some(order) = self.orders.remove(&order_id) else {
            self.metrics.unknown_order_refs += 1;
            trace!(
                instrument_id = self.instrument_id,
                order_id,
                "Delete for unknown order ignored"
            );
            return;
        };

        let removed = self.levels_mut(order.side).remove(order_id, order.price);
        debug_assert_eq!(removed, Some(order.quantity));

        self.last_update_time = event_time;
        self.metrics.deletes += 1;
        self.assert_consistent();
    }

    /// Highest bid price and the total size resting there
    pub fn best_bid(&self) -> (Option<Price>, Quantity) {
        match self.bids.best() {
            Some((price, size)) => (Some(price), size),
            None => (None, 0),
        }
    }

    /// Lowest offer price and the total size resting there
    pub fn best_offer(&self) -> (Option<Price>, Quantity) {
        match self.offers.best() {
            Some((price, size)) => (Some(price), size),
            None => (None, 0),
        }
    }

    /// Current top of book, stamped with the last update time
    pub fn top_of_book(&self) -> TopOfBook {
        TopOfBook::new(
            self.last_update_time,
            self.instrument_id,
            &self.symbol,
            self.best_bid(),
            self.best_offer(),
        )
    }

    /// Up to `levels` non-empty levels per side, best first
    pub fn depth(&self, levels: usize) -> Depth {
        Depth {
            bids: self.bids.depth(levels),
            offers: self.offers.depth(levels),
        }
    }

    pub fn instrument_id(&self) -> InstrumentId {
        self.instrument_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn order(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Number of non-empty levels on one side
    pub fn level_count(&self, side: Side) -> usize {
        self.levels(side).level_count()
    }

    /// Emptied prices still waiting in one side's heap
    pub fn stale_prices(&self, side: Side) -> usize {
        self.levels(side).stale_prices()
    }

    pub fn last_update_time(&self) -> u64 {
        self.last_update_time
    }

    pub fn metrics(&self) -> &BookMetrics {
        &self.metrics
    }

    /// Every open order sits in exactly one level, matching its side, price
    /// and quantity, and no level holds an entry without an open order
    pub fn check_invariants(&self) -> bool {
        let orders_resident = self.orders.values().all(|order| {
            self.levels(order.side)
                .level(&order.price)
                .and_then(|level| level.orders().find(|(id, _)| **id == order.order_id))
                .map(|(_, quantity)| *quantity == order.quantity)
                .unwrap_or(false)
        });

        let resident_entries: usize = self
            .bids
            .levels()
            .chain(self.offers.levels())
            .map(|(_, level)| level.order_count())
            .sum();

        orders_resident
            && resident_entries == self.orders.len()
            && self.bids.is_consistent()
            && self.offers.is_consistent()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert!(self.check_invariants(), "order book {} is inconsistent", self.instrument_id);
    }

    #[cfg(not(test))]
    #[inline(always)]
    fn assert_consistent(&self) {}
}
