//! Per-side price level index
//!
//! Levels live in a hash map keyed by price and each keeps a running total
//! size. Best-price lookup goes through a heap of known prices that may hold
//! stale (emptied) entries; stale entries are dropped only when they surface
//! at the top, so the top of the heap is always a live level.

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};

use super::{DepthLevel, OrderId, Price, Quantity, Side};

/// Rebuild the heap once stale entries outnumber live levels by this factor
const COMPACT_FACTOR: usize = 4;
/// Heaps smaller than this are never compacted
const COMPACT_MIN_LEN: usize = 1024;

/// Open orders resting at one price
#[derive(Debug, Default, Clone)]
pub(crate) struct PriceLevel {
    orders: HashMap<OrderId, Quantity>,
    /// Wide enough that no number of `u64` quantities can overflow it
    total_size: u128,
}

impl PriceLevel {
    /// Sum of resident quantities, saturating at `Quantity::MAX`
    pub(crate) fn total_size(&self) -> Quantity {
        Quantity::try_from(self.total_size).unwrap_or(Quantity::MAX)
    }

    pub(crate) fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub(crate) fn orders(&self) -> impl Iterator<Item = (&OrderId, &Quantity)> {
        self.orders.iter()
    }
}

/// Heap of known prices, ordered best-first for its side
#[derive(Debug, Clone)]
enum PriceHeap {
    /// Bids: highest price on top
    Max(BinaryHeap<Price>),
    /// Offers: lowest price on top
    Min(BinaryHeap<Reverse<Price>>),
}

impl PriceHeap {
    fn for_side(side: Side) -> Self {
        match side {
            Side::Bid => PriceHeap::Max(BinaryHeap::new()),
            Side::Offer => PriceHeap::Min(BinaryHeap::new()),
        }
    }

    fn peek(&self) -> Option<Price> {
        match self {
            PriceHeap::Max(h) => h.peek().copied(),
            PriceHeap::Min(h) => h.peek().map(|Reverse(p)| *p),
        }
    }

    fn push(&mut self, price: Price) {
        match self {
            PriceHeap::Max(h) => h.push(price),
            PriceHeap::Min(h) => h.push(Reverse(price)),
        }
    }

    fn pop(&mut self) {
        match self {
            PriceHeap::Max(h) => {
                h.pop();
            }
            PriceHeap::Min(h) => {
                h.pop();
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            PriceHeap::Max(h) => h.len(),
            PriceHeap::Min(h) => h.len(),
        }
    }

    fn rebuild<I: Iterator<Item = Price>>(&mut self, prices: I) {
        match self {
            PriceHeap::Max(h) => *h = prices.collect(),
            PriceHeap::Min(h) => *h = prices.map(Reverse).collect(),
        }
    }
}

/// All levels of one side of a book
#[derive(Debug, Clone)]
pub(crate) struct PriceLevelIndex {
    side: Side,
    levels: HashMap<Price, PriceLevel>,
    known_prices: PriceHeap,
}

impl PriceLevelIndex {
    pub(crate) fn new(side: Side) -> Self {
        Self {
            side,
            levels: HashMap::new(),
            known_prices: PriceHeap::for_side(side),
        }
    }

    /// Add an order's quantity at `price`
    pub(crate) fn insert(&mut self, order_id: OrderId, price: Price, quantity: Quantity) {
        let level = match self.levels.entry(price) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                // Level goes from zero to one resident order
                self.known_prices.push(price);
                e.insert(PriceLevel::default())
            }
        };

        let previous = level.orders.insert(order_id, quantity);
        debug_assert!(previous.is_none(), "order {order_id} already resident at {price}");
        level.total_size = level.total_size - previous.unwrap_or(0) as u128 + quantity as u128;
    }

    /// Replace the quantity of an order already resting at `price`
    ///
    /// Returns false if the order is not resident at that price.
    pub(crate) fn update_quantity(
        &mut self,
        order_id: OrderId,
        price: Price,
        quantity: Quantity,
    ) -> bool {
        let Some(level) = self.levels.get_mut(&price) else {
            return false;
        };
        match level.orders.get_mut(&order_id) {
            Some(resident) => {
                level.total_size = level.total_size - *resident as u128 + quantity as u128;
                *resident = quantity;
                true
            }
            None => false,
        }
    }

    /// Remove an order from the level at `price`, returning its quantity
    pub(crate) fn remove(&mut self, order_id: OrderId, price: Price) -> Option<Quantity> {
        let level = self.levels.get_mut(&price)?;
        let quantity = level.orders.remove(&order_id)?;
        level.total_size -= quantity as u128;

        if level.orders.is_empty() {
            self.levels.remove(&price);
            self.purge_stale();
        }
        Some(quantity)
    }

    /// Drop emptied prices from the top of the heap
    fn purge_stale(&mut self) {
        while let Some(top) = self.known_prices.peek() {
            if self.levels.contains_key(&top) {
                break;
            }
            self.known_prices.pop();
        }

        let heap_len = self.known_prices.len();
        if heap_len >= COMPACT_MIN_LEN && heap_len > COMPACT_FACTOR * self.levels.len() {
            self.known_prices.rebuild(self.levels.keys().copied());
        }
    }

    /// Best price and the total size resting there
    pub(crate) fn best(&self) -> Option<(Price, Quantity)> {
        let price = self.known_prices.peek()?;
        let level = self.levels.get(&price);
        debug_assert!(level.is_some(), "stale price {price} on top of {:?} heap", self.side);
        level.map(|l| (price, l.total_size()))
    }

    pub(crate) fn level(&self, price: &Price) -> Option<&PriceLevel> {
        self.levels.get(price)
    }

    pub(crate) fn levels(&self) -> impl Iterator<Item = (&Price, &PriceLevel)> {
        self.levels.iter()
    }

    pub(crate) fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Heap entries that no longer correspond to a live level
    pub(crate) fn stale_prices(&self) -> usize {
        self.known_prices.len().saturating_sub(self.levels.len())
    }

    /// Up to `n` levels, best first
    pub(crate) fn depth(&self, n: usize) -> Vec<DepthLevel> {
        let mut prices: Vec<Price> = self.levels.keys().copied().collect();
        match self.side {
            Side::Bid => prices.sort_unstable_by(|a, b| b.cmp(a)),
            Side::Offer => prices.sort_unstable(),
        }

        prices
            .into_iter()
            .take(n)
            .filter_map(|price| {
                self.levels.get(&price).map(|level| DepthLevel {
                    price,
                    total_size: level.total_size(),
                    order_count: level.order_count(),
                })
            })
            .collect()
    }

    /// Every level is non-empty, its running total matches its members and
    /// every live price is reachable from the heap
    pub(crate) fn is_consistent(&self) -> bool {
        let totals_ok = self.levels.values().all(|level| {
            !level.orders.is_empty()
                && level.orders.values().map(|&q| q as u128).sum::<u128>() == level.total_size
        });
        let top_ok = match self.known_prices.peek() {
            Some(top) => self.levels.contains_key(&top),
            None => self.levels.is_empty(),
        };
        totals_ok && top_ok && self.known_prices.len() >= self.levels.len()
    }
}
