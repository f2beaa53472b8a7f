//! Order book manager
//!
//! Routes decoded order events to per-instrument books and records a
//! top-of-book snapshot every time the best bid or offer price moves.

use std::collections::HashMap;
use tracing::{debug, trace};

use super::{
    Action, BookMetrics, Depth, DuplicateNewPolicy, InstrumentId, OrderBook, OrderEvent, TopOfBook,
};

/// Manages order books for multiple instruments
#[derive(Debug, Default)]
pub struct OrderBookManager {
    books: HashMap<InstrumentId, OrderBook>,
    /// Every emitted snapshot, in application order
    history: Vec<TopOfBook>,
    /// Index into `history` of the latest snapshot per instrument
    latest: HashMap<InstrumentId, usize>,
    duplicate_policy: DuplicateNewPolicy,
}

impl OrderBookManager {
    /// Create a new order book manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a duplicate-NEW policy for every book it opens
    pub fn with_policy(duplicate_policy: DuplicateNewPolicy) -> Self {
        Self {
            duplicate_policy,
            ..Self::default()
        }
    }

    /// Get the book for an instrument, opening it on first use
    pub fn get_or_create_book(
        &mut self,
        instrument_id: InstrumentId,
        symbol: &str,
    ) -> &mut OrderBook {
        let policy = self.duplicate_policy;
        self.books.entry(instrument_id).or_insert_with(|| {
            debug!(instrument_id, symbol, "Opening order book");
            OrderBook::with_policy(instrument_id, symbol, policy)
        })
    }

    /// Apply one event to its instrument's book
    ///
    /// Returns the new top of book if the best bid or best offer price
    /// changed (including a side appearing or emptying), and appends it to
    /// the history.
    pub fn process_order(&mut self, symbol: &str, event: &OrderEvent) -> Option<TopOfBook> {
        let book = self.get_or_create_book(event.instrument_id, symbol);
        let before = book.top_of_book();

        match event.action {
            Action::New => book.add_order(
                event.order_id,
                event.price,
                event.quantity,
                event.side,
                event.event_time,
            ),
            Action::Change => {
                book.modify_order(event.order_id, event.price, event.quantity, event.event_time)
            }
            Action::Delete => book.delete_order(event.order_id, event.event_time),
            Action::Unknown(code) => {
                trace!(instrument_id = event.instrument_id, code, "Ignoring unrecognized action");
            }
        }

        let after = book.top_of_book();
        if before.same_prices(&after) {
            return None;
        }

        self.latest.insert(event.instrument_id, self.history.len());
        self.history.push(after.clone());
        Some(after)
    }

    /// Full snapshot history in application order
    pub fn top_of_book_history(&self) -> &[TopOfBook] {
        &self.history
    }

    /// The history stably sorted by snapshot timestamp
    ///
    /// Exchange entry times are not ordered across instruments, so the
    /// application order can step backwards in time.
    pub fn chronological_history(&self) -> Vec<TopOfBook> {
        Self::merge_histories([self.history.clone()])
    }

    /// Take the history out, leaving the books in place
    pub fn take_history(&mut self) -> Vec<TopOfBook> {
        self.latest.clear();
        std::mem::take(&mut self.history)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Live top of book for an instrument
    pub fn current_top_of_book(&self, instrument_id: InstrumentId) -> Option<TopOfBook> {
        self.books.get(&instrument_id).map(|book| book.top_of_book())
    }

    /// Last snapshot recorded in the history for an instrument
    pub fn latest_top_of_book(&self, instrument_id: InstrumentId) -> Option<&TopOfBook> {
        self.latest.get(&instrument_id).and_then(|&i| self.history.get(i))
    }

    /// Depth of an instrument's book
    pub fn depth(&self, instrument_id: InstrumentId, levels: usize) -> Option<Depth> {
        self.books.get(&instrument_id).map(|book| book.depth(levels))
    }

    pub fn book(&self, instrument_id: InstrumentId) -> Option<&OrderBook> {
        self.books.get(&instrument_id)
    }

    /// Instruments with an open book, ascending
    pub fn instrument_ids(&self) -> Vec<InstrumentId> {
        let mut ids: Vec<InstrumentId> = self.books.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Counters summed over every book
    pub fn metrics(&self) -> BookMetrics {
        let mut total = BookMetrics::default();
        for book in self.books.values() {
            total.accumulate(book.metrics());
        }
        total
    }

    /// Merge histories produced by independent managers (e.g. one per
    /// instrument partition) into a single series ordered by timestamp
    ///
    /// The sort is stable, so snapshots with equal timestamps keep their
    /// partition order.
    pub fn merge_histories<I>(parts: I) -> Vec<TopOfBook>
    where
        I: IntoIterator<Item = Vec<TopOfBook>>,
    {
        let mut merged: Vec<TopOfBook> = parts.into_iter().flatten().collect();
        merged.sort_by_key(|tob| tob.timestamp_ns);
        merged
    }
}
