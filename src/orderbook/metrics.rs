//! Per-book event counters

use serde::{Deserialize, Serialize};

/// How the events routed to a book were applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetrics {
    /// NEWs that opened an order
    pub adds: u64,

    /// CHANGEs applied to an open order (including upserted NEWs)
    pub modifies: u64,

    /// DELETEs that closed an open order
    pub deletes: u64,

    /// CHANGE/DELETE for an order id that was never opened
    pub unknown_order_refs: u64,

    /// NEWs for an order id that was already open
    pub duplicate_news: u64,

    /// Duplicate NEWs dropped under the reject policy
    pub rejected_news: u64,
}

impl BookMetrics {
    /// Events that changed book state
    pub fn applied(&self) -> u64 {
        self.adds + self.modifies + self.deletes
    }

    /// Events dropped without touching book state
    pub fn ignored(&self) -> u64 {
        self.unknown_order_refs + self.rejected_news
    }

    /// Fold another book's counters into this one
    pub fn accumulate(&mut self, other: &BookMetrics) {
        self.adds += other.adds;
        self.modifies += other.modifies;
        self.deletes += other.deletes;
        self.unknown_order_refs += other.unknown_order_refs;
        self.duplicate_news += other.duplicate_news;
        self.rejected_news += other.rejected_news;
    }
}
