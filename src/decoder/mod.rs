//! Message decoding
//!
//! Turns raw message records into normalized [`OrderEvent`]s through an
//! ordered chain of extraction strategies. The first strategy that
//! recognises a record decides what it is; only order messages for
//! instruments of interest leave the chain.

mod heuristic;
pub(crate) mod sbe;

pub use heuristic::HeuristicStrategy;
pub use sbe::{SbeHeader, SbeStrategy, DEFAULT_SCHEMA_ID};

use serde::Serialize;
use tracing::trace;

use crate::capture::RawRecord;
use crate::instruments::InstrumentTable;
use crate::orderbook::{InstrumentId, OrderEvent, Price, Quantity};

/// Anything a strategy can recognise in a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    /// Book-relevant order message
    Order(OrderEvent),
    Trade {
        instrument_id: InstrumentId,
        price: Price,
        quantity: Quantity,
        event_time: u64,
    },
    InstrumentDefinition {
        instrument_id: InstrumentId,
        symbol: String,
    },
    Heartbeat,
    /// Well-framed message of a kind the book does not use
    Ignored { template_id: u16 },
}

/// One way of extracting messages from a record
#[cfg_attr(test, mockall::automock)]
pub trait ExtractionStrategy {
    fn name(&self) -> &'static str;

    /// Recognise `record`, or return None to let the next strategy try
    fn extract(
        &mut self,
        record: &RawRecord,
        instruments: &InstrumentTable,
    ) -> Option<DecodedMessage>;
}

/// What the chain did with the records it saw
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub orders: u64,
    /// Orders for instruments outside the table
    pub filtered: u64,
    pub trades: u64,
    pub definitions: u64,
    pub heartbeats: u64,
    pub ignored: u64,
    /// Records no strategy recognised
    pub undecodable: u64,
    /// Orders produced by a strategy other than the first
    pub fallback_orders: u64,
}

/// Ordered primary/fallback strategies
pub struct DecoderChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    stats: DecodeStats,
}

impl DecoderChain {
    /// An empty chain; every record is undecodable until strategies are added
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            stats: DecodeStats::default(),
        }
    }

    /// SBE decoding first, byte-pattern heuristics as fallback
    pub fn standard(schema_id: u16, price_min: Price, price_max: Price) -> Self {
        Self::new()
            .with_strategy(SbeStrategy::new(schema_id))
            .with_strategy(HeuristicStrategy::new(price_min, price_max))
    }

    /// Append a strategy after the existing ones
    pub fn with_strategy(mut self, strategy: impl ExtractionStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Decode one record into at most one order event
    pub fn decode(
        &mut self,
        record: &RawRecord,
        instruments: &InstrumentTable,
    ) -> Option<OrderEvent> {
        for (position, strategy) in self.strategies.iter_mut().enumerate() {
            let Some(message) = strategy.extract(record, instruments) else {
                continue;
            };

            match message {
                DecodedMessage::Order(event) if instruments.contains(event.instrument_id) => {
                    self.stats.orders += 1;
                    if position > 0 {
                        self.stats.fallback_orders += 1;
                    }
                    trace!(strategy = strategy.name(), order_id = event.order_id, "Decoded order");
                    return Some(event);
                }
                DecodedMessage::Order(_) => self.stats.filtered += 1,
                DecodedMessage::Trade { .. } => self.stats.trades += 1,
                DecodedMessage::InstrumentDefinition { .. } => self.stats.definitions += 1,
                DecodedMessage::Heartbeat => self.stats.heartbeats += 1,
                DecodedMessage::Ignored { .. } => self.stats.ignored += 1,
            }
            return None;
        }

        self.stats.undecodable += 1;
        None
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }
}

impl Default for DecoderChain {
    fn default() -> Self {
        Self::new()
    }
}
