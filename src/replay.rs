//! Single-pass replay
//!
//! Folds a chronological record stream through framing, the decoder chain
//! and the order book manager.

use serde::Serialize;
use tracing::{debug, info};

use crate::capture::RawRecord;
use crate::decoder::{DecodeStats, DecoderChain};
use crate::error::Result;
use crate::framing::{is_heartbeat, split_packet};
use crate::instruments::InstrumentTable;
use crate::orderbook::{BookMetrics, OrderBookManager};

/// Packets between progress log lines
const PROGRESS_INTERVAL: u64 = 100_000;

/// Counters for one replay run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    /// Packets taken from the input
    pub packets_read: u64,
    pub heartbeat_packets: u64,
    /// Message records after framing
    pub messages: u64,
    /// Order events handed to the manager
    pub events_applied: u64,
    /// Top-of-book snapshots emitted during this run
    pub snapshots: u64,
    /// True when the record cap ended the run early
    pub stopped_at_limit: bool,
    pub decode: DecodeStats,
    pub book: BookMetrics,
}

/// Drives records into an [`OrderBookManager`]
pub struct Replayer {
    chain: DecoderChain,
    instruments: InstrumentTable,
    max_records: Option<u64>,
}

impl Replayer {
    pub fn new(chain: DecoderChain, instruments: InstrumentTable) -> Self {
        Self {
            chain,
            instruments,
            max_records: None,
        }
    }

    /// Stop after this many packets; None replays everything
    pub fn with_max_records(mut self, max_records: Option<u64>) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn instruments(&self) -> &InstrumentTable {
        &self.instruments
    }

    /// Replay `records` in order, stopping at the first read error
    pub fn run<I>(&mut self, records: I, manager: &mut OrderBookManager) -> Result<ReplayStats>
    where
        I: IntoIterator<Item = Result<RawRecord>>,
    {
        let mut stats = ReplayStats::default();
        let history_before = manager.history_len();
        let mut records = records.into_iter();

        loop {
            if self.max_records.is_some_and(|max| stats.packets_read >= max) {
                info!(max_records = stats.packets_read, "Record limit reached");
                stats.stopped_at_limit = true;
                break;
            }
            let Some(record) = records.next() else {
                break;
            };
            let record = record?;
            stats.packets_read += 1;

            if is_heartbeat(&record.payload) {
                stats.heartbeat_packets += 1;
                continue;
            }

            for message in split_packet(&record) {
                stats.messages += 1;
                let Some(event) = self.chain.decode(&message, &self.instruments) else {
                    continue;
                };
                let Some(symbol) = self.instruments.symbol(event.instrument_id) else {
                    continue;
                };
                manager.process_order(symbol, &event);
                stats.events_applied += 1;
            }

            if stats.packets_read % PROGRESS_INTERVAL == 0 {
                info!(
                    packets = stats.packets_read,
                    events = stats.events_applied,
                    snapshots = manager.history_len() - history_before,
                    "Replay progress"
                );
            }
        }

        stats.snapshots = (manager.history_len() - history_before) as u64;
        stats.decode = self.chain.stats().clone();
        stats.book = manager.metrics();
        debug!(?stats, "Replay finished");
        Ok(stats)
    }
}
