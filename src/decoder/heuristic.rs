//! Byte-pattern fallback decoding
//!
//! Used for records the SBE decoder cannot frame (fragmented or unknown
//! layouts). Looks for an instrument's little-endian security id, reads the
//! entry type two bytes after the id block, and checks a few fixed offsets
//! for a `price * 100` value inside the expected price band.
//!
//! The wire order id is not recoverable this way, so each (instrument, side)
//! gets one synthetic resting order. Every sighting is emitted as a NEW for
//! that id and upserts the quote in the book.

use rust_decimal::Decimal;
use std::collections::HashMap;

use super::{DecodedMessage, ExtractionStrategy};
use crate::capture::RawRecord;
use crate::instruments::InstrumentTable;
use crate::orderbook::{Action, InstrumentId, OrderEvent, OrderId, Price, Side};

/// Offsets after the security id searched for a price
const PRICE_OFFSETS: [usize; 7] = [8, 12, 16, 20, 24, 28, 32];
/// Offset after the security id of the entry type character
const ENTRY_TYPE_OFFSET: usize = 10;
/// Synthetic ids are allocated from here up, away from exchange ids
const SYNTHETIC_ID_BASE: OrderId = 1 << 62;

pub struct HeuristicStrategy {
    /// Exclusive price band
    price_min: Price,
    price_max: Price,
    next_order_id: OrderId,
    synthetic_ids: HashMap<(InstrumentId, Side), OrderId>,
}

impl HeuristicStrategy {
    pub fn new(price_min: Price, price_max: Price) -> Self {
        Self {
            price_min,
            price_max,
            next_order_id: SYNTHETIC_ID_BASE,
            synthetic_ids: HashMap::new(),
        }
    }

    fn synthetic_id(&mut self, instrument_id: InstrumentId, side: Side) -> OrderId {
        let next = &mut self.next_order_id;
        *self.synthetic_ids.entry((instrument_id, side)).or_insert_with(|| {
            let id = *next;
            *next += 1;
            id
        })
    }

    /// First in-band price after the id at `idx`
    fn price_at_offsets(&self, payload: &[u8], idx: usize) -> Option<Price> {
        for offset in PRICE_OFFSETS {
            let pos = idx + offset;
            let Some(raw) = payload.get(pos..pos + 4) else {
                break;
            };
            let ticks = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let price = Decimal::new(ticks as i64, 2);
            if price > self.price_min && price < self.price_max {
                return Some(price);
            }
        }
        None
    }
}

impl ExtractionStrategy for HeuristicStrategy {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn extract(
        &mut self,
        record: &RawRecord,
        instruments: &InstrumentTable,
    ) -> Option<DecodedMessage> {
        let payload = record.payload.as_ref();

        for instrument_id in instruments.ids() {
            let pattern = instrument_id.to_le_bytes();
            let Some(idx) = payload.windows(pattern.len()).position(|w| w == pattern) else {
                continue;
            };
            let side = match payload.get(idx + ENTRY_TYPE_OFFSET) {
                Some(b'0') => Side::Bid,
                Some(b'1') => Side::Offer,
                _ => continue,
            };
            let Some(price) = self.price_at_offsets(payload, idx) else {
                continue;
            };

            let order_id = self.synthetic_id(instrument_id, side);
            return Some(DecodedMessage::Order(OrderEvent {
                instrument_id,
                order_id,
                action: Action::New,
                side,
                price,
                // Size is not recoverable from the raw bytes
                quantity: 0,
                event_time: record.timestamp_ns,
            }));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const WDOZ24: InstrumentId = 200001478879;
    const WDOF25: InstrumentId = 2080363;

    fn instruments() -> InstrumentTable {
        InstrumentTable::from_iter([(WDOZ24, "WDOZ24".to_string()), (WDOF25, "WDOF25".to_string())])
    }

    /// Junk prefix, the id, an entry type and a price at `price_offset`
    fn payload(id: InstrumentId, entry_type: u8, price_offset: usize, ticks: u32) -> Vec<u8> {
        let mut out = vec![0xEEu8; 5];
        let start = out.len();
        out.extend_from_slice(&id.to_le_bytes());
        out.resize(start + 40, 0);
        out[start + ENTRY_TYPE_OFFSET] = entry_type;
        out[start + price_offset..start + price_offset + 4].copy_from_slice(&ticks.to_le_bytes());
        out
    }

    fn strategy() -> HeuristicStrategy {
        HeuristicStrategy::new(dec!(5000), dec!(7000))
    }

    #[test]
    fn test_finds_price_after_security_id() {
        let record = RawRecord::new(99, payload(WDOF25, b'1', 16, 583_050));
        let Some(DecodedMessage::Order(event)) = strategy().extract(&record, &instruments()) else {
            panic!("Expected order");
        };
        assert_eq!(event.instrument_id, WDOF25);
        assert_eq!(event.side, Side::Offer);
        assert_eq!(event.price, dec!(5830.50));
        assert_eq!(event.action, Action::New);
        assert_eq!(event.event_time, 99);
    }

    #[test]
    fn test_out_of_band_prices_are_skipped() {
        let mut bytes = payload(WDOZ24, b'0', 12, 100);
        bytes[5 + 24..5 + 28].copy_from_slice(&580_000u32.to_le_bytes());
        let record = RawRecord::new(1, bytes);
        let Some(DecodedMessage::Order(event)) = strategy().extract(&record, &instruments()) else {
            panic!("Expected order");
        };
        assert_eq!(event.price, dec!(5800.00));

        let record = RawRecord::new(1, payload(WDOZ24, b'0', 12, 700_000));
        assert_eq!(strategy().extract(&record, &instruments()), None);
    }

    #[test]
    fn test_unknown_entry_type_or_instrument_declines() {
        let mut heuristic = strategy();
        let record = RawRecord::new(1, payload(WDOZ24, b'2', 12, 580_000));
        assert_eq!(heuristic.extract(&record, &instruments()), None);

        let record = RawRecord::new(1, payload(42, b'0', 12, 580_000));
        assert_eq!(heuristic.extract(&record, &instruments()), None);
    }

    #[test]
    fn test_synthetic_ids_are_stable_per_instrument_side() {
        let mut heuristic = strategy();
        let mut ids = Vec::new();
        for (id, entry, ticks) in [
            (WDOZ24, b'0', 580_000),
            (WDOZ24, b'0', 580_050),
            (WDOZ24, b'1', 580_100),
            (WDOF25, b'0', 583_000),
        ] {
            let record = RawRecord::new(1, payload(id, entry, 12, ticks));
            match heuristic.extract(&record, &instruments()) {
                Some(DecodedMessage::Order(event)) => ids.push(event.order_id),
                other => panic!("Expected order, got {:?}", other),
            }
        }

        assert_eq!(ids[0], ids[1]);
        assert_ne!(ids[0], ids[2]);
        assert_ne!(ids[2], ids[3]);
        assert!(ids.iter().all(|&id| id >= SYNTHETIC_ID_BASE));
    }
}
