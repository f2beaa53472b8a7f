//! SBE message decoding
//!
//! Each message starts with the standard SBE header
//! `[block length u16 | template id u16 | schema id u16 | version u16]`
//! followed by a fixed root block. Only the fields the book needs are read.
//!
//! Root block layouts (byte offsets, little-endian):
//!
//! ```text
//! Order_MBO (50)          DeleteOrder_MBO (51)
//!  0 security id   u64     0 security id   u64
//!  8 match event   u8      8 match event   u8
//!  9 update action u8      9 update action u8
//! 10 entry type    u8     10 entry type    u8
//! 12 price         i64    12 position no   u32
//! 20 size          i64    16 size          i64
//! 28 position no   u32    24 order id      u64
//! 32 entering firm u32    32 entry time    u64
//! 36 insert time   u64    40 rpt seq       u32
//! 44 order id      u64
//! 52 rpt seq       u32
//! 56 entry time    u64
//!
//! Trade (53)              SecurityDefinition (12)
//!  0 security id   u64     0 security id   u64
//!  8 match event   u8      8 exchange      [u8; 4]
//!  9 session id    u8     12 symbol        [u8; 20]
//! 10 condition     u16
//! 12 price         i64
//! 20 size          i64
//! 28 trade id      u32
//! 32 entry time    u64
//! ```
//!
//! Prices are mantissas with four implied decimals.

use rust_decimal::Decimal;

use super::{DecodedMessage, ExtractionStrategy};
use crate::capture::RawRecord;
use crate::instruments::InstrumentTable;
use crate::orderbook::{Action, OrderEvent, Price, Side};

pub const DEFAULT_SCHEMA_ID: u16 = 2;
pub const SBE_HEADER_LEN: usize = 8;
const MAX_SCHEMA_VERSION: u16 = 20;

/// Implied decimals of a wire price mantissa
const PRICE_EXPONENT: u32 = 4;
/// Decimals the book quotes in
const QUOTE_DECIMALS: u32 = 2;
/// SBE null value for optional int64 prices
const NULL_PRICE: i64 = i64::MIN;

pub mod template {
    pub const SEQUENCE_RESET: u16 = 1;
    pub const SEQUENCE: u16 = 2;
    pub const SECURITY_STATUS: u16 = 3;
    pub const SECURITY_DEFINITION: u16 = 12;
    pub const ORDER_MBO: u16 = 50;
    pub const DELETE_ORDER_MBO: u16 = 51;
    pub const MASS_DELETE_ORDERS_MBO: u16 = 52;
    pub const TRADE: u16 = 53;
}

const ORDER_MBO_LEN: usize = 64;
const DELETE_ORDER_MBO_LEN: usize = 44;
const TRADE_LEN: usize = 40;
const SECURITY_DEFINITION_LEN: usize = 32;
const SYMBOL_LEN: usize = 20;

/// Standard SBE message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbeHeader {
    pub block_len: u16,
    pub template_id: u16,
    pub schema_id: u16,
    pub version: u16,
}

impl SbeHeader {
    pub fn parse(b: &[u8], off: usize) -> Option<Self> {
        Some(Self {
            block_len: le_u16(b, off)?,
            template_id: le_u16(b, off + 2)?,
            schema_id: le_u16(b, off + 4)?,
            version: le_u16(b, off + 6)?,
        })
    }

    fn plausible(&self, schema_id: u16) -> bool {
        self.schema_id == schema_id && (1..=MAX_SCHEMA_VERSION).contains(&self.version)
    }

    /// Find the first plausible header, trying offset 0 before scanning
    pub fn locate(payload: &[u8], schema_id: u16) -> Option<(usize, Self)> {
        if let Some(h) = Self::parse(payload, 0).filter(|h| h.plausible(schema_id)) {
            return Some((0, h));
        }
        (1..payload.len().saturating_sub(SBE_HEADER_LEN - 1))
            .filter_map(|pos| Self::parse(payload, pos).map(|h| (pos, h)))
            .find(|(_, h)| h.plausible(schema_id))
    }
}

/// Primary strategy: structured SBE decoding
#[derive(Debug, Clone)]
pub struct SbeStrategy {
    schema_id: u16,
}

impl SbeStrategy {
    pub fn new(schema_id: u16) -> Self {
        Self { schema_id }
    }

    /// Decode the first SBE message found in `record`
    pub fn decode(&self, record: &RawRecord) -> Option<DecodedMessage> {
        let payload = record.payload.as_ref();
        let (offset, header) = SbeHeader::locate(payload, self.schema_id)?;
        let body_start = offset + SBE_HEADER_LEN;
        let body = payload.get(body_start..body_start + header.block_len as usize)?;

        match header.template_id {
            template::ORDER_MBO => decode_order(body, record.timestamp_ns),
            template::DELETE_ORDER_MBO => decode_delete(body, record.timestamp_ns),
            template::TRADE => decode_trade(body, record.timestamp_ns),
            template::SECURITY_DEFINITION => decode_definition(body),
            template::SEQUENCE_RESET | template::SEQUENCE => Some(DecodedMessage::Heartbeat),
            template::SECURITY_STATUS | template::MASS_DELETE_ORDERS_MBO => {
                Some(DecodedMessage::Ignored {
                    template_id: header.template_id,
                })
            }
            // Unknown templates only count when the header sat where it belongs;
            // a header found by scanning may be a false match
            template_id if offset == 0 => Some(DecodedMessage::Ignored { template_id }),
            _ => None,
        }
    }
}

impl Default for SbeStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA_ID)
    }
}

impl ExtractionStrategy for SbeStrategy {
    fn name(&self) -> &'static str {
        "sbe"
    }

    fn extract(
        &mut self,
        record: &RawRecord,
        _instruments: &InstrumentTable,
    ) -> Option<DecodedMessage> {
        self.decode(record)
    }
}

fn decode_order(body: &[u8], fallback_time: u64) -> Option<DecodedMessage> {
    if body.len() < ORDER_MBO_LEN {
        return None;
    }
    let instrument_id = le_u64(body, 0)?;
    let action = Action::from_wire(body[9]);
    let Some(side) = entry_side(body[10]) else {
        return Some(DecodedMessage::Ignored {
            template_id: template::ORDER_MBO,
        });
    };
    let mantissa = le_i64(body, 12)?;
    let quantity = u64::try_from(le_i64(body, 20)?).ok()?;
    let order_id = le_u64(body, 44)?;
    let entry_time = le_u64(body, 56)?;

    let price = if mantissa == NULL_PRICE {
        // A delete does not need a price
        if action != Action::Delete {
            return None;
        }
        Decimal::ZERO
    } else {
        wire_price(mantissa)
    };

    Some(DecodedMessage::Order(OrderEvent {
        instrument_id,
        order_id,
        action,
        side,
        price,
        quantity,
        event_time: if entry_time != 0 { entry_time } else { fallback_time },
    }))
}

fn decode_delete(body: &[u8], fallback_time: u64) -> Option<DecodedMessage> {
    if body.len() < DELETE_ORDER_MBO_LEN {
        return None;
    }
    let instrument_id = le_u64(body, 0)?;
    let side = entry_side(body[10])?;
    let quantity = u64::try_from(le_i64(body, 16)?).unwrap_or(0);
    let order_id = le_u64(body, 24)?;
    let entry_time = le_u64(body, 32)?;

    Some(DecodedMessage::Order(OrderEvent {
        instrument_id,
        order_id,
        action: Action::Delete,
        side,
        price: Decimal::ZERO,
        quantity,
        event_time: if entry_time != 0 { entry_time } else { fallback_time },
    }))
}

fn decode_trade(body: &[u8], fallback_time: u64) -> Option<DecodedMessage> {
    if body.len() < TRADE_LEN {
        return None;
    }
    let entry_time = le_u64(body, 32)?;
    Some(DecodedMessage::Trade {
        instrument_id: le_u64(body, 0)?,
        price: wire_price(le_i64(body, 12)?),
        quantity: u64::try_from(le_i64(body, 20)?).unwrap_or(0),
        event_time: if entry_time != 0 { entry_time } else { fallback_time },
    })
}

fn decode_definition(body: &[u8]) -> Option<DecodedMessage> {
    if body.len() < SECURITY_DEFINITION_LEN {
        return None;
    }
    let instrument_id = le_u64(body, 0)?;
    let raw = &body[12..12 + SYMBOL_LEN];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(SYMBOL_LEN);
    let symbol = std::str::from_utf8(&raw[..end]).ok()?.trim().to_string();
    if symbol.is_empty() {
        return None;
    }
    Some(DecodedMessage::InstrumentDefinition { instrument_id, symbol })
}

/// `MDEntryType` character
fn entry_side(b: u8) -> Option<Side> {
    match b {
        b'0' => Some(Side::Bid),
        b'1' => Some(Side::Offer),
        _ => None,
    }
}

fn wire_price(mantissa: i64) -> Price {
    Decimal::new(mantissa, PRICE_EXPONENT).round_dp(QUOTE_DECIMALS)
}

#[inline]
fn le_u16(b: &[u8], off: usize) -> Option<u16> {
    b.get(off..off + 2).map(|s| u16::from_le_bytes([s[0], s[1]]))
}

#[inline]
fn le_u64(b: &[u8], off: usize) -> Option<u64> {
    let s = b.get(off..off + 8)?;
    Some(u64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]]))
}

#[inline]
fn le_i64(b: &[u8], off: usize) -> Option<i64> {
    le_u64(b, off).map(|v| v as i64)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    pub(crate) fn sbe_header(block_len: usize, template_id: u16) -> Vec<u8> {
        let mut h = Vec::with_capacity(SBE_HEADER_LEN);
        h.extend_from_slice(&(block_len as u16).to_le_bytes());
        h.extend_from_slice(&template_id.to_le_bytes());
        h.extend_from_slice(&DEFAULT_SCHEMA_ID.to_le_bytes());
        h.extend_from_slice(&9u16.to_le_bytes());
        h
    }

    /// SBE-encoded Order_MBO message
    pub(crate) fn order_mbo(
        security_id: u64,
        action: u8,
        entry_type: u8,
        mantissa: i64,
        size: i64,
        order_id: u64,
        entry_time: u64,
    ) -> Vec<u8> {
        let mut body = vec![0u8; ORDER_MBO_LEN];
        body[0..8].copy_from_slice(&security_id.to_le_bytes());
        body[9] = action;
        body[10] = entry_type;
        body[12..20].copy_from_slice(&mantissa.to_le_bytes());
        body[20..28].copy_from_slice(&size.to_le_bytes());
        body[44..52].copy_from_slice(&order_id.to_le_bytes());
        body[56..64].copy_from_slice(&entry_time.to_le_bytes());

        let mut msg = sbe_header(body.len(), template::ORDER_MBO);
        msg.extend(body);
        msg
    }

    /// SBE-encoded DeleteOrder_MBO message
    pub(crate) fn delete_order_mbo(
        security_id: u64,
        entry_type: u8,
        order_id: u64,
        entry_time: u64,
    ) -> Vec<u8> {
        let mut body = vec![0u8; DELETE_ORDER_MBO_LEN];
        body[0..8].copy_from_slice(&security_id.to_le_bytes());
        body[9] = 2;
        body[10] = entry_type;
        body[16..24].copy_from_slice(&3i64.to_le_bytes());
        body[24..32].copy_from_slice(&order_id.to_le_bytes());
        body[32..40].copy_from_slice(&entry_time.to_le_bytes());

        let mut msg = sbe_header(body.len(), template::DELETE_ORDER_MBO);
        msg.extend(body);
        msg
    }

    /// SBE-encoded SecurityDefinition message
    pub(crate) fn security_definition(security_id: u64, symbol: &str) -> Vec<u8> {
        let mut body = vec![0u8; SECURITY_DEFINITION_LEN];
        body[0..8].copy_from_slice(&security_id.to_le_bytes());
        body[8..12].copy_from_slice(b"BVMF");
        body[12..12 + symbol.len()].copy_from_slice(symbol.as_bytes());

        let mut msg = sbe_header(body.len(), template::SECURITY_DEFINITION);
        msg.extend(body);
        msg
    }

    fn decode(bytes: Vec<u8>, ts: u64) -> Option<DecodedMessage> {
        SbeStrategy::default().decode(&RawRecord::new(ts, bytes))
    }

    #[test]
    fn test_decode_order_new() {
        let msg = order_mbo(200001478879, 0, b'0', 58_005_000, 5, 777, 1_000);
        match decode(msg, 1) {
            Some(DecodedMessage::Order(event)) => {
                assert_eq!(event.instrument_id, 200001478879);
                assert_eq!(event.order_id, 777);
                assert_eq!(event.action, Action::New);
                assert_eq!(event.side, Side::Bid);
                assert_eq!(event.price, dec!(5800.50));
                assert_eq!(event.quantity, 5);
                assert_eq!(event.event_time, 1_000);
            }
            other => panic!("Expected order, got {:?}", other),
        }
    }

    #[test]
    fn test_order_without_entry_time_uses_record_time() {
        let msg = order_mbo(1, 1, b'1', 58_010_000, 2, 9, 0);
        let Some(DecodedMessage::Order(event)) = decode(msg, 4_242) else {
            panic!("Expected order");
        };
        assert_eq!(event.action, Action::Change);
        assert_eq!(event.side, Side::Offer);
        assert_eq!(event.event_time, 4_242);
    }

    #[test]
    fn test_null_price_new_is_rejected() {
        assert_eq!(decode(order_mbo(1, 0, b'0', NULL_PRICE, 2, 9, 1), 1), None);
        assert!(matches!(
            decode(order_mbo(1, 2, b'0', NULL_PRICE, 2, 9, 1), 1),
            Some(DecodedMessage::Order(OrderEvent { action: Action::Delete, .. }))
        ));
    }

    #[test]
    fn test_non_book_entry_type_is_ignored() {
        assert_eq!(
            decode(order_mbo(1, 0, b'J', 58_000_000, 2, 9, 1), 1),
            Some(DecodedMessage::Ignored {
                template_id: template::ORDER_MBO
            })
        );
    }

    #[test]
    fn test_decode_delete() {
        let Some(DecodedMessage::Order(event)) = decode(delete_order_mbo(5, b'1', 31, 77), 1) else {
            panic!("Expected delete");
        };
        assert_eq!(event.action, Action::Delete);
        assert_eq!(event.order_id, 31);
        assert_eq!(event.side, Side::Offer);
        assert_eq!(event.event_time, 77);
    }

    #[test]
    fn test_decode_definition_and_heartbeat() {
        assert_eq!(
            decode(security_definition(2080363, "WDOF25"), 1),
            Some(DecodedMessage::InstrumentDefinition {
                instrument_id: 2080363,
                symbol: "WDOF25".to_string()
            })
        );

        let mut seq = sbe_header(4, template::SEQUENCE);
        seq.extend_from_slice(&[0u8; 4]);
        assert_eq!(decode(seq, 1), Some(DecodedMessage::Heartbeat));
    }

    #[test]
    fn test_decode_trade() {
        let mut body = vec![0u8; TRADE_LEN];
        body[0..8].copy_from_slice(&9u64.to_le_bytes());
        body[12..20].copy_from_slice(&58_123_400i64.to_le_bytes());
        body[20..28].copy_from_slice(&15i64.to_le_bytes());
        let mut msg = sbe_header(body.len(), template::TRADE);
        msg.extend(body);

        assert_eq!(
            decode(msg, 5),
            Some(DecodedMessage::Trade {
                instrument_id: 9,
                price: dec!(5812.34),
                quantity: 15,
                event_time: 5
            })
        );
    }

    #[test]
    fn test_header_found_by_scanning() {
        let mut payload = vec![0xFFu8; 3];
        payload.extend(order_mbo(1, 0, b'0', 58_000_000, 1, 2, 3));
        assert!(matches!(decode(payload, 1), Some(DecodedMessage::Order(_))));
    }

    #[test]
    fn test_unknown_template_only_ignored_at_offset_zero() {
        let mut msg = sbe_header(4, 9301);
        msg.extend_from_slice(&[0u8; 4]);
        assert_eq!(decode(msg.clone(), 1), Some(DecodedMessage::Ignored { template_id: 9301 }));

        let mut shifted = vec![0xFFu8; 2];
        shifted.extend(msg);
        assert_eq!(decode(shifted, 1), None);
    }

    #[test]
    fn test_truncated_body_is_undecodable() {
        let mut msg = order_mbo(1, 0, b'0', 58_000_000, 1, 2, 3);
        msg.truncate(SBE_HEADER_LEN + 30);
        assert_eq!(decode(msg, 1), None);
    }

    proptest! {
        #[test]
        fn decode_random_input_does_not_panic(
            payload in proptest::collection::vec(any::<u8>(), 0..512)
        ) {
            let _ = SbeStrategy::default().decode(&RawRecord::new(0, payload));
        }
    }
}
