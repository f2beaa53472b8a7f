//! Instruments of interest
//!
//! The replay only tracks instruments listed in an [`InstrumentTable`]. The
//! table comes from configuration, from an instrument-definition capture, or
//! both.

use std::collections::btree_map::{self, BTreeMap};
use tracing::{debug, info};

use crate::capture::RawRecord;
use crate::decoder::{DecodedMessage, SbeStrategy};
use crate::error::{ReplayError, Result};
use crate::framing::split_packet;
use crate::orderbook::InstrumentId;

/// Futures month codes, January to December
const MONTH_CODES: &[u8] = b"FGHJKMNQUVXZ";
const EXCHANGE_TAG: &[u8] = b"BVMF";

/// Mapping `instrument_id -> symbol`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentTable {
    symbols: BTreeMap<InstrumentId, String>,
}

impl InstrumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `id:symbol,id:symbol` list
    pub fn parse(list: &str) -> Result<Self> {
        let mut table = Self::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, symbol) = entry.split_once(':').ok_or_else(|| {
                ReplayError::Config(format!("Expected id:symbol, got '{}'", entry))
            })?;
            let id: InstrumentId = id.trim().parse().map_err(|_| {
                ReplayError::Config(format!("Invalid instrument id '{}'", id.trim()))
            })?;
            let symbol = symbol.trim();
            if symbol.is_empty() {
                return Err(ReplayError::Config(format!("Missing symbol for instrument {}", id)));
            }
            table.insert(id, symbol);
        }
        Ok(table)
    }

    /// Insert or replace a mapping
    pub fn insert(&mut self, instrument_id: InstrumentId, symbol: &str) {
        self.symbols.insert(instrument_id, symbol.to_string());
    }

    /// Add entries from `other` whose ids are not already mapped
    pub fn merge(&mut self, other: InstrumentTable) {
        for (id, symbol) in other.symbols {
            self.symbols.entry(id).or_insert(symbol);
        }
    }

    pub fn contains(&self, instrument_id: InstrumentId) -> bool {
        self.symbols.contains_key(&instrument_id)
    }

    pub fn symbol(&self, instrument_id: InstrumentId) -> Option<&str> {
        self.symbols.get(&instrument_id).map(String::as_str)
    }

    /// Ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = InstrumentId> + '_ {
        self.symbols.keys().copied()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, InstrumentId, String> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl FromIterator<(InstrumentId, String)> for InstrumentTable {
    fn from_iter<I: IntoIterator<Item = (InstrumentId, String)>>(iter: I) -> Self {
        Self {
            symbols: iter.into_iter().collect(),
        }
    }
}

/// `prefix` + month code + two-digit year, e.g. `WDOF25`
pub fn is_future_symbol(symbol: &str, prefix: &str) -> bool {
    let Some(rest) = symbol.strip_prefix(prefix) else {
        return false;
    };
    let rest = rest.as_bytes();
    rest.len() == 3 && MONTH_CODES.contains(&rest[0]) && rest[1..].iter().all(u8::is_ascii_digit)
}

/// Build an instrument table from an instrument-definition capture
///
/// Symbols are read from SBE SecurityDefinition messages and from the raw
/// `BVMF` listing pattern. Only future symbols starting with `prefix` are
/// kept. Entries are keyed by security id, so every listed id is tracked
/// (a symbol relisted under a new id appears twice); the first symbol seen
/// for an id wins.
pub fn discover_instruments<I>(
    records: I,
    prefix: &str,
    schema_id: u16,
) -> Result<InstrumentTable>
where
    I: IntoIterator<Item = Result<RawRecord>>,
{
    let sbe = SbeStrategy::new(schema_id);
    let mut table = InstrumentTable::new();
    let mut keep = |id: InstrumentId, symbol: String| {
        if is_future_symbol(&symbol, prefix) && !table.contains(id) {
            debug!(instrument_id = id, symbol = %symbol, "Discovered instrument");
            table.symbols.insert(id, symbol);
        }
    };

    let mut packets = 0u64;
    for record in records {
        let record = record?;
        packets += 1;

        for message in split_packet(&record) {
            if let Some(DecodedMessage::InstrumentDefinition {
                instrument_id,
                symbol,
            }) = sbe.decode(&message)
            {
                keep(instrument_id, symbol);
            }
        }
        for (id, symbol) in scan_listings(&record.payload) {
            keep(id, symbol);
        }
    }

    info!(packets, instruments = table.len(), prefix, "Instrument discovery complete");
    Ok(table)
}

/// Every `id | BVMF xxx \0 symbol \0` listing in a payload
fn scan_listings(payload: &[u8]) -> Vec<(InstrumentId, String)> {
    let mut found = Vec::new();
    let mut pos = 8;
    while pos + 8 < payload.len() {
        if &payload[pos..pos + 4] != EXCHANGE_TAG {
            pos += 1;
            continue;
        }
        let segment_ok = payload[pos + 4..pos + 7]
            .iter()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
            && payload[pos + 7] == 0;
        if segment_ok {
            let symbol_start = pos + 8;
            if let Some(len) = payload[symbol_start..].iter().position(|&b| b == 0) {
                let symbol_bytes = &payload[symbol_start..symbol_start + len];
                if let Ok(symbol) = std::str::from_utf8(symbol_bytes) {
                    let id_bytes = &payload[pos - 8..pos];
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(id_bytes);
                    found.push((u64::from_le_bytes(raw), symbol.to_string()));
                }
            }
        }
        pos += 4;
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::sbe::tests::security_definition;
    use crate::framing::tests::{framed, packet_header};

    fn listing(id: InstrumentId, segment: &str, symbol: &str) -> Vec<u8> {
        let mut out = id.to_le_bytes().to_vec();
        out.extend_from_slice(EXCHANGE_TAG);
        out.extend_from_slice(segment.as_bytes());
        out.push(0);
        out.extend_from_slice(symbol.as_bytes());
        out.push(0);
        out
    }

    #[test]
    fn test_parse_list() {
        let table = InstrumentTable::parse("200001478879:WDOZ24, 2080363:WDOF25").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.symbol(2080363), Some("WDOF25"));
        assert_eq!(table.ids().collect::<Vec<_>>(), vec![2080363, 200001478879]);

        assert!(InstrumentTable::parse("").unwrap().is_empty());
        assert!(InstrumentTable::parse("abc:WDOF25").is_err());
        assert!(InstrumentTable::parse("2080363").is_err());
        assert!(InstrumentTable::parse("2080363:").is_err());
    }

    #[test]
    fn test_merge_keeps_existing() {
        let mut table = InstrumentTable::parse("1:WDOF25").unwrap();
        table.merge(InstrumentTable::parse("1:OTHER,2:WDOG25").unwrap());
        assert_eq!(table.symbol(1), Some("WDOF25"));
        assert_eq!(table.symbol(2), Some("WDOG25"));
    }

    #[test]
    fn test_future_symbol_filter() {
        assert!(is_future_symbol("WDOF25", "WDO"));
        assert!(is_future_symbol("WDOZ24", "WDO"));
        assert!(!is_future_symbol("WDOA25", "WDO"));
        assert!(!is_future_symbol("WDOF2", "WDO"));
        assert!(!is_future_symbol("WDOF25C05800", "WDO"));
        assert!(!is_future_symbol("DOLF25", "WDO"));
    }

    #[test]
    fn test_scan_listings() {
        let mut payload = vec![0xAAu8; 3];
        payload.extend(listing(2080363, "XBS", "WDOF25"));
        payload.extend(listing(9, "xx!", "WDOG25"));

        assert_eq!(scan_listings(&payload), vec![(2080363, "WDOF25".to_string())]);
    }

    #[test]
    fn test_discover_from_listings_and_definitions() {
        let mut raw = listing(200001478879, "XBS", "WDOZ24");
        raw.extend(listing(5, "XBS", "WINZ24"));
        raw.extend(listing(6, "XBS", "WDOZ24"));
        raw.extend(listing(2080363, "XBS", "WDOG25"));

        let mut packet = packet_header(1, 10);
        packet.extend(framed(&security_definition(2080363, "WDOF25")));

        let records = vec![Ok(RawRecord::new(1, raw)), Ok(RawRecord::new(2, packet))];
        let table = discover_instruments(records, "WDO", 2).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.symbol(200001478879), Some("WDOZ24"));
        assert_eq!(table.symbol(6), Some("WDOZ24"));
        assert_eq!(table.symbol(2080363), Some("WDOG25"));
        assert!(!table.contains(5));
    }

    #[test]
    fn test_discover_propagates_read_errors() {
        let records = vec![Err(ReplayError::Capture("broken".to_string()))];
        assert!(discover_instruments(records, "WDO", 2).is_err());
    }
}
