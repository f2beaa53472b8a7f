//! MBO Replay - Order Book Reconstruction Library
//!
//! Replays market-by-order packet captures, rebuilds per-instrument order
//! books and records the top-of-book history.

pub mod capture;
pub mod config;
pub mod decoder;
pub mod error;
pub mod framing;
pub mod instruments;
pub mod orderbook;
pub mod replay;
pub mod sink;

pub use capture::{PcapReader, RawRecord};
pub use config::Config;
pub use decoder::{DecodedMessage, DecoderChain, ExtractionStrategy};
pub use error::{ReplayError, Result};
pub use instruments::{discover_instruments, InstrumentTable};
pub use orderbook::{OrderBook, OrderBookManager, OrderEvent, TopOfBook};
pub use replay::{ReplayStats, Replayer};
pub use sink::{HistoryWriter, OutputFormat};
