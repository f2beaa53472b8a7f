//! Configuration for a replay run
//!
//! Values come from defaults, then an optional TOML/JSON file named by
//! `MBO_CONFIG`, then `MBO_*` environment variables (a `.env` file is read
//! first if present).

use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::decoder::DEFAULT_SCHEMA_ID;
use crate::error::{ReplayError, Result};
use crate::instruments::InstrumentTable;
use crate::orderbook::{DuplicateNewPolicy, Price};
use crate::sink::OutputFormat;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_VAR: &str = "MBO_CONFIG";
const ENV_PREFIX: &str = "MBO";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Incremental market-data capture to replay
    pub incremental_path: Option<PathBuf>,

    /// Instrument-definition capture used for discovery
    pub instrument_path: Option<PathBuf>,

    /// Static instruments as `id:symbol,id:symbol`
    pub instruments: String,

    /// Symbol prefix kept by instrument discovery
    pub symbol_prefix: String,

    /// Stop after this many packets
    pub max_records: Option<u64>,

    /// Depth levels reported per side at the end of the run
    pub depth_levels: usize,

    pub duplicate_new_policy: DuplicateNewPolicy,

    /// SBE schema id of the feed
    pub schema_id: u16,

    /// Exclusive price band for heuristic decoding
    pub price_min: Price,
    pub price_max: Price,

    /// Where the top-of-book history is written
    pub output_path: PathBuf,
    pub output_format: OutputFormat,
}

impl Config {
    /// Load configuration from the environment and an optional file
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Ok(path) = env::var(CONFIG_FILE_VAR) {
            builder = builder.add_source(config::File::from(PathBuf::from(path)).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a file only
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Reject settings a run cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.incremental_path.is_none() {
            return Err(ReplayError::Config("incremental_path is not set".to_string()));
        }
        if self.price_min >= self.price_max {
            return Err(ReplayError::Config(format!(
                "price_min ({}) must be below price_max ({})",
                self.price_min, self.price_max
            )));
        }
        if self.depth_levels == 0 {
            return Err(ReplayError::Config("depth_levels must be positive".to_string()));
        }
        if self.symbol_prefix.is_empty() {
            return Err(ReplayError::Config("symbol_prefix must not be empty".to_string()));
        }
        Ok(())
    }

    /// The statically configured instruments
    pub fn instrument_table(&self) -> Result<InstrumentTable> {
        InstrumentTable::parse(&self.instruments)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            incremental_path: None,
            instrument_path: None,
            instruments: "200001478879:WDOZ24,2080363:WDOF25".to_string(),
            symbol_prefix: "WDO".to_string(),
            max_records: None,
            depth_levels: 5,
            duplicate_new_policy: DuplicateNewPolicy::Upsert,
            schema_id: DEFAULT_SCHEMA_ID,
            price_min: Decimal::from(5000),
            price_max: Decimal::from(7000),
            output_path: PathBuf::from("output/top_of_book.jsonl"),
            output_format: OutputFormat::Jsonl,
        }
    }
}
