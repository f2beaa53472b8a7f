//! MBO Replay - Order Book Reconstruction
//!
//! Replays an incremental market-data capture through the decoder chain,
//! rebuilds the order books of the configured instruments and writes the
//! top-of-book history.

use anyhow::{bail, Context};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mbo_replay::{
    discover_instruments, Config, DecoderChain, HistoryWriter, OrderBookManager, PcapReader,
    Replayer,
};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting MBO replay");

    let config = Config::load().context("Failed to load configuration")?;
    config.validate()?;
    info!(
        incremental = ?config.incremental_path,
        max_records = ?config.max_records,
        policy = ?config.duplicate_new_policy,
        "Configuration loaded"
    );

    // Static instruments first, discovered ones fill the gaps
    let mut instruments = config.instrument_table()?;
    if let Some(path) = &config.instrument_path {
        match PcapReader::open(path) {
            Ok(reader) => {
                let discovered =
                    discover_instruments(reader, &config.symbol_prefix, config.schema_id)?;
                instruments.merge(discovered);
            }
            Err(e) => warn!(error = %e, "Instrument discovery skipped"),
        }
    }
    if instruments.is_empty() {
        bail!("No instruments to track");
    }
    for (id, symbol) in instruments.iter() {
        info!(instrument_id = id, symbol = %symbol, "Tracking instrument");
    }

    let Some(incremental_path) = &config.incremental_path else {
        bail!("incremental_path is not set");
    };
    let reader = PcapReader::open(incremental_path)?;

    let chain = DecoderChain::standard(config.schema_id, config.price_min, config.price_max);
    info!(strategies = ?chain.strategy_names(), "Decoder chain ready");

    let mut manager = OrderBookManager::with_policy(config.duplicate_new_policy);
    let mut replayer = Replayer::new(chain, instruments).with_max_records(config.max_records);
    let stats = replayer.run(reader, &mut manager)?;
    info!(
        packets = stats.packets_read,
        messages = stats.messages,
        events = stats.events_applied,
        snapshots = stats.snapshots,
        stopped_at_limit = stats.stopped_at_limit,
        "Replay complete"
    );
    info!(stats = %serde_json::to_string(&stats)?, "Replay statistics");

    let mut writer = HistoryWriter::create(&config.output_path, config.output_format)?;
    let written = writer.write_all(&manager.chronological_history())?;
    writer.finish()?;
    info!(written, path = %config.output_path.display(), "History written");

    for instrument_id in manager.instrument_ids() {
        let Some(tob) = manager.current_top_of_book(instrument_id) else {
            continue;
        };
        info!(
            instrument_id,
            symbol = %tob.symbol,
            best_bid = ?tob.best_bid_price,
            best_offer = ?tob.best_offer_price,
            spread = ?tob.spread,
            at = %tob.timestamp().to_rfc3339(),
            "Final top of book"
        );
        if let Some(depth) = manager.depth(instrument_id, config.depth_levels) {
            info!(instrument_id, depth = %serde_json::to_string(&depth)?, "Final depth");
        }
    }

    Ok(())
}
