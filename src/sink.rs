//! Top-of-book history output
//!
//! Writes snapshots either as JSON lines or as MessagePack frames, each
//! frame prefixed with its length as a big-endian u32.

use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ReplayError, Result};
use crate::orderbook::TopOfBook;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON object per line
    #[default]
    Jsonl,
    /// Length-prefixed MessagePack frames
    Msgpack,
}

/// Streams snapshots to a writer
pub struct HistoryWriter<W: Write> {
    writer: W,
    format: OutputFormat,
    written: u64,
}

impl HistoryWriter<BufWriter<File>> {
    /// Create (or truncate) an output file, creating parent directories
    pub fn create(path: impl AsRef<Path>, format: OutputFormat) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        info!(path = %path.display(), ?format, "Writing top-of-book history");
        Ok(Self::new(BufWriter::new(file), format))
    }
}

impl<W: Write> HistoryWriter<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            writer,
            format,
            written: 0,
        }
    }

    /// Write one snapshot
    pub fn write(&mut self, tob: &TopOfBook) -> Result<()> {
        match self.format {
            OutputFormat::Jsonl => {
                serde_json::to_writer(&mut self.writer, tob)?;
                self.writer.write_all(b"\n")?;
            }
            OutputFormat::Msgpack => {
                let data = rmp_serde::to_vec_named(tob)?;
                let len = u32::try_from(data.len()).map_err(|_| {
                    ReplayError::Serialization(format!("Frame too large: {} bytes", data.len()))
                })?;
                self.writer.write_all(&len.to_be_bytes())?;
                self.writer.write_all(&data)?;
            }
        }
        self.written += 1;
        Ok(())
    }

    /// Write every snapshot in order
    pub fn write_all<'a, I>(&mut self, history: I) -> Result<u64>
    where
        I: IntoIterator<Item = &'a TopOfBook>,
    {
        let before = self.written;
        for tob in history {
            self.write(tob)?;
        }
        Ok(self.written - before)
    }

    /// Snapshots written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and hand back the writer
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        debug!(written = self.written, "History writer finished");
        Ok(self.writer)
    }
}
