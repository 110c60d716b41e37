//! Append-only trade log (spec §4.13). One row per terminal order event,
//! flushed immediately so a crash never loses a fill.
//!
//! Grounded on the teacher's `ingestor.rs::harvest_tick_to_csv` append-file
//! idiom (`data/<ticker>/<date>.csv`, `create_dir_all` then open-append), but
//! written through the `csv` crate's `Writer` instead of raw `writeln!` —
//! the crate was already a teacher dependency with no caller, so this is its
//! first real use.

use crate::exchange::types::{OrderRole, OrderStatus, Side};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct TradeLogRow {
    pub ts_ms: u64,
    pub strategy: String,
    pub ticker: String,
    pub order_id: String,
    pub side: Side,
    pub order_role: OrderRole,
    pub price: f64,
    pub size: f64,
    pub filled_size: f64,
    pub status: OrderStatus,
    pub pnl_usd: Option<f64>,
}

pub struct TradeLogWriter {
    dir: PathBuf,
}

impl TradeLogWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for_today(&self, ticker: &str) -> PathBuf {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        self.dir.join(ticker).join(format!("{date}.csv"))
    }

    /// Appends a row, creating the per-ticker directory and the CSV header on
    /// first write. Never panics: a write failure is logged and swallowed,
    /// matching the teacher's "best-effort tick harvester" stance — the
    /// trading loop must not stop because disk logging failed.
    pub fn append(&self, row: &TradeLogRow) {
        let path = self.path_for_today(&row.ticker);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("[TRADELOG] could not create {}: {}", parent.display(), e);
                return;
            }
        }
        match self.append_row(&path, row) {
            Ok(()) => {}
            Err(e) => log::error!("[TRADELOG] failed to append to {}: {}", path.display(), e),
        }
    }

    fn append_row(&self, path: &Path, row: &TradeLogRow) -> Result<(), csv::Error> {
        let needs_header = !path.exists();
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record([
                "ts_ms", "strategy", "ticker", "order_id", "side", "order_role", "price", "size",
                "filled_size", "status", "pnl_usd",
            ])?;
        }
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::{OrderRole, OrderStatus, Side};

    #[test]
    fn append_creates_directory_and_header_once() {
        let tmp = std::env::temp_dir().join(format!("tradelog-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&tmp);
        let writer = TradeLogWriter::new(&tmp);
        let row = TradeLogRow {
            ts_ms: 1,
            strategy: "grid".to_string(),
            ticker: "BTC-PERP".to_string(),
            order_id: "1".to_string(),
            side: Side::Buy,
            order_role: OrderRole::Open,
            price: 100.0,
            size: 1.0,
            filled_size: 1.0,
            status: OrderStatus::Filled,
            pnl_usd: None,
        };
        writer.append(&row);
        writer.append(&row);
        let path = writer.path_for_today("BTC-PERP");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
