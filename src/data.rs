//! Candle loading for offline analysis
//!
//! Reads candle files written by a downloader or exported from an exchange:
//! - CSV with `openTime,open,high,low,close,volume[,closeTime]` headers
//! - JSON arrays of candle records, or raw exchange kline arrays
//!   (`[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`)
//!
//! `KlineSource` is the supplier seam the CLI scans through.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::{Candle, Timeframe};

/// Supplies the most recent `limit` candles for a symbol, oldest first
pub trait KlineSource: Send + Sync {
    fn get_klines(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>>;
}

/// Candle files in one directory, named `{SYMBOL}_{timeframe}.csv` or `.json`
#[derive(Debug, Clone)]
pub struct FileKlineSource {
    dir: PathBuf,
}

impl FileKlineSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, symbol: &str, timeframe: Timeframe) -> Option<PathBuf> {
        ["csv", "json"]
            .iter()
            .map(|ext| self.dir.join(format!("{}_{}.{}", symbol.to_uppercase(), timeframe, ext)))
            .find(|p| p.exists())
    }

    /// Symbols with a file for `timeframe`, sorted
    pub fn symbols(&self, timeframe: Timeframe) -> Result<Vec<String>> {
        let suffix = format!("_{}", timeframe);
        let mut symbols = Vec::new();
        for entry in std::fs::read_dir(&self.dir).with_context(|| format!("Failed to read {}", self.dir.display()))? {
            let entry = entry?;
            let path = entry.path();
            let is_candle_file = matches!(path.extension().and_then(|e| e.to_str()), Some("csv") | Some("json"));
            if !is_candle_file {
                continue;
            }
            if let Some(symbol) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|stem| stem.strip_suffix(&suffix))
            {
                symbols.push(symbol.to_string());
            }
        }
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }
}

impl KlineSource for FileKlineSource {
    fn get_klines(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        let path = self
            .path_for(symbol, timeframe)
            .ok_or_else(|| anyhow!("No {} candle file for {} in {}", timeframe, symbol, self.dir.display()))?;
        let mut candles = load_candles(&path, timeframe)?;
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        debug!(symbol, %timeframe, candles = candles.len(), "klines loaded");
        Ok(candles)
    }
}

/// Load a candle file, picking the parser from the extension.
/// Rows are sorted by open time; missing close times are derived from `timeframe`.
pub fn load_candles(path: &Path, timeframe: Timeframe) -> Result<Vec<Candle>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut candles = match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => parse_csv(&text, timeframe),
        Some("json") => parse_json(&text, timeframe),
        other => bail!("Unsupported candle file extension {:?} for {}", other, path.display()),
    }
    .with_context(|| format!("Failed to parse {}", path.display()))?;

    candles.sort_by_key(|c| c.open_time);
    info!("Loaded {} candles from {}", candles.len(), path.display());
    Ok(candles)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsvRow {
    open_time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    close_time: Option<i64>,
}

/// Parse CSV candle rows
pub fn parse_csv(text: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());

    let mut candles = Vec::new();
    for (line, result) in reader.deserialize().enumerate() {
        let row: CsvRow = result.with_context(|| format!("Failed to parse CSV row {}", line + 1))?;
        candles.push(build_candle(
            row.open_time,
            [row.open, row.high, row.low, row.close, row.volume],
            row.close_time,
            timeframe,
        )?);
    }
    Ok(candles)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonRow {
    Record(Candle),
    Kline(Vec<serde_json::Value>),
}

/// Parse a JSON array of candle records or raw kline arrays
pub fn parse_json(text: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
    let rows: Vec<JsonRow> = serde_json::from_str(text).context("Expected a JSON array of candles")?;
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| match row {
            JsonRow::Record(candle) => Ok(candle),
            JsonRow::Kline(fields) => kline_to_candle(&fields, timeframe).with_context(|| format!("Bad kline at {}", i)),
        })
        .collect()
}

fn kline_to_candle(fields: &[serde_json::Value], timeframe: Timeframe) -> Result<Candle> {
    if fields.len() < 6 {
        bail!("kline has {} fields, need at least 6", fields.len());
    }
    let open_time = fields[0].as_i64().ok_or_else(|| anyhow!("open time is not an integer"))?;
    let mut ohlcv = [0.0; 5];
    for (slot, value) in ohlcv.iter_mut().zip(&fields[1..6]) {
        *slot = number(value)?;
    }
    let close_time = fields.get(6).and_then(|v| v.as_i64());
    build_candle(open_time, ohlcv, close_time, timeframe)
}

/// Exchanges send prices as strings
fn number(value: &serde_json::Value) -> Result<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| anyhow!("{} is not a float", n)),
        serde_json::Value::String(s) => s.parse::<f64>().with_context(|| format!("'{}' is not a number", s)),
        other => bail!("unexpected value {}", other),
    }
}

fn millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("timestamp {} out of range", ms))
}

fn build_candle(open_time: i64, [open, high, low, close, volume]: [f64; 5], close_time: Option<i64>, timeframe: Timeframe) -> Result<Candle> {
    let open_time = millis(open_time)?;
    let close_time = match close_time {
        Some(ms) => millis(ms)?,
        None => open_time + Duration::minutes(timeframe.minutes()) - Duration::milliseconds(1),
    };
    Ok(Candle {
        open_time,
        open,
        high,
        low,
        close,
        volume,
        close_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
openTime,open,high,low,close,volume
# exported 2024-01-01
1704067200000,100.0,101.0,99.5,100.5,12.5
1704070800000,100.5,102.0,100.0,101.8,20
";

    #[test]
    fn test_parse_csv() {
        let candles = parse_csv(CSV, Timeframe::H1).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time.timestamp_millis(), 1_704_067_200_000);
        assert_eq!(candles[0].close_time.timestamp_millis(), 1_704_070_799_999);
        assert_eq!(candles[1].volume, 20.0);
    }

    #[test]
    fn test_parse_csv_reports_bad_row() {
        let err = parse_csv("openTime,open,high,low,close,volume\n1,abc,1,1,1,1\n", Timeframe::H1).unwrap_err();
        assert!(format!("{:#}", err).contains("row 1"));
    }

    #[test]
    fn test_parse_json_records_and_klines() {
        let records = r#"[{"openTime":1704067200000,"open":1.0,"high":2.0,"low":0.5,"close":1.5,"volume":3.0,"closeTime":1704070799999}]"#;
        let candles = parse_json(records, Timeframe::H1).unwrap();
        assert_eq!(candles[0].close, 1.5);

        let klines = r#"[[1704067200000,"42000.1","42100.0","41900.5","42050.0","12.3",1704070799999,"0",10,"0","0","0"]]"#;
        let candles = parse_json(klines, Timeframe::H1).unwrap();
        assert_eq!(candles[0].open, 42000.1);
        assert_eq!(candles[0].volume, 12.3);
        assert_eq!(candles[0].close_time.timestamp_millis(), 1_704_070_799_999);

        assert!(parse_json(r#"[[1704067200000,"1.0"]]"#, Timeframe::H1).is_err());
    }

    #[test]
    fn test_file_source() {
        let dir = std::env::temp_dir().join(format!("smc-scanner-data-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("BTCUSDT_1h.csv"), CSV).unwrap();
        std::fs::write(dir.join("ETHUSDT_4h.csv"), CSV).unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let source = FileKlineSource::new(&dir);
        assert_eq!(source.symbols(Timeframe::H1).unwrap(), vec!["BTCUSDT".to_string()]);

        let candles = source.get_klines("btcusdt", Timeframe::H1, 1).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 101.8);

        assert!(source.get_klines("SOLUSDT", Timeframe::H1, 10).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
