//! CSV OHLCV ingestion.
//!
//! Expected header: `date,open,high,low,close,volume`. Dates parse as
//! RFC 3339 or epoch seconds. A missing required column is reported by name
//! rather than as a row-level parse failure.

use std::path::Path;

use chrono::{DateTime, Utc};

use cxd_strategy::{Bar, Frame};

use crate::types::BacktestError;

const REQUIRED_COLUMNS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

/// Load one instrument's OHLCV history from a CSV file.
pub fn load_ohlcv_csv(path: impl AsRef<Path>) -> Result<Frame, BacktestError> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .map_err(|e| BacktestError::Loader(e.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|e| BacktestError::Loader(e.to_string()))?
        .clone();
    let index_of = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| index_of(c).is_none())
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(BacktestError::MissingColumns(missing));
    }

    let date_idx = index_of("date").expect("checked above");
    let open_idx = index_of("open").expect("checked above");
    let high_idx = index_of("high").expect("checked above");
    let low_idx = index_of("low").expect("checked above");
    let close_idx = index_of("close").expect("checked above");
    let volume_idx = index_of("volume").expect("checked above");

    let mut bars = Vec::new();
    for (row_no, record) in reader.records().enumerate() {
        let record = record.map_err(|e| BacktestError::Loader(e.to_string()))?;
        let field = |idx: usize| record.get(idx).unwrap_or("").trim().to_string();

        let date = parse_date(&field(date_idx)).ok_or_else(|| {
            BacktestError::Loader(format!("row {}: unparseable date {:?}", row_no + 1, field(date_idx)))
        })?;
        let parse_num = |idx: usize, name: &str| {
            field(idx).parse::<f64>().map_err(|_| {
                BacktestError::Loader(format!("row {}: bad {name} value", row_no + 1))
            })
        };

        bars.push(Bar {
            date,
            open: parse_num(open_idx, "open")?,
            high: parse_num(high_idx, "high")?,
            low: parse_num(low_idx, "low")?,
            close: parse_num(close_idx, "close")?,
            volume: parse_num(volume_idx, "volume")?,
        });
    }

    if bars.is_empty() {
        return Err(BacktestError::EmptyData);
    }
    bars.sort_by_key(|b| b.date);
    Ok(Frame::new(bars))
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(epoch) = raw.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp(epoch, 0);
    }
    None
}
