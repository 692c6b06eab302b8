//! Shared CLI surface (§6): the flags common to all three live loggers,
//! plus the pair-spec and sampling-interval mini-grammars. Each binary owns
//! a thin `Cli` wrapping [`CommonArgs`] via `#[command(flatten)]`.

use crate::error::{IngestError, Result};
use crate::flush::SegmentMode;
use clap::Args;
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Comma-separated pair list, a text-file path (optionally `:N` to cap
    /// rows read), or a CSV-file path (`:<column>[:N]`).
    #[arg(short = 'p', long = "pairs")]
    pub pairs: String,

    /// Output file (segment keys/per-symbol suffixes are inserted before
    /// the extension).
    #[arg(short = 'o', long = "output", default_value = "output.csv")]
    pub output: String,

    /// Flush interval in seconds; 0 disables the time trigger.
    #[arg(short = 'f', long = "flush-interval", default_value_t = 30)]
    pub flush_interval: u64,

    /// Memory threshold in bytes; 0 disables the size trigger.
    #[arg(short = 'm', long = "memory-threshold", default_value_t = 10 * 1024 * 1024)]
    pub memory_threshold: usize,

    /// Rotate output files on UTC hour boundaries.
    #[arg(long = "hourly", conflicts_with = "daily")]
    pub hourly: bool,

    /// Rotate output files on UTC day boundaries.
    #[arg(long = "daily", conflicts_with = "hourly")]
    pub daily: bool,

    /// Open one output file per symbol instead of one shared file.
    #[arg(long = "separate-files")]
    pub separate_files: bool,
}

impl CommonArgs {
    pub fn segment_mode(&self) -> SegmentMode {
        if self.hourly {
            SegmentMode::Hourly
        } else if self.daily {
            SegmentMode::Daily
        } else {
            SegmentMode::None
        }
    }
}

/// Parse the `-p/--pairs` mini-grammar into a flat list of symbols.
///
/// - `BTC/USD,ETH/USD` -> comma-separated literal list.
/// - `pairs.txt` or `pairs.txt:50` -> one symbol per line, optional row cap.
/// - `pairs.csv:1` or `pairs.csv:1:50` -> one symbol per row from a 0-based
///   CSV column, optional row cap.
pub fn parse_pair_spec(spec: &str) -> Result<Vec<String>> {
    if !spec.contains('.') || looks_like_literal_list(spec) {
        return Ok(split_literal_list(spec));
    }

    let mut parts = spec.splitn(3, ':');
    let path = parts.next().unwrap();
    let is_csv = path.to_ascii_lowercase().ends_with(".csv");

    if !std::path::Path::new(path).exists() {
        return Ok(split_literal_list(spec));
    }

    if is_csv {
        let column: usize = parts
            .next()
            .ok_or_else(|| IngestError::Configuration(format!("{spec}: CSV pair spec needs a :<column> index")))?
            .parse()
            .map_err(|_| IngestError::Configuration(format!("{spec}: column index must be a number")))?;
        let limit = parts.next().map(|n| n.parse::<usize>()).transpose()
            .map_err(|_| IngestError::Configuration(format!("{spec}: row limit must be a number")))?;
        parse_pairs_from_csv(path, column, limit)
    } else {
        let limit = parts.next().map(|n| n.parse::<usize>()).transpose()
            .map_err(|_| IngestError::Configuration(format!("{spec}: row limit must be a number")))?;
        parse_pairs_from_text(path, limit)
    }
}

/// A bare comma list never looks like a `path[:N]` spec even if a symbol
/// contains a dot (there are none in Kraken's pair naming, but be safe).
fn looks_like_literal_list(spec: &str) -> bool {
    spec.contains(',') && !std::path::Path::new(spec.split(':').next().unwrap_or(spec)).exists()
}

fn split_literal_list(spec: &str) -> Vec<String> {
    spec.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn parse_pairs_from_text(path: &str, limit: Option<usize>) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| IngestError::Configuration(format!("could not read pairs file {path}: {e}")))?;
    let mut pairs: Vec<String> = contents.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect();
    if let Some(n) = limit {
        pairs.truncate(n);
    }
    if pairs.is_empty() {
        return Err(IngestError::Configuration(format!("{path}: no pairs found")));
    }
    Ok(pairs)
}

fn parse_pairs_from_csv(path: &str, column: usize, limit: Option<usize>) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| IngestError::Configuration(format!("could not read pairs CSV {path}: {e}")))?;
    let mut pairs = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::Configuration(format!("{path}: {e}")))?;
        let field = record.get(column).ok_or_else(|| {
            IngestError::Configuration(format!("{path}: column {column} out of range"))
        })?;
        let field = field.trim();
        if !field.is_empty() {
            pairs.push(field.to_string());
        }
        if let Some(n) = limit {
            if pairs.len() >= n {
                break;
            }
        }
    }
    if pairs.is_empty() {
        return Err(IngestError::Configuration(format!("{path}: no pairs found in column {column}")));
    }
    Ok(pairs)
}

/// Parse a `Ns`/`Nm`/`Nh` sampling interval (e.g. `30s`, `5m`, `1h`).
pub fn parse_interval(spec: &str) -> Result<Duration> {
    let spec = spec.trim();
    let (digits, unit) = spec.split_at(spec.len().saturating_sub(1));
    let n: u64 = digits
        .parse()
        .map_err(|_| IngestError::Configuration(format!("invalid interval {spec:?}: expected <N><s|m|h>")))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        _ => {
            return Err(IngestError::Configuration(format!(
                "invalid interval {spec:?}: unit must be s, m, or h"
            )))
        }
    };
    if secs == 0 {
        return Err(IngestError::Configuration("sampling interval must be > 0".into()));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_list_splits_and_trims() {
        let pairs = parse_pair_spec("BTC/USD, ETH/USD,SOL/USD").unwrap();
        assert_eq!(pairs, vec!["BTC/USD", "ETH/USD", "SOL/USD"]);
    }

    #[test]
    fn text_file_with_row_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.txt");
        std::fs::write(&path, "BTC/USD\nETH/USD\nSOL/USD\n").unwrap();
        let spec = format!("{}:2", path.to_str().unwrap());
        let pairs = parse_pair_spec(&spec).unwrap();
        assert_eq!(pairs, vec!["BTC/USD", "ETH/USD"]);
    }

    #[test]
    fn csv_file_with_column_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        std::fs::write(&path, "rank,symbol\n1,BTC/USD\n2,ETH/USD\n3,SOL/USD\n").unwrap();
        let spec = format!("{}:1:2", path.to_str().unwrap());
        let pairs = parse_pair_spec(&spec).unwrap();
        assert_eq!(pairs, vec!["symbol", "BTC/USD"]);
    }

    #[test]
    fn missing_file_falls_back_to_literal_single_pair() {
        let pairs = parse_pair_spec("BTC/USD").unwrap();
        assert_eq!(pairs, vec!["BTC/USD"]);
    }

    #[test]
    fn intervals_parse_each_unit() {
        assert_eq!(parse_interval("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(parse_interval("0s").is_err());
    }

    #[test]
    fn bad_unit_is_rejected() {
        assert!(parse_interval("10x").is_err());
    }
}
