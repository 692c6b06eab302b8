//! Record writers (C3): plug into the flush/segment engine (C2) via
//! [`crate::flush::Flushable`]. Two single-file variants (CSV for L1,
//! JSONL for L2/L3) plus a per-symbol multi-file wrapper.

pub mod csv_writer;
pub mod jsonl_writer;
mod multi;

pub use csv_writer::TickerCsvWriter;
pub use jsonl_writer::{BookJsonlWriter, Level3JsonlWriter};
pub use multi::MultiWriter;

/// Adaptive-precision formatting for analytical CSV output: format with
/// enough digits to round-trip, then strip a trailing `.0`/trailing zeros
/// so `100.50000` renders as `100.5` and `100.0` renders as `100`.
pub fn format_adaptive(value: f64) -> String {
    let s = format!("{value}");
    if !s.contains('.') {
        return s;
    }
    let trimmed = s.trim_end_matches('0');
    trimmed.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_zeros_and_dot() {
        assert_eq!(format_adaptive(100.0), "100");
        assert_eq!(format_adaptive(100.50), "100.5");
        assert_eq!(format_adaptive(0.30181846), "0.30181846");
    }

    #[test]
    fn preserves_significant_digits() {
        assert_eq!(format_adaptive(3313.25), "3313.25");
    }
}
