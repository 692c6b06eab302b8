//! Kraken's book checksum algorithm.
//!
//! The exchange publishes a CRC32 over the top levels of a book, computed
//! from the *string* representation of each price and quantity with the
//! decimal point removed and leading zeros stripped. v1 of the feed sends
//! price/qty as JSON strings already in that shape; v2 sends them as plain
//! JSON numbers, so this module re-stringifies the f64 first (natural
//! decimal formatting, i.e. whatever digits Kraken actually sent rounded
//! through `f64`) before applying the same strip rule. This mirrors the
//! reference implementation's `format_str_for_hash` step.

/// Strip '.' then strip leading zeros, per Kraken's checksum string rule.
fn format_for_hash(value: f64) -> String {
    let formatted = format!("{value}");
    let no_dot: String = formatted.chars().filter(|c| *c != '.').collect();
    let first_nonzero = no_dot.chars().position(|c| c != '0').unwrap_or(no_dot.len());
    no_dot[first_nonzero..].to_string()
}

/// Compute the checksum over a side-sorted slice of (price, qty) pairs.
/// Callers are responsible for passing the correct number of top levels
/// and the correct sort order (ascending for asks, descending for bids).
fn hash_levels(hasher: &mut crc32fast::Hasher, levels: &[(f64, f64)], depth: usize) {
    for &(price, qty) in levels.iter().take(depth) {
        hasher.update(format_for_hash(price).as_bytes());
        hasher.update(format_for_hash(qty).as_bytes());
    }
}

/// Depth over which Kraken computes the published book checksum.
pub const CHECKSUM_DEPTH: usize = 10;

/// Compute the L2 book checksum: asks ascending then bids descending, top
/// [`CHECKSUM_DEPTH`] levels of each side.
pub fn book_checksum(asks_ascending: &[(f64, f64)], bids_descending: &[(f64, f64)]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hash_levels(&mut hasher, asks_ascending, CHECKSUM_DEPTH);
    hash_levels(&mut hasher, bids_descending, CHECKSUM_DEPTH);
    hasher.finalize()
}
