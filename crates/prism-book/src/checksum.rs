//! Venue book checksums.

use prism_core::{ChecksumRule, Price, Size};
use std::fmt::Write;

/// Checksum of a book given best-first levels per side.
pub fn compute<'a, B, A>(rule: ChecksumRule, bids: B, asks: A) -> i32
where
    B: IntoIterator<Item = (&'a Price, &'a Size)>,
    A: IntoIterator<Item = (&'a Price, &'a Size)>,
{
    match rule {
        ChecksumRule::Crc32Top25 => crc32_interleaved(rule.depth(), bids, asks),
    }
}

/// CRC32 of `bid1px:bid1sz:ask1px:ask1sz:bid2px:...`, reinterpreted as i32.
/// A side that runs out of levels simply stops contributing.
fn crc32_interleaved<'a, B, A>(depth: usize, bids: B, asks: A) -> i32
where
    B: IntoIterator<Item = (&'a Price, &'a Size)>,
    A: IntoIterator<Item = (&'a Price, &'a Size)>,
{
    let mut bids = bids.into_iter().take(depth);
    let mut asks = asks.into_iter().take(depth);
    let mut input = String::with_capacity(depth * 48);

    for _ in 0..depth {
        let bid = bids.next();
        let ask = asks.next();
        if bid.is_none() && ask.is_none() {
            break;
        }
        for (price, size) in bid.into_iter().chain(ask) {
            if !input.is_empty() {
                input.push(':');
            }
            // Display keeps the scale the venue sent, which the checksum covers.
            let _ = write!(input, "{price}:{size}");
        }
    }
    crc32fast::hash(input.as_bytes()) as i32
}
