//! Bid ranking for ex-post bid-finding
//!
//! Ranks solver candidates by declared bid without committing any state.
//! Zero bids mark a candidate ineligible. The ranking is a shift-based
//! insertion into a running index array: a slot is displaced only by a
//! strictly greater bid, so candidates with equal bids keep their original
//! submission order.

use ethers::types::U256;

/// Rank candidate indices by descending declared bid.
///
/// `bids[i]` is the dry-queried bid for the solver at submission index `i`.
/// The returned vector holds submission indices in real-execution order;
/// zero-bid candidates never appear.
pub fn rank_bids(bids: &[U256]) -> Vec<usize> {
    let mut ranked: Vec<usize> = Vec::with_capacity(bids.len());

    for (index, bid) in bids.iter().enumerate() {
        if bid.is_zero() {
            continue;
        }
        // shift lower-ranked entries down one slot until a bid at least as
        // large as ours is in front
        let mut slot = ranked.len();
        while slot > 0 && bids[ranked[slot - 1]] < *bid {
            slot -= 1;
        }
        ranked.insert(slot, index);
    }

    ranked
}
