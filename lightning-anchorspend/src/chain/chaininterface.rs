// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Traits and utility impls which allow the anchor spender to interact with the blockchain.
//!
//! Includes traits for transaction broadcasting, chain tip and feerate information requests.

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Transaction;

use crate::anchorspend::AnchorSpendHandle;

/// An interface to send anchor spends to the Bitcoin network.
pub trait BroadcasterInterface {
	/// Sends an anchor spend out to (hopefully) be mined.
	///
	/// The broadcaster is expected to keep retransmitting `tx` until it confirms or its commitment
	/// transaction is otherwise resolved, and to call [`AnchorSpender::refresh_anchor_spend`] with
	/// `handle` before every retransmission so that the spend can be replaced by a higher-fee one
	/// as the deadlines it protects draw near.
	///
	/// [`AnchorSpender::refresh_anchor_spend`]: crate::anchorspend::AnchorSpender::refresh_anchor_spend
	fn broadcast_anchor_spend(&self, tx: &Transaction, handle: AnchorSpendHandle);
}

/// Provides the chain tip and feerate estimates the anchor spender targets.
///
/// Note that all of the functions implemented here *must* be reentrant-safe (obviously - they're
/// called from inside the library in response to broadcast and retransmission events).
pub trait ChainTopology {
	/// Returns the height of the current best block.
	fn best_block_height(&self) -> u32;

	/// Gets estimated satoshis of fee required per 1000 Weight-Units for a transaction to confirm
	/// by the given block height.
	///
	/// Estimates below [`FEERATE_FLOOR_SATS_PER_KW`] are raised to it. Heights at or below the
	/// current best block should be answered with the most urgent estimate available.
	fn feerate_for_target(&self, block_height: u32) -> u32;

	/// Returns the locktime new transactions should carry, typically the current height to
	/// discourage fee sniping.
	fn default_locktime(&self) -> LockTime;
}

/// Minimum feerate that takes a sane approach to bitcoind weight-to-vbytes rounding, i.e. 1
/// satoshi-per-byte rounded up.
pub const FEERATE_FLOOR_SATS_PER_KW: u32 = 253;

/// Returns the fee, in satoshis, a transaction of the given weight must pay to reach the given
/// feerate, rounding up.
pub fn fee_for_weight(feerate_sat_per_1000_weight: u32, weight: u64) -> u64 {
	((feerate_sat_per_1000_weight as u64).saturating_mul(weight)).saturating_add(1000 - 1) / 1000
}

/// Returns the feerate, in satoshis per 1000 weight units, achieved by paying `fee_sat` for a
/// transaction of the given weight. Saturates rather than overflowing.
pub fn compute_feerate_sat_per_1000_weight(fee_sat: u64, weight: u64) -> u32 {
	if weight == 0 {
		return u32::MAX;
	}
	let feerate = fee_sat.saturating_mul(1000) / weight;
	u32::try_from(feerate).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fee_for_weight_rounds_up() {
		assert_eq!(fee_for_weight(253, 1000), 253);
		assert_eq!(fee_for_weight(253, 1001), 254);
		assert_eq!(fee_for_weight(1000, 800), 800);
		assert_eq!(fee_for_weight(0, 800), 0);
		assert_eq!(fee_for_weight(u32::MAX, u64::MAX), u64::MAX / 1000);
	}

	#[test]
	fn feerate_from_fee() {
		assert_eq!(compute_feerate_sat_per_1000_weight(253, 1000), 253);
		assert_eq!(compute_feerate_sat_per_1000_weight(600, 800), 750);
		assert_eq!(compute_feerate_sat_per_1000_weight(u64::MAX, 1), u32::MAX);
		assert_eq!(compute_feerate_sat_per_1000_weight(1, 0), u32::MAX);
	}
}
