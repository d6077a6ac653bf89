// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Various user-configurable anchor spending settings which [`AnchorSpender`] applies for you.
//!
//! [`AnchorSpender`]: crate::anchorspend::AnchorSpender

/// The minimum number of blocks from the chain tip the low-priority anchor spend will target.
pub const MIN_LOW_PRIORITY_TARGET_BLOCKS: u32 = 12;

/// Options which apply to how we decide whether, and how hard, to bump a force-closed channel's
/// commitment transaction through its anchor output.
///
/// Default::default() provides sane defaults.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AnchorSpendConfig {
	/// The CLTV expiry delta we apply to HTLCs we forward.
	///
	/// When an outbound HTLC has no upstream incoming HTLC (i.e. we are its origin), its deadline
	/// is placed this many blocks past its own expiry. This is the same delta a forwarding node
	/// would have used, so the deadline does not reveal that we are the payer.
	///
	/// Default value: 34.
	pub cltv_expiry_delta: u16,
	/// How many blocks past the latest HTLC deadline (or the close attempt height, if later) we
	/// place the zero-value low-priority deadline.
	///
	/// This guarantees we eventually try to get the commitment transaction confirmed even when
	/// nothing of value is at risk.
	///
	/// Default value: 2016, about two weeks.
	pub low_priority_anchor_blocks: u32,
	/// The minimum number of blocks from the current chain tip targeted when spending an anchor
	/// for the low-priority deadline alone.
	///
	/// Default value: [`MIN_LOW_PRIORITY_TARGET_BLOCKS`].
	pub min_low_priority_target_blocks: u32,
	/// The value, in satoshis, below which we will not create the change output of an anchor
	/// spend. If the change would be smaller we overpay fees to keep it at this value instead.
	///
	/// Default value: 546.
	pub dust_limit_satoshis: u64,
}

impl Default for AnchorSpendConfig {
	fn default() -> Self {
		AnchorSpendConfig {
			cltv_expiry_delta: 34,
			low_priority_anchor_blocks: 2016,
			min_low_priority_target_blocks: MIN_LOW_PRIORITY_TARGET_BLOCKS,
			dust_limit_satoshis: 546,
		}
	}
}
