// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The description of a force-closing channel handed to the anchor spender.

use bitcoin::secp256k1::PublicKey;

use crate::ln::types::ChannelId;

/// The commitment format negotiated for a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelType {
	/// The original commitment format, without a static remote key nor anchors.
	Legacy,
	/// `option_static_remotekey`, no anchors.
	StaticRemoteKey,
	/// `option_anchor_outputs`, in which HTLC transactions still carry a fee.
	Anchors,
	/// `option_anchors_zero_fee_htlc_tx`.
	AnchorsZeroFeeHtlcTx,
}

impl ChannelType {
	/// Returns whether commitment transactions of this type carry anchor outputs.
	pub fn supports_anchors(&self) -> bool {
		match self {
			ChannelType::Legacy | ChannelType::StaticRemoteKey => false,
			ChannelType::Anchors | ChannelType::AnchorsZeroFeeHtlcTx => true,
		}
	}
}

/// A channel whose commitment transaction is being broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorChannel {
	/// The channel's identifier.
	pub channel_id: ChannelId,
	/// The node id of our counterparty.
	pub counterparty_node_id: PublicKey,
	/// The commitment format negotiated for this channel.
	pub channel_type: ChannelType,
	/// Our funding public key, which our anchor output's script commits to.
	pub funding_pubkey: PublicKey,
	/// The block height at which we decided to close the channel.
	///
	/// Used as the earliest base for the low-priority deadline when the channel carries no HTLCs.
	pub close_attempt_height: u32,
}

#[cfg(test)]
mod tests {
	use super::ChannelType;

	#[test]
	fn only_anchor_types_support_anchors() {
		assert!(!ChannelType::Legacy.supports_anchors());
		assert!(!ChannelType::StaticRemoteKey.supports_anchors());
		assert!(ChannelType::Anchors.supports_anchors());
		assert!(ChannelType::AnchorsZeroFeeHtlcTx.supports_anchors());
	}
}
