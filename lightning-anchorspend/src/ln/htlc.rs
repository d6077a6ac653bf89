// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The HTLCs still pending on a closing channel, which is what an anchor spend protects.

use crate::ln::types::ChannelId;

/// An HTLC offered to us by our counterparty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InboundHtlc {
	/// The value of the HTLC.
	pub amount_msat: u64,
	/// The block height at which our counterparty may claim the HTLC back.
	pub cltv_expiry: u32,
	/// Whether we know the preimage, i.e. whether we can claim it on-chain.
	pub preimage_known: bool,
}

/// An HTLC we offered to our counterparty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutboundHtlc {
	/// The value of the HTLC.
	pub amount_msat: u64,
	/// The block height at which we may claim the HTLC back.
	pub cltv_expiry: u32,
	/// If we forwarded this HTLC, the CLTV expiry of the HTLC we received for it on the upstream
	/// channel. We must have failed or claimed it by then.
	pub upstream_cltv_expiry: Option<u32>,
}

/// Provides the HTLCs pending on a channel.
pub trait HtlcLedger {
	/// Returns the HTLCs offered to us on the given channel.
	fn inbound_htlcs(&self, channel_id: &ChannelId) -> Vec<InboundHtlc>;
	/// Returns the HTLCs we offered on the given channel.
	fn outbound_htlcs(&self, channel_id: &ChannelId) -> Vec<OutboundHtlc>;
}
