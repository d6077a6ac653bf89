// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Everything we know about the anchors of one broadcast commitment transaction and about what
//! getting it confirmed is worth.

use core::fmt;

use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::PublicKey;
use bitcoin::transaction::Transaction;
use bitcoin::{Amount, OutPoint, Txid};

use crate::anchorspend::deadline::{build_deadline_schedule, Deadline};
use crate::anchorspend::AnchorWallet;
use crate::chain::chaininterface::compute_feerate_sat_per_1000_weight;
use crate::ln::chan_utils::{find_anchor_output, get_anchor_redeemscript};
use crate::ln::channel::AnchorChannel;
use crate::ln::htlc::HtlcLedger;
use crate::ln::types::ChannelId;
use crate::sign::AnchorSpendSigner;
use crate::util::config::AnchorSpendConfig;
use crate::util::logger::{Logger, WithContext};

/// Whose commitment transaction an anchor belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommitmentSide {
	/// Our own commitment transaction, the one we just broadcast.
	Local,
	/// A commitment transaction of our counterparty, still spendable during the dispute window.
	Remote,
}

impl fmt::Display for CommitmentSide {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			CommitmentSide::Local => write!(f, "local"),
			CommitmentSide::Remote => write!(f, "remote"),
		}
	}
}

/// Where an anchor output is, along with the weight of and fee already paid by the commitment
/// transaction it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnchorLocation {
	/// The anchor output.
	pub outpoint: OutPoint,
	/// The weight of the commitment transaction carrying the anchor.
	pub commitment_weight: u64,
	/// The absolute fee paid by the commitment transaction carrying the anchor.
	pub commitment_fee: Amount,
}

impl AnchorLocation {
	/// The feerate the commitment transaction pays on its own.
	pub fn commitment_feerate_sat_per_1000_weight(&self) -> u32 {
		compute_feerate_sat_per_1000_weight(self.commitment_fee.to_sat(), self.commitment_weight)
	}
}

/// One anchor we may spend to get its commitment transaction confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorAttempt {
	/// Whose commitment transaction the anchor belongs to.
	pub side: CommitmentSide,
	/// Where the anchor is.
	pub location: AnchorLocation,
	/// The fee paid by the last spend of this anchor we broadcast, zero if we never did.
	pub last_spend_fee: Amount,
	/// Set while a spend of this anchor is being built and signed.
	pub spend_in_progress: bool,
}

/// The anchor state of a channel whose commitment transaction was broadcast.
///
/// Dropped when the commitment transaction is superseded or the channel is resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorContext {
	/// The channel the commitment transaction belongs to.
	pub channel_id: ChannelId,
	/// Our counterparty on the channel.
	pub counterparty_node_id: PublicKey,
	/// The commitment transaction we broadcast.
	pub commitment_txid: Txid,
	/// Our funding public key, which the anchor script commits to.
	pub funding_pubkey: PublicKey,
	/// What is at risk, at which height, sorted by ascending block and ending with the
	/// low-priority deadline if there is room for it before the maximum block height.
	pub deadlines: Vec<Deadline>,
	/// The witness script of our anchor outputs.
	pub anchor_witness_script: ScriptBuf,
	/// The anchors we may spend. Referred to by index.
	pub attempts: Vec<AnchorAttempt>,
}

impl AnchorContext {
	/// Returns whether the only deadline left is the low-priority one, i.e. nothing is at risk.
	pub fn only_low_priority_deadline(&self) -> bool {
		self.deadlines.len() == 1 && !self.deadlines[0].important
	}
}

/// Gathers the anchors we can spend for `commitment_tx` and what getting it confirmed is worth.
///
/// `commitment_fee` is the absolute fee paid by `commitment_tx`, which can't be computed from the
/// transaction alone.
///
/// Returns `None` if the channel has no anchors, if the signer can't sign anchor spends or if no
/// anchor could be found, e.g. because `commitment_tx` is a cooperative close.
pub fn build_anchor_context<
	W: AnchorWallet + ?Sized,
	S: AnchorSpendSigner + ?Sized,
	H: HtlcLedger + ?Sized,
	L: Logger + ?Sized,
>(
	channel: &AnchorChannel, commitment_tx: &Transaction, commitment_fee: Amount, wallet: &W,
	signer: &S, htlc_ledger: &H, config: &AnchorSpendConfig, logger: &L,
) -> Option<AnchorContext> {
	if !channel.channel_type.supports_anchors() {
		return None;
	}

	let logger =
		WithContext::from(logger, Some(channel.counterparty_node_id), Some(channel.channel_id));
	if !signer.supports_anchor_spend_signing() {
		log_error!(logger, "Signer not capable of signing anchor spends!");
		return None;
	}

	let anchor_witness_script = get_anchor_redeemscript(&channel.funding_pubkey);

	// Anchors of any of our counterparty's commitment transactions we know of come first.
	let mut attempts: Vec<AnchorAttempt> = wallet
		.known_anchor_locations(&channel.channel_id)
		.into_iter()
		.map(|location| AnchorAttempt {
			side: CommitmentSide::Remote,
			location,
			last_spend_fee: Amount::ZERO,
			spend_in_progress: false,
		})
		.collect();

	if let Some((outpoint, _)) = find_anchor_output(commitment_tx, &anchor_witness_script) {
		attempts.push(AnchorAttempt {
			side: CommitmentSide::Local,
			location: AnchorLocation {
				outpoint,
				commitment_weight: commitment_tx.weight().to_wu(),
				commitment_fee,
			},
			last_spend_fee: Amount::ZERO,
			spend_in_progress: false,
		});
	}

	log_debug!(logger, "We have {} anchor points to use", attempts.len());

	// Either a cooperative close, or a commitment transaction without an output to us nor any
	// HTLCs.
	if attempts.is_empty() {
		return None;
	}

	let deadlines = build_deadline_schedule(
		&htlc_ledger.inbound_htlcs(&channel.channel_id),
		&htlc_ledger.outbound_htlcs(&channel.channel_id),
		channel.close_attempt_height,
		config.cltv_expiry_delta,
		config.low_priority_anchor_blocks,
		&logger,
	);
	log_trace!(
		logger,
		"Anchor deadlines (block, msat): {}",
		log_iter!(deadlines.iter().map(|d| DisplayDeadline(d)))
	);

	Some(AnchorContext {
		channel_id: channel.channel_id,
		counterparty_node_id: channel.counterparty_node_id,
		commitment_txid: commitment_tx.compute_txid(),
		funding_pubkey: channel.funding_pubkey,
		deadlines,
		anchor_witness_script,
		attempts,
	})
}

struct DisplayDeadline<'a>(&'a Deadline);
impl<'a> fmt::Display for DisplayDeadline<'a> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if self.0.important {
			write!(f, "({}, {})", self.0.block, self.0.value_msat)
		} else {
			write!(f, "({}, low priority)", self.0.block)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::ln::channel::ChannelType;
	use crate::ln::htlc::{InboundHtlc, OutboundHtlc};
	use crate::util::test_utils::{
		anchor_commitment_tx, test_channel, TestHtlcLedger, TestLogger, TestSigner, TestWallet,
	};

	use bitcoin::hashes::Hash;

	const MODULE: &str = "lightning_anchorspend::anchorspend::context";

	#[test]
	fn no_context_without_anchors() {
		let logger = TestLogger::new();
		let mut channel = test_channel();
		channel.channel_type = ChannelType::StaticRemoteKey;
		let tx = anchor_commitment_tx(&channel, 1000);
		let context = build_anchor_context(
			&channel,
			&tx,
			Amount::from_sat(1000),
			&TestWallet::new(vec![]),
			&TestSigner::new(),
			&TestHtlcLedger::new(),
			&AnchorSpendConfig::default(),
			&logger,
		);
		assert!(context.is_none());
		logger.assert_log_contains(MODULE, "not capable", 0);
	}

	#[test]
	fn no_context_when_signer_incapable() {
		let logger = TestLogger::new();
		let channel = test_channel();
		let tx = anchor_commitment_tx(&channel, 1000);
		let context = build_anchor_context(
			&channel,
			&tx,
			Amount::from_sat(1000),
			&TestWallet::new(vec![]),
			&TestSigner::incapable(),
			&TestHtlcLedger::new(),
			&AnchorSpendConfig::default(),
			&logger,
		);
		assert!(context.is_none());
		logger.assert_log_contains(MODULE, "Signer not capable of signing anchor spends!", 1);
	}

	#[test]
	fn no_context_without_anchor_outputs() {
		let logger = TestLogger::new();
		let channel = test_channel();
		let mut tx = anchor_commitment_tx(&channel, 1000);
		// A cooperative close carries no anchor.
		tx.output.retain(|txout| txout.value.to_sat() != 330);
		let context = build_anchor_context(
			&channel,
			&tx,
			Amount::from_sat(1000),
			&TestWallet::new(vec![]),
			&TestSigner::new(),
			&TestHtlcLedger::new(),
			&AnchorSpendConfig::default(),
			&logger,
		);
		assert!(context.is_none());
		logger.assert_log_contains(MODULE, "We have 0 anchor points to use", 1);
	}

	#[test]
	fn collects_local_and_remote_anchors() {
		let logger = TestLogger::new();
		let channel = test_channel();
		let tx = anchor_commitment_tx(&channel, 1000);
		let wallet = TestWallet::new(vec![]);
		let remote = AnchorLocation {
			outpoint: OutPoint { txid: Txid::from_byte_array([9; 32]), vout: 3 },
			commitment_weight: 1124,
			commitment_fee: Amount::from_sat(2000),
		};
		wallet.add_anchor_location(channel.channel_id, remote);

		let htlcs = TestHtlcLedger::new();
		htlcs.add_inbound(
			channel.channel_id,
			InboundHtlc { amount_msat: 50_000, cltv_expiry: 700, preimage_known: true },
		);
		htlcs.add_outbound(
			channel.channel_id,
			OutboundHtlc { amount_msat: 10_000, cltv_expiry: 600, upstream_cltv_expiry: Some(650) },
		);
		htlcs.add_outbound(
			channel.channel_id,
			OutboundHtlc { amount_msat: 20_000, cltv_expiry: 610, upstream_cltv_expiry: Some(650) },
		);

		let context = build_anchor_context(
			&channel,
			&tx,
			Amount::from_sat(1000),
			&wallet,
			&TestSigner::new(),
			&htlcs,
			&AnchorSpendConfig::default(),
			&logger,
		)
		.unwrap();

		assert_eq!(context.commitment_txid, tx.compute_txid());
		assert_eq!(context.anchor_witness_script, get_anchor_redeemscript(&channel.funding_pubkey));
		assert_eq!(context.attempts.len(), 2);
		assert_eq!(context.attempts[0].side, CommitmentSide::Remote);
		assert_eq!(context.attempts[0].location, remote);
		assert_eq!(context.attempts[1].side, CommitmentSide::Local);
		assert_eq!(context.attempts[1].location.outpoint.txid, tx.compute_txid());
		assert_eq!(context.attempts[1].location.commitment_weight, tx.weight().to_wu());
		assert_eq!(context.attempts[1].location.commitment_fee, Amount::from_sat(1000));
		assert!(context.attempts.iter().all(|a| a.last_spend_fee == Amount::ZERO));
		assert!(context.attempts.iter().all(|a| !a.spend_in_progress));

		assert_eq!(
			context.deadlines,
			vec![
				Deadline { important: true, block: 650, value_msat: 30_000 },
				Deadline { important: true, block: 700, value_msat: 50_000 },
				Deadline { important: false, block: 700 + 2016, value_msat: 0 },
			]
		);
		assert!(!context.only_low_priority_deadline());
		logger.assert_log_contains(MODULE, "We have 2 anchor points to use", 1);
	}

	#[test]
	fn low_priority_deadline_only_without_htlcs() {
		let logger = TestLogger::new();
		let channel = test_channel();
		let tx = anchor_commitment_tx(&channel, 1000);
		let context = build_anchor_context(
			&channel,
			&tx,
			Amount::from_sat(1000),
			&TestWallet::new(vec![]),
			&TestSigner::new(),
			&TestHtlcLedger::new(),
			&AnchorSpendConfig::default(),
			&logger,
		)
		.unwrap();
		assert!(context.only_low_priority_deadline());
		assert_eq!(context.deadlines[0].block, channel.close_attempt_height + 2016);
	}
}
