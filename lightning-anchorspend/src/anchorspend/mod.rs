// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Spending the anchor outputs of force-closed channels' commitment transactions to get them
//! confirmed in time.
//!
//! Once a commitment transaction is broadcast, [`AnchorSpender::commitment_broadcast`] records
//! its anchors and what is at risk if it doesn't confirm. When we learn whether our own broadcast
//! succeeded, [`AnchorSpender::on_commitment_outcome`] decides whether spending an anchor is worth
//! it and, if so, broadcasts a Child-Pays-For-Parent spend funded by wallet UTXOs. Every time the
//! broadcaster is about to retransmit that spend, [`AnchorSpender::refresh_anchor_spend`] lets us
//! replace it with a higher-fee one as deadlines draw near.

pub mod candidate;
pub mod context;
pub mod deadline;
pub mod rbf;
pub mod search;
mod signing;
pub mod sync;


use core::ops::Deref;
use core::sync::atomic::{AtomicU64, Ordering};

use std::sync::Mutex;

use bitcoin::secp256k1::PublicKey;
use bitcoin::transaction::{Transaction, TxOut};
use bitcoin::{Amount, OutPoint, ScriptBuf, Txid};

use crate::anchorspend::context::{
	build_anchor_context, AnchorContext, AnchorLocation, CommitmentSide,
};
use crate::anchorspend::rbf::admits_replacement;
use crate::anchorspend::search::choose_spend;
use crate::anchorspend::signing::sign_and_finalize;
use crate::chain::chaininterface::{BroadcasterInterface, ChainTopology};
use crate::ln::channel::AnchorChannel;
use crate::ln::htlc::HtlcLedger;
use crate::ln::types::ChannelId;
use crate::sign::AnchorSpendSigner;
use crate::util::config::AnchorSpendConfig;
use crate::util::hash_tables::{new_hash_map, HashMap};
use crate::util::logger::{Logger, WithContext};

/// The information needed to derive the key of an output we swept out of a previous unilateral
/// close, which the signer needs to spend it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnilateralCloseInfo {
	/// The channel which was closed.
	pub channel_id: ChannelId,
	/// Our counterparty on that channel.
	pub peer_id: PublicKey,
	/// The per-commitment point of the commitment transaction, if it isn't a static remote key
	/// output.
	pub commitment_point: Option<PublicKey>,
	/// The relative locktime of the output.
	pub csv: u32,
	/// Whether the channel featured anchor outputs.
	pub option_anchors: bool,
}

/// A wallet UTXO used to fund an anchor spend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FundingUtxo {
	/// The outpoint of the UTXO.
	pub outpoint: OutPoint,
	/// The output being spent.
	pub output: TxOut,
	/// The upper-bound weight consumed by the input's full [`TxIn::script_sig`] and
	/// [`TxIn::witness`], each with their lengths included, required to satisfy the output's
	/// script.
	///
	/// [`TxIn::script_sig`]: bitcoin::TxIn::script_sig
	/// [`TxIn::witness`]: bitcoin::TxIn::witness
	pub satisfaction_weight: u64,
	/// The index of the wallet key the output pays to.
	pub key_index: u32,
	/// Set if the output was swept out of a previous unilateral close.
	pub close_info: Option<UnilateralCloseInfo>,
}

/// What an [`AnchorWallet`] needs to know to pick UTXOs for an anchor spend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FundingRequest {
	/// The height of the current best block.
	pub current_height: u32,
	/// The fee already paid towards the target by the commitment transaction.
	pub already_paid: Amount,
	/// The smallest change output the spend may carry.
	pub min_output: Amount,
	/// The feerate the whole package should reach.
	pub target_feerate_sat_per_1000_weight: u32,
	/// The weight of the package before adding any UTXO.
	pub existing_weight: u64,
}

/// The UTXOs an [`AnchorWallet`] picked for an anchor spend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FundingSelection {
	/// The UTXOs picked, possibly none.
	pub utxos: Vec<FundingUtxo>,
	/// The weight of the package including the picked UTXOs' inputs.
	pub total_weight: u64,
	/// Set if the wallet ran out of UTXOs before reaching the target feerate.
	pub insufficient_funds: bool,
}

/// The on-chain wallet funding anchor spends.
pub trait AnchorWallet {
	/// Returns where the anchors of any commitment transaction of our counterparty we know of on
	/// the given channel are.
	fn known_anchor_locations(&self, channel_id: &ChannelId) -> Vec<AnchorLocation>;

	/// Picks confirmed UTXOs to bring a package of
	/// [`FundingRequest::existing_weight`] to [`FundingRequest::target_feerate_sat_per_1000_weight`]
	/// while leaving a change output of at least [`FundingRequest::min_output`].
	///
	/// If that isn't possible, returns the best it can do with
	/// [`FundingSelection::insufficient_funds`] set. The same request should yield the same
	/// selection while the wallet's UTXOs don't change.
	fn select_funding_inputs(&self, request: FundingRequest) -> FundingSelection;

	/// Returns a script to send the change of an anchor spend to.
	fn get_change_script(&self) -> Result<ScriptBuf, ()>;
}

/// Identifies an anchor spend we handed to the [`BroadcasterInterface`], to be passed back to
/// [`AnchorSpender::refresh_anchor_spend`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AnchorSpendHandle {
	/// The channel whose commitment transaction the spend pays for.
	pub channel_id: ChannelId,
	/// The commitment transaction the spend pays for.
	pub commitment_txid: Txid,
	/// Which of the channel's anchors the spend spends.
	pub attempt_idx: usize,
	/// Tells apart the anchor state recorded by successive calls to
	/// [`AnchorSpender::commitment_broadcast`], even for the same commitment transaction.
	generation: u64,
}

/// What the broadcaster should do with an anchor spend it is about to retransmit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetransmitDecision {
	/// Retransmit the spend as is.
	Keep,
	/// Retransmit the given spend instead, which replaces the previous one.
	Replace(Transaction),
	/// Stop retransmitting, the spend is no longer needed.
	Abandon,
}

struct TrackedContext {
	generation: u64,
	context: AnchorContext,
}

enum AttemptClaim {
	Ready(AnchorContext),
	InProgress,
	Gone,
}

/// Spends anchor outputs of broadcast commitment transactions when the value at risk justifies
/// it, and keeps replacing the spends as their deadlines draw near.
///
/// Anchor spends are signed by the [`AnchorSpendSigner`]; see [`sync::AnchorSpenderSync`] for a
/// version working with a synchronous signer.
pub struct AnchorSpender<B: Deref, T: Deref, W: Deref, S: Deref, H: Deref, L: Deref>
where
	B::Target: BroadcasterInterface,
	T::Target: ChainTopology,
	W::Target: AnchorWallet,
	S::Target: AnchorSpendSigner,
	H::Target: HtlcLedger,
	L::Target: Logger,
{
	broadcaster: B,
	chain: T,
	wallet: W,
	signer: S,
	htlc_ledger: H,
	logger: L,
	config: AnchorSpendConfig,
	contexts: Mutex<HashMap<ChannelId, TrackedContext>>,
	next_generation: AtomicU64,
}

impl<B: Deref, T: Deref, W: Deref, S: Deref, H: Deref, L: Deref> AnchorSpender<B, T, W, S, H, L>
where
	B::Target: BroadcasterInterface,
	T::Target: ChainTopology,
	W::Target: AnchorWallet,
	S::Target: AnchorSpendSigner,
	H::Target: HtlcLedger,
	L::Target: Logger,
{
	/// Constructs a new `AnchorSpender` tracking no commitment transaction.
	pub fn new(
		broadcaster: B, chain: T, wallet: W, signer: S, htlc_ledger: H, logger: L,
		config: AnchorSpendConfig,
	) -> Self {
		Self {
			broadcaster,
			chain,
			wallet,
			signer,
			htlc_ledger,
			logger,
			config,
			contexts: Mutex::new(new_hash_map()),
			next_generation: AtomicU64::new(0),
		}
	}

	/// Records the anchors of `commitment_tx`, which we just broadcast for `channel`, along with
	/// what is at risk if it doesn't confirm. `commitment_fee` is the fee it pays.
	///
	/// Any state for a previous commitment transaction of the channel is dropped, and its anchor
	/// spends abandoned on their next retransmission. Recording the same commitment transaction
	/// twice keeps the existing state.
	///
	/// Returns whether we may spend any anchor of `commitment_tx`.
	pub fn commitment_broadcast(
		&self, channel: &AnchorChannel, commitment_tx: &Transaction, commitment_fee: Amount,
	) -> bool {
		let logger = WithContext::from(
			&*self.logger,
			Some(channel.counterparty_node_id),
			Some(channel.channel_id),
		);
		let commitment_txid = commitment_tx.compute_txid();
		{
			let contexts = self.contexts.lock().unwrap();
			if let Some(tracked) = contexts.get(&channel.channel_id) {
				if tracked.context.commitment_txid == commitment_txid {
					return true;
				}
			}
		}

		let context = build_anchor_context(
			channel,
			commitment_tx,
			commitment_fee,
			&*self.wallet,
			&*self.signer,
			&*self.htlc_ledger,
			&self.config,
			&logger,
		);

		let mut contexts = self.contexts.lock().unwrap();
		let previous = match context {
			Some(context) => {
				let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
				contexts.insert(channel.channel_id, TrackedContext { generation, context })
			},
			None => contexts.remove(&channel.channel_id),
		};
		if let Some(previous) = previous {
			log_debug!(
				logger,
				"Commitment tx {} supersedes {}, dropping its anchor state",
				commitment_txid,
				previous.context.commitment_txid
			);
		}
		contexts.contains_key(&channel.channel_id)
	}

	/// Spends the anchors of the channel's commitment transaction if worth it, once we know
	/// whether our own broadcast of it succeeded.
	///
	/// If it did, our own anchor is spent; otherwise our counterparty's commitment transaction is
	/// presumably out there, and we spend the anchors of those we know of. Anchors we already
	/// spent are left to [`Self::refresh_anchor_spend`].
	pub async fn on_commitment_outcome(
		&self, channel_id: &ChannelId, own_broadcast_succeeded: bool,
	) {
		let side =
			if own_broadcast_succeeded { CommitmentSide::Local } else { CommitmentSide::Remote };

		let (commitment_txid, generation, attempt_idxs) = {
			let contexts = self.contexts.lock().unwrap();
			let tracked = match contexts.get(channel_id) {
				Some(tracked) => tracked,
				None => return,
			};
			let context = &tracked.context;
			let attempt_idxs: Vec<usize> = context
				.attempts
				.iter()
				.enumerate()
				.filter(|(_, attempt)| {
					attempt.side == side
						&& attempt.last_spend_fee == Amount::ZERO
						&& !attempt.spend_in_progress
				})
				.map(|(idx, _)| idx)
				.collect();
			(context.commitment_txid, tracked.generation, attempt_idxs)
		};

		for attempt_idx in attempt_idxs {
			let handle =
				AnchorSpendHandle { channel_id: *channel_id, commitment_txid, attempt_idx, generation };
			let context = match self.claim_attempt(&handle) {
				AttemptClaim::Ready(context) => context,
				AttemptClaim::InProgress => continue,
				AttemptClaim::Gone => return,
			};
			if context.attempts[attempt_idx].last_spend_fee != Amount::ZERO {
				self.release_attempt(&handle, None);
				continue;
			}

			let spend = self.spend_anchor(&context, attempt_idx).await;
			if !self.release_attempt(&handle, spend.as_ref().map(|(_, fee)| *fee)) {
				return;
			}
			if let Some((tx, fee)) = spend {
				let logger = WithContext::from(
					&*self.logger,
					Some(context.counterparty_node_id),
					Some(context.channel_id),
				);
				log_info!(
					logger,
					"Creating anchor spend for {} commitment tx {}: we're paying fee {} sat",
					side,
					commitment_txid,
					fee.to_sat()
				);
				self.broadcaster.broadcast_anchor_spend(&tx, handle);
			}
		}
	}

	/// Called by the broadcaster before every retransmission of `old_tx`, the anchor spend it was
	/// handed along with `handle`.
	///
	/// Returns [`RetransmitDecision::Replace`] with a higher-fee spend if the deadlines now call
	/// for one, and [`RetransmitDecision::Abandon`] if the commitment transaction was superseded
	/// or the channel resolved.
	pub async fn refresh_anchor_spend(
		&self, handle: &AnchorSpendHandle, old_tx: &Transaction,
	) -> RetransmitDecision {
		let context = match self.claim_attempt(handle) {
			AttemptClaim::Ready(context) => context,
			AttemptClaim::InProgress => return RetransmitDecision::Keep,
			AttemptClaim::Gone => return RetransmitDecision::Abandon,
		};
		let attempt = &context.attempts[handle.attempt_idx];

		let spend = self.spend_anchor(&context, handle.attempt_idx).await;
		if !self.release_attempt(handle, spend.as_ref().map(|(_, fee)| *fee)) {
			return RetransmitDecision::Abandon;
		}

		match spend {
			Some((tx, fee)) => {
				let logger = WithContext::from(
					&*self.logger,
					Some(context.counterparty_node_id),
					Some(context.channel_id),
				);
				log_info!(
					logger,
					"RBF anchor {} commitment tx spend {}: fee was {} sat now {} sat",
					attempt.side,
					old_tx.compute_txid(),
					attempt.last_spend_fee.to_sat(),
					fee.to_sat()
				);
				log_debug!(logger, "Old anchor spend: {}", log_tx!(old_tx));
				log_debug!(logger, "New anchor spend: {}", log_tx!(tx));
				RetransmitDecision::Replace(tx)
			},
			None => RetransmitDecision::Keep,
		}
	}

	/// Drops everything known about the channel's anchors, e.g. once its commitment transaction
	/// is deeply confirmed. Pending anchor spends are abandoned on their next retransmission.
	pub fn channel_resolved(&self, channel_id: &ChannelId) {
		self.contexts.lock().unwrap().remove(channel_id);
	}

	/// Returns a copy of what is known about the channel's anchors, if it has a commitment
	/// transaction in flight.
	pub fn anchor_context(&self, channel_id: &ChannelId) -> Option<AnchorContext> {
		self.contexts.lock().unwrap().get(channel_id).map(|tracked| tracked.context.clone())
	}

	/// Returns the handle a spend of the given attempt of the channel's current anchor state would
	/// be broadcast with.
	#[cfg(test)]
	pub(crate) fn current_handle(
		&self, channel_id: &ChannelId, attempt_idx: usize,
	) -> Option<AnchorSpendHandle> {
		self.contexts.lock().unwrap().get(channel_id).map(|tracked| AnchorSpendHandle {
			channel_id: *channel_id,
			commitment_txid: tracked.context.commitment_txid,
			attempt_idx,
			generation: tracked.generation,
		})
	}

	/// Looks up the anchor state `handle` was issued for, which is gone if it was dropped since,
	/// even if the same commitment transaction was recorded again.
	fn tracked_context<'a>(
		contexts: &'a mut HashMap<ChannelId, TrackedContext>, handle: &AnchorSpendHandle,
	) -> Option<&'a mut AnchorContext> {
		match contexts.get_mut(&handle.channel_id) {
			Some(tracked) if tracked.generation == handle.generation => {
				debug_assert_eq!(tracked.context.commitment_txid, handle.commitment_txid);
				Some(&mut tracked.context)
			},
			_ => None,
		}
	}

	fn claim_attempt(&self, handle: &AnchorSpendHandle) -> AttemptClaim {
		let mut contexts = self.contexts.lock().unwrap();
		let context = match Self::tracked_context(&mut contexts, handle) {
			Some(context) => context,
			None => return AttemptClaim::Gone,
		};
		match context.attempts.get_mut(handle.attempt_idx) {
			Some(attempt) if attempt.spend_in_progress => return AttemptClaim::InProgress,
			Some(attempt) => attempt.spend_in_progress = true,
			None => return AttemptClaim::Gone,
		}
		AttemptClaim::Ready(context.clone())
	}

	/// Returns false if the attempt's context went away while we were spending it.
	fn release_attempt(&self, handle: &AnchorSpendHandle, spend_fee: Option<Amount>) -> bool {
		let mut contexts = self.contexts.lock().unwrap();
		let context = match Self::tracked_context(&mut contexts, handle) {
			Some(context) => context,
			None => return false,
		};
		match context.attempts.get_mut(handle.attempt_idx) {
			Some(attempt) => {
				debug_assert!(attempt.spend_in_progress);
				attempt.spend_in_progress = false;
				if let Some(fee) = spend_fee {
					attempt.last_spend_fee = fee;
				}
				true
			},
			None => false,
		}
	}

	async fn spend_anchor(
		&self, context: &AnchorContext, attempt_idx: usize,
	) -> Option<(Transaction, Amount)> {
		let logger = WithContext::from(
			&*self.logger,
			Some(context.counterparty_node_id),
			Some(context.channel_id),
		);
		let attempt = context.attempts.get(attempt_idx)?;

		let candidate =
			choose_spend(context, attempt_idx, &*self.chain, &*self.wallet, &self.config, &logger)?;

		if !admits_replacement(candidate.fee, attempt.last_spend_fee, candidate.weight) {
			log_debug!(
				logger,
				"Not replacing {} commitment tx anchor spend paying {} sat with one paying {} sat",
				attempt.side,
				attempt.last_spend_fee.to_sat(),
				candidate.fee.to_sat()
			);
			return None;
		}

		log_debug!(
			logger,
			"Spending {} commitment tx anchor for a package feerate of {} sat/kW",
			attempt.side,
			candidate.package_feerate_sat_per_1000_weight
		);
		let tx = sign_and_finalize(context, &candidate, &*self.signer, &logger).await?;
		Some((tx, candidate.fee))
	}
}
