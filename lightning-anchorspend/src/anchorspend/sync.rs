// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! This module provides synchronous wrappers around [`AnchorSpender`] and [`AnchorSpendSigner`].

use core::future::Future;
use core::ops::Deref;
use core::pin::pin;
use core::task;

use bitcoin::psbt::Psbt;
use bitcoin::transaction::Transaction;
use bitcoin::Amount;

use crate::anchorspend::context::AnchorContext;
use crate::anchorspend::{AnchorSpendHandle, AnchorSpender, AnchorWallet, RetransmitDecision};
use crate::chain::chaininterface::{BroadcasterInterface, ChainTopology};
use crate::ln::channel::AnchorChannel;
use crate::ln::htlc::HtlcLedger;
use crate::ln::types::ChannelId;
use crate::sign::{AnchorSpendSigner, SignAnchorSpendRequest};
use crate::util::async_poll::dummy_waker;
use crate::util::config::AnchorSpendConfig;
use crate::util::errors::AnchorSpendSignerError;
use crate::util::logger::Logger;

/// A synchronous version of the [`AnchorSpendSigner`] trait.
// Note that updates to documentation on this trait should be copied to the asynchronous version.
pub trait AnchorSpendSignerSync {
	/// Returns whether the signer is able to sign anchor spends at all.
	fn supports_anchor_spend_signing(&self) -> bool;

	/// Signs the anchor input with the channel's funding key and every other input with the
	/// wallet key described by the matching [`SignerUtxo`], returning the PSBT with each input's
	/// `final_script_witness` set.
	///
	/// [`SignerUtxo`]: crate::sign::SignerUtxo
	fn sign_anchor_spend(
		&self, request: SignAnchorSpendRequest,
	) -> Result<Psbt, AnchorSpendSignerError>;
}

pub(crate) struct AnchorSpendSignerSyncWrapper<T: Deref>(T)
where
	T::Target: AnchorSpendSignerSync;

// Implement `Deref` directly on AnchorSpendSignerSyncWrapper so that it can be used directly
// below, rather than via a wrapper.
impl<T: Deref> Deref for AnchorSpendSignerSyncWrapper<T>
where
	T::Target: AnchorSpendSignerSync,
{
	type Target = Self;
	fn deref(&self) -> &Self {
		self
	}
}

impl<T: Deref> AnchorSpendSigner for AnchorSpendSignerSyncWrapper<T>
where
	T::Target: AnchorSpendSignerSync,
{
	fn supports_anchor_spend_signing(&self) -> bool {
		self.0.supports_anchor_spend_signing()
	}

	fn sign_anchor_spend<'a>(
		&'a self, request: SignAnchorSpendRequest,
	) -> impl Future<Output = Result<Psbt, AnchorSpendSignerError>> + Send + 'a {
		let psbt = self.0.sign_anchor_spend(request);
		async move { psbt }
	}
}

/// Spends anchor outputs of broadcast commitment transactions, having them signed by an
/// [`AnchorSpendSignerSync`].
///
/// For an asynchronous version of this type, see [`AnchorSpender`].
// Note that updates to documentation on this struct should be copied to the asynchronous version.
pub struct AnchorSpenderSync<B: Deref, T: Deref, W: Deref, S: Deref, H: Deref, L: Deref>
where
	B::Target: BroadcasterInterface,
	T::Target: ChainTopology,
	W::Target: AnchorWallet,
	S::Target: AnchorSpendSignerSync,
	H::Target: HtlcLedger,
	L::Target: Logger,
{
	anchor_spender: AnchorSpender<B, T, W, AnchorSpendSignerSyncWrapper<S>, H, L>,
}

impl<B: Deref, T: Deref, W: Deref, S: Deref, H: Deref, L: Deref> AnchorSpenderSync<B, T, W, S, H, L>
where
	B::Target: BroadcasterInterface,
	T::Target: ChainTopology,
	W::Target: AnchorWallet,
	S::Target: AnchorSpendSignerSync,
	H::Target: HtlcLedger,
	L::Target: Logger,
{
	/// Constructs a new instance of [`AnchorSpenderSync`].
	pub fn new(
		broadcaster: B, chain: T, wallet: W, signer: S, htlc_ledger: H, logger: L,
		config: AnchorSpendConfig,
	) -> Self {
		let anchor_spender = AnchorSpender::new(
			broadcaster,
			chain,
			wallet,
			AnchorSpendSignerSyncWrapper(signer),
			htlc_ledger,
			logger,
			config,
		);
		Self { anchor_spender }
	}

	/// See [`AnchorSpender::commitment_broadcast`].
	pub fn commitment_broadcast(
		&self, channel: &AnchorChannel, commitment_tx: &Transaction, commitment_fee: Amount,
	) -> bool {
		self.anchor_spender.commitment_broadcast(channel, commitment_tx, commitment_fee)
	}

	/// See [`AnchorSpender::on_commitment_outcome`].
	pub fn on_commitment_outcome(&self, channel_id: &ChannelId, own_broadcast_succeeded: bool) {
		let mut fut =
			pin!(self.anchor_spender.on_commitment_outcome(channel_id, own_broadcast_succeeded));
		let waker = dummy_waker();
		let mut ctx = task::Context::from_waker(&waker);
		match fut.as_mut().poll(&mut ctx) {
			task::Poll::Ready(()) => {},
			task::Poll::Pending => {
				// In a sync context, we can't wait for the future to complete.
				unreachable!("AnchorSpenderSync::on_commitment_outcome should not be pending in a sync context");
			},
		}
	}

	/// See [`AnchorSpender::refresh_anchor_spend`].
	pub fn refresh_anchor_spend(
		&self, handle: &AnchorSpendHandle, old_tx: &Transaction,
	) -> RetransmitDecision {
		let mut fut = pin!(self.anchor_spender.refresh_anchor_spend(handle, old_tx));
		let waker = dummy_waker();
		let mut ctx = task::Context::from_waker(&waker);
		match fut.as_mut().poll(&mut ctx) {
			task::Poll::Ready(decision) => decision,
			task::Poll::Pending => {
				// In a sync context, we can't wait for the future to complete.
				unreachable!("AnchorSpenderSync::refresh_anchor_spend should not be pending in a sync context");
			},
		}
	}

	/// See [`AnchorSpender::channel_resolved`].
	pub fn channel_resolved(&self, channel_id: &ChannelId) {
		self.anchor_spender.channel_resolved(channel_id)
	}

	/// See [`AnchorSpender::anchor_context`].
	pub fn anchor_context(&self, channel_id: &ChannelId) -> Option<AnchorContext> {
		self.anchor_spender.anchor_context(channel_id)
	}
}
