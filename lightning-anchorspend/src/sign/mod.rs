// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The interface to the signing authority which holds the keys for both our channel funding keys
//! and our on-chain wallet.

use core::future::Future;

use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Amount, OutPoint};

use crate::anchorspend::UnilateralCloseInfo;
use crate::ln::types::ChannelId;
use crate::util::errors::AnchorSpendSignerError;

/// What the signer needs to know about each wallet UTXO funding an anchor spend in order to derive
/// its key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignerUtxo {
	/// The outpoint being spent.
	pub outpoint: OutPoint,
	/// The value of the output being spent.
	pub amount: Amount,
	/// The index of the wallet key the output pays to.
	pub key_index: u32,
	/// If the output was swept out of a previous unilateral close, the information needed to
	/// derive the channel key it pays to.
	pub close_info: Option<UnilateralCloseInfo>,
}

/// A request to sign every input of an anchor spend.
#[derive(Clone, Debug, PartialEq)]
pub struct SignAnchorSpendRequest {
	/// The node id of the counterparty of the channel whose anchor is being spent.
	pub peer_id: PublicKey,
	/// The channel whose anchor is being spent.
	pub channel_id: ChannelId,
	/// The wallet UTXOs funding the spend, in input order after the anchor input.
	pub utxos: Vec<SignerUtxo>,
	/// The unsigned spend. Its first input is the anchor, the rest are described by `utxos`.
	pub psbt: Psbt,
}

/// A signing authority able to sign anchor spends.
///
/// The signing authority is trusted infrastructure: an [`AnchorSpendSignerError`] is treated as
/// fatal. A reply which does not finalize into a fully-signed transaction is not, the spend is
/// simply retried on the next retransmission.
///
/// At most one request is outstanding per anchor at any time.
///
/// For a synchronous version of this trait, see [`AnchorSpendSignerSync`].
///
/// [`AnchorSpendSignerSync`]: crate::anchorspend::sync::AnchorSpendSignerSync
// Note that updates to documentation on this trait should be copied to the synchronous version.
pub trait AnchorSpendSigner {
	/// Returns whether the signer is able to sign anchor spends at all.
	fn supports_anchor_spend_signing(&self) -> bool;

	/// Signs the anchor input with the channel's funding key and every other input with the
	/// wallet key described by the matching [`SignerUtxo`], returning the PSBT with each input's
	/// `final_script_witness` set.
	fn sign_anchor_spend<'a>(
		&'a self, request: SignAnchorSpendRequest,
	) -> impl Future<Output = Result<Psbt, AnchorSpendSignerError>> + Send + 'a;
}
