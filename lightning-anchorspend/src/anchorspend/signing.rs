// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Has an anchor spend signed and turns the signed PSBT into a broadcastable transaction.

use bitcoin::psbt::Psbt;
use bitcoin::transaction::Transaction;

use crate::anchorspend::candidate::Candidate;
use crate::anchorspend::context::AnchorContext;
use crate::sign::{AnchorSpendSigner, SignAnchorSpendRequest, SignerUtxo};
use crate::util::errors::AnchorSpendSignerError;
use crate::util::logger::Logger;

/// Asks `signer` to sign `candidate` and extracts the final transaction.
///
/// Returns `None`, after logging everything needed to debug the signer, if the signer answered
/// with a different transaction or left any input without a final witness.
///
/// # Panics
///
/// Panics if the signer violates its protocol, i.e. answers with garbage or goes away.
pub(crate) async fn sign_and_finalize<S: AnchorSpendSigner + ?Sized, L: Logger + ?Sized>(
	context: &AnchorContext, candidate: &Candidate, signer: &S, logger: &L,
) -> Option<Transaction> {
	let request = SignAnchorSpendRequest {
		peer_id: context.counterparty_node_id,
		channel_id: context.channel_id,
		utxos: candidate
			.funding_utxos
			.iter()
			.map(|utxo| SignerUtxo {
				outpoint: utxo.outpoint,
				amount: utxo.output.value,
				key_index: utxo.key_index,
				close_info: utxo.close_info.clone(),
			})
			.collect(),
		psbt: candidate.psbt.clone(),
	};

	let signed = match signer.sign_anchor_spend(request).await {
		Ok(psbt) => psbt,
		Err(e) => {
			log_error!(logger, "Failed to sign anchor spend: {}", e);
			if let AnchorSpendSignerError::MalformedReply { reply } = &e {
				log_error!(logger, "Signer reply was {}", log_bytes!(reply[..]));
			}
			panic!("Signer failed to sign anchor spend: {}", e);
		},
	};

	match finalize(&candidate.psbt.unsigned_tx, &signed) {
		Ok(tx) => {
			log_debug!(logger, "anchor actual weight: {}", tx.weight().to_wu());
			Some(tx)
		},
		Err(()) => {
			log_error!(logger, "Non-final PSBT from signer: {}", log_psbt!(signed));
			log_error!(logger, "Before signing PSBT was {}", log_psbt!(candidate.psbt));
			for utxo in candidate.funding_utxos.iter() {
				log_error!(
					logger,
					"UTXO {}: {} amt={} keyidx={}",
					utxo.outpoint,
					if utxo.close_info.is_some() { "unilateral" } else { "wallet" },
					utxo.output.value.to_sat(),
					utxo.key_index
				);
				if let Some(close_info) = &utxo.close_info {
					log_error!(
						logger,
						"... close from channel {} peer {} ({}) commitment {} csv {}",
						close_info.channel_id,
						close_info.peer_id,
						if close_info.option_anchors { "anchors" } else { "no anchors" },
						close_info
							.commitment_point
							.map(|point| point.to_string())
							.unwrap_or_else(|| "unknown".to_owned()),
						close_info.csv
					);
				}
			}
			None
		},
	}
}

/// Checks the signer kept the transaction as it was and signed every input, copying the final
/// witnesses and script sigs into the transaction.
fn finalize(unsigned_tx: &Transaction, signed: &Psbt) -> Result<Transaction, ()> {
	if signed.unsigned_tx != *unsigned_tx || signed.inputs.len() != unsigned_tx.input.len() {
		return Err(());
	}

	let mut tx = signed.unsigned_tx.clone();
	for (txin, psbt_input) in tx.input.iter_mut().zip(signed.inputs.iter()) {
		if psbt_input.final_script_witness.is_none() && psbt_input.final_script_sig.is_none() {
			return Err(());
		}
		if let Some(witness) = &psbt_input.final_script_witness {
			txin.witness = witness.clone();
		}
		if let Some(script_sig) = &psbt_input.final_script_sig {
			txin.script_sig = script_sig.clone();
		}
	}
	Ok(tx)
}
