// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Various utilities for building scripts related to anchor outputs and for estimating the weight
//! of the transactions spending them.

use bitcoin::blockdata::constants::WITNESS_SCALE_FACTOR;
use bitcoin::opcodes;
use bitcoin::script::{Builder, Script, ScriptBuf};
use bitcoin::secp256k1::PublicKey;
use bitcoin::transaction::{Transaction, TxOut};
use bitcoin::OutPoint;

/// The value, in satoshis, of each anchor output of a commitment transaction.
pub const ANCHOR_OUTPUT_VALUE_SATOSHI: u64 = 330;

/// The weight of the segwit marker and flag bytes.
pub const SEGWIT_MARKER_FLAG_WEIGHT: u64 = 2;

/// The size of the fields of a transaction which do not depend on its inputs and outputs,
/// assuming fewer than 253 of each.
pub const BASE_TX_SIZE: u64 =
	4 /* version */ + 1 /* input count */ + 1 /* output count */ + 4 /* locktime */;

/// The weight of an empty script_sig.
pub const EMPTY_SCRIPT_SIG_WEIGHT: u64 = 1 /* empty script_sig */ * WITNESS_SCALE_FACTOR as u64;

/// The size of an input without its script_sig length prefix.
pub const BASE_INPUT_SIZE: u64 = 32 /* txid */ + 4 /* vout */ + 4 /* sequence */;

/// The non-witness weight of an input without its script_sig length prefix.
pub const BASE_INPUT_WEIGHT: u64 = BASE_INPUT_SIZE * WITNESS_SCALE_FACTOR as u64;

/// The maximum size of a DER-encoded ECDSA signature with its sighash flag.
pub const MAX_ECDSA_SIGNATURE_SIZE: u64 = 73;

/// The weight of a P2TR output, which is where anchor spend change goes.
pub const P2TR_OUTPUT_WEIGHT: u64 =
	(8 /* value */ + 1 /* script len */ + 34 /* script */) * WITNESS_SCALE_FACTOR as u64;

/// Gets the witnessScript for an anchor output from the funding public key.
/// The witness in the spending input must be:
/// <BIP 143 funding_signature>
/// After 16 blocks of confirmation, an alternative satisfying witness could be:
/// <>
/// (empty vector required to satisfy compliance with MINIMALIF-standard rule)
#[inline]
pub fn get_anchor_redeemscript(funding_pubkey: &PublicKey) -> ScriptBuf {
	Builder::new()
		.push_slice(funding_pubkey.serialize())
		.push_opcode(opcodes::all::OP_CHECKSIG)
		.push_opcode(opcodes::all::OP_IFDUP)
		.push_opcode(opcodes::all::OP_NOTIF)
		.push_int(16)
		.push_opcode(opcodes::all::OP_CSV)
		.push_opcode(opcodes::all::OP_ENDIF)
		.into_script()
}

/// Locates the output paying to the P2WSH of `anchor_script` within `commitment_tx`.
///
/// Scripts are compared byte for byte.
pub fn find_anchor_output<'a>(
	commitment_tx: &'a Transaction, anchor_script: &Script,
) -> Option<(OutPoint, &'a TxOut)> {
	let anchor_script_pubkey = anchor_script.to_p2wsh();
	let txid = commitment_tx.compute_txid();
	commitment_tx
		.output
		.iter()
		.enumerate()
		.find(|(_, txout)| txout.script_pubkey == anchor_script_pubkey)
		.map(|(idx, txout)| (OutPoint { txid, vout: idx as u32 }, txout))
}

/// The weight of the witness spending an anchor output through its key path: the item count, a
/// maximally-sized signature and the witness script, each with their length prefix.
pub fn anchor_input_witness_weight(anchor_script_len: usize) -> u64 {
	1 /* witness items */ + 1 /* sig len */ + MAX_ECDSA_SIGNATURE_SIZE +
		1 /* script len */ + anchor_script_len as u64
}

#[cfg(test)]
mod tests {
	use super::*;

	use bitcoin::secp256k1::{Secp256k1, SecretKey};
	use bitcoin::transaction::Version;
	use bitcoin::{absolute, Amount};

	fn funding_pubkey() -> PublicKey {
		let secp_ctx = Secp256k1::new();
		PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[42; 32]).unwrap())
	}

	#[test]
	fn anchor_script_shape() {
		let script = get_anchor_redeemscript(&funding_pubkey());
		// 33-byte push plus six single-byte opcodes.
		assert_eq!(script.len(), 40);
		let bytes = script.as_bytes();
		assert_eq!(bytes[0], 33);
		assert_eq!(&bytes[1..34], &funding_pubkey().serialize()[..]);
		assert_eq!(
			&bytes[34..],
			&[
				opcodes::all::OP_CHECKSIG.to_u8(),
				opcodes::all::OP_IFDUP.to_u8(),
				opcodes::all::OP_NOTIF.to_u8(),
				opcodes::all::OP_PUSHNUM_16.to_u8(),
				opcodes::all::OP_CSV.to_u8(),
				opcodes::all::OP_ENDIF.to_u8(),
			]
		);
		assert_eq!(anchor_input_witness_weight(script.len()), 116);
	}

	#[test]
	fn finds_anchor_output_by_script() {
		let script = get_anchor_redeemscript(&funding_pubkey());
		let other_pubkey = {
			let secp_ctx = Secp256k1::new();
			PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[43; 32]).unwrap())
		};
		let tx = Transaction {
			version: Version::TWO,
			lock_time: absolute::LockTime::ZERO,
			input: vec![],
			output: vec![
				TxOut {
					value: Amount::from_sat(ANCHOR_OUTPUT_VALUE_SATOSHI),
					script_pubkey: get_anchor_redeemscript(&other_pubkey).to_p2wsh(),
				},
				TxOut {
					value: Amount::from_sat(ANCHOR_OUTPUT_VALUE_SATOSHI),
					script_pubkey: script.to_p2wsh(),
				},
			],
		};
		let (outpoint, txout) = find_anchor_output(&tx, &script).unwrap();
		assert_eq!(outpoint, OutPoint { txid: tx.compute_txid(), vout: 1 });
		assert_eq!(txout.value.to_sat(), ANCHOR_OUTPUT_VALUE_SATOSHI);

		assert!(find_anchor_output(&tx, &ScriptBuf::new()).is_none());
	}

	#[test]
	fn weight_constants() {
		assert_eq!(BASE_INPUT_WEIGHT, 160);
		assert_eq!(EMPTY_SCRIPT_SIG_WEIGHT, 4);
		assert_eq!(P2TR_OUTPUT_WEIGHT, 172);
	}
}
