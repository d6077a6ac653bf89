// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Builds unsigned anchor spends funded by wallet UTXOs at a given target feerate.

use core::cmp;

use bitcoin::bip32::{DerivationPath, Fingerprint};
use bitcoin::blockdata::constants::WITNESS_SCALE_FACTOR;
use bitcoin::psbt::Psbt;
use bitcoin::transaction::{Transaction, TxIn, TxOut, Version};
use bitcoin::{Amount, ScriptBuf, Sequence, Witness};

use crate::anchorspend::context::{AnchorAttempt, AnchorContext};
use crate::anchorspend::{AnchorWallet, FundingRequest, FundingUtxo};
use crate::chain::chaininterface::{
	compute_feerate_sat_per_1000_weight, fee_for_weight, ChainTopology,
};
use crate::ln::chan_utils::{
	anchor_input_witness_weight, ANCHOR_OUTPUT_VALUE_SATOSHI, BASE_INPUT_WEIGHT, BASE_TX_SIZE,
	EMPTY_SCRIPT_SIG_WEIGHT, P2TR_OUTPUT_WEIGHT, SEGWIT_MARKER_FLAG_WEIGHT,
};
use crate::util::config::AnchorSpendConfig;
use crate::util::logger::Logger;

/// An unsigned anchor spend, along with what it costs and achieves.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
	/// The unsigned spend. The anchor is its first input, followed by `funding_utxos`.
	pub psbt: Psbt,
	/// The wallet UTXOs funding the spend.
	pub funding_utxos: Vec<FundingUtxo>,
	/// The fee paid by the spend itself, not counting the fee already paid by the commitment
	/// transaction.
	pub fee: Amount,
	/// The weight of the whole package: the spend and the commitment transaction it pays for.
	pub weight: u64,
	/// The feerate of the whole package.
	pub package_feerate_sat_per_1000_weight: u32,
	/// Whether the wallet ran out of UTXOs before reaching the target feerate.
	pub insufficient_funds: bool,
}

/// The weight of the package formed by an anchor spend without any funding input and the
/// commitment transaction it pays for.
pub fn base_weight(context: &AnchorContext, attempt: &AnchorAttempt) -> u64 {
	SEGWIT_MARKER_FLAG_WEIGHT
		+ BASE_TX_SIZE * WITNESS_SCALE_FACTOR as u64
		+ BASE_INPUT_WEIGHT
		+ EMPTY_SCRIPT_SIG_WEIGHT
		+ anchor_input_witness_weight(context.anchor_witness_script.len())
		+ P2TR_OUTPUT_WEIGHT
		+ attempt.location.commitment_weight
}

/// Asks the wallet for UTXOs to get the package to `target_feerate_sat_per_1000_weight` and
/// builds the unsigned spend.
///
/// If the resulting change would be dust it is raised to the dust limit, overpaying the fee.
/// Returns `Err` if the round has to be abandoned, e.g. because the wallet couldn't provide a
/// change script.
pub(crate) fn build_candidate<
	T: ChainTopology + ?Sized,
	W: AnchorWallet + ?Sized,
	L: Logger + ?Sized,
>(
	context: &AnchorContext, attempt: &AnchorAttempt, target_feerate_sat_per_1000_weight: u32,
	base_weight: u64, chain: &T, wallet: &W, config: &AnchorSpendConfig, logger: &L,
) -> Result<Candidate, ()> {
	let dust_limit = Amount::from_sat(config.dust_limit_satoshis);
	let commitment_fee = attempt.location.commitment_fee;

	let selection = wallet.select_funding_inputs(FundingRequest {
		current_height: chain.best_block_height(),
		already_paid: commitment_fee,
		min_output: dust_limit,
		target_feerate_sat_per_1000_weight,
		existing_weight: base_weight,
	});
	debug_assert!(selection.total_weight >= base_weight);
	let total_weight = cmp::max(selection.total_weight, base_weight);

	let change_script = wallet.get_change_script().map_err(|()| {
		log_error!(logger, "Failed to get a change script for our anchor spend");
	})?;

	let anchor_value = Amount::from_sat(ANCHOR_OUTPUT_VALUE_SATOSHI);
	let input_value = selection
		.utxos
		.iter()
		.try_fold(anchor_value, |total, utxo| total.checked_add(utxo.output.value))
		.ok_or_else(|| {
			log_error!(logger, "Overflow summing the value of {} UTXOs", selection.utxos.len());
		})?;

	// The commitment transaction already paid for part of the package.
	let fee = Amount::from_sat(fee_for_weight(target_feerate_sat_per_1000_weight, total_weight))
		.checked_sub(commitment_fee)
		.unwrap_or(Amount::ZERO);

	let change = match input_value.checked_sub(fee) {
		Some(change) if change >= dust_limit => change,
		_ => {
			// If the wallet didn't run out of UTXOs, it must have misjudged the fee.
			if !selection.insufficient_funds {
				log_error!(
					logger,
					"Could not afford anchor spend fee {} sat from inputs worth {} sat, reducing fee",
					fee.to_sat(),
					input_value.to_sat()
				);
			}
			dust_limit
		},
	};

	let anchor_input = TxIn {
		previous_output: attempt.location.outpoint,
		script_sig: ScriptBuf::new(),
		sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
		witness: Witness::new(),
	};
	let funding_inputs = selection.utxos.iter().map(|utxo| TxIn {
		previous_output: utxo.outpoint,
		script_sig: ScriptBuf::new(),
		sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
		witness: Witness::new(),
	});
	let unsigned_tx = Transaction {
		version: Version::TWO,
		lock_time: chain.default_locktime(),
		input: core::iter::once(anchor_input).chain(funding_inputs).collect(),
		output: vec![TxOut { value: change, script_pubkey: change_script }],
	};

	let mut psbt = Psbt::from_unsigned_tx(unsigned_tx).map_err(|e| {
		log_error!(logger, "Failed to create anchor spend PSBT: {}", e);
	})?;
	let (anchor_psbt_input, funding_psbt_inputs) = psbt.inputs.split_first_mut().ok_or(())?;
	anchor_psbt_input.witness_utxo = Some(TxOut {
		value: anchor_value,
		script_pubkey: context.anchor_witness_script.to_p2wsh(),
	});
	anchor_psbt_input.witness_script = Some(context.anchor_witness_script.clone());
	anchor_psbt_input
		.bip32_derivation
		.insert(context.funding_pubkey, (Fingerprint::from([0; 4]), DerivationPath::master()));
	for (psbt_input, utxo) in funding_psbt_inputs.iter_mut().zip(selection.utxos.iter()) {
		psbt_input.witness_utxo = Some(utxo.output.clone());
	}

	// Raising the change to the dust limit may leave us paying less than intended, or even spending
	// more than we have.
	let fee = input_value.checked_sub(change).unwrap_or(Amount::ZERO);
	let package_fee = fee.checked_add(commitment_fee).ok_or(())?;
	let package_feerate_sat_per_1000_weight =
		compute_feerate_sat_per_1000_weight(package_fee.to_sat(), total_weight);

	Ok(Candidate {
		psbt,
		funding_utxos: selection.utxos,
		fee,
		weight: total_weight,
		package_feerate_sat_per_1000_weight,
		insufficient_funds: selection.insufficient_funds,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::anchorspend::context::build_anchor_context;
	use crate::util::test_utils::{
		anchor_commitment_tx, test_channel, TestChainTopology, TestHtlcLedger, TestLogger,
		TestSigner, TestWallet,
	};

	const MODULE: &str = "lightning_anchorspend::anchorspend::candidate";

	fn context_with_wallet(wallet: &TestWallet) -> AnchorContext {
		let channel = test_channel();
		let tx = anchor_commitment_tx(&channel, 1000);
		build_anchor_context(
			&channel,
			&tx,
			Amount::from_sat(1000),
			wallet,
			&TestSigner::new(),
			&TestHtlcLedger::new(),
			&AnchorSpendConfig::default(),
			&TestLogger::new(),
		)
		.unwrap()
	}

	#[test]
	fn base_weight_accounts_for_commitment() {
		let wallet = TestWallet::new(vec![]);
		let context = context_with_wallet(&wallet);
		let attempt = &context.attempts[0];
		assert_eq!(
			base_weight(&context, attempt),
			2 + 40 + 160 + 4 + 116 + 172 + attempt.location.commitment_weight
		);
	}

	#[test]
	fn builds_funded_spend() {
		let logger = TestLogger::new();
		let wallet = TestWallet::new(vec![100_000]);
		let chain = TestChainTopology::new(500, 5_000);
		let context = context_with_wallet(&wallet);
		let attempt = &context.attempts[0];
		let base = base_weight(&context, attempt);
		let candidate = build_candidate(
			&context,
			attempt,
			5_000,
			base,
			&chain,
			&wallet,
			&AnchorSpendConfig::default(),
			&logger,
		)
		.unwrap();

		assert_eq!(candidate.funding_utxos.len(), 1);
		assert!(!candidate.insufficient_funds);
		assert_eq!(candidate.weight, base + BASE_INPUT_WEIGHT + TestWallet::SATISFACTION_WEIGHT);

		let expected_fee = fee_for_weight(5_000, candidate.weight) - 1000;
		assert_eq!(candidate.fee, Amount::from_sat(expected_fee));
		assert!(candidate.package_feerate_sat_per_1000_weight >= 4_999);

		let tx = &candidate.psbt.unsigned_tx;
		assert_eq!(tx.version, Version::TWO);
		assert_eq!(tx.lock_time, chain.default_locktime());
		assert_eq!(tx.input.len(), 2);
		assert_eq!(tx.input[0].previous_output, attempt.location.outpoint);
		assert_eq!(tx.input[1].previous_output, candidate.funding_utxos[0].outpoint);
		assert!(tx.input.iter().all(|txin| txin.sequence == Sequence::ENABLE_RBF_NO_LOCKTIME));
		assert_eq!(tx.output.len(), 1);
		assert_eq!(tx.output[0].script_pubkey, wallet.change_script());
		assert_eq!(
			tx.output[0].value,
			Amount::from_sat(100_000 + ANCHOR_OUTPUT_VALUE_SATOSHI - expected_fee)
		);

		let anchor_input = &candidate.psbt.inputs[0];
		assert_eq!(
			anchor_input.witness_utxo,
			Some(TxOut {
				value: Amount::from_sat(ANCHOR_OUTPUT_VALUE_SATOSHI),
				script_pubkey: context.anchor_witness_script.to_p2wsh(),
			})
		);
		assert_eq!(anchor_input.witness_script.as_ref(), Some(&context.anchor_witness_script));
		assert!(anchor_input.bip32_derivation.contains_key(&context.funding_pubkey));
		assert_eq!(
			candidate.psbt.inputs[1].witness_utxo.as_ref(),
			Some(&candidate.funding_utxos[0].output)
		);
		logger.assert_log_contains(MODULE, "reducing fee", 0);
	}

	#[test]
	fn commitment_fee_covers_target() {
		let logger = TestLogger::new();
		let wallet = TestWallet::new(vec![]);
		let chain = TestChainTopology::new(500, 253);
		let context = context_with_wallet(&wallet);
		let attempt = &context.attempts[0];
		let base = base_weight(&context, attempt);
		// Paying 1000 sat for the commitment alone already exceeds 253 sat/kW over the package.
		let candidate = build_candidate(
			&context,
			attempt,
			253,
			base,
			&chain,
			&wallet,
			&AnchorSpendConfig::default(),
			&logger,
		)
		.unwrap();
		assert!(candidate.funding_utxos.is_empty());
		assert!(candidate.insufficient_funds);
		// The anchor alone can't pay for a change output above dust.
		assert_eq!(candidate.psbt.unsigned_tx.output[0].value, Amount::from_sat(546));
		assert_eq!(candidate.fee, Amount::ZERO);
		logger.assert_log_contains(MODULE, "reducing fee", 0);
	}

	#[test]
	fn dust_change_with_sufficient_funds_is_logged() {
		let logger = TestLogger::new();
		let wallet = TestWallet::new(vec![10_000]);
		// A wallet which claims success without having reached the target.
		wallet.misreport_sufficient_funds();
		let chain = TestChainTopology::new(500, 50_000);
		let context = context_with_wallet(&wallet);
		let attempt = &context.attempts[0];
		let base = base_weight(&context, attempt);
		let candidate = build_candidate(
			&context,
			attempt,
			50_000,
			base,
			&chain,
			&wallet,
			&AnchorSpendConfig::default(),
			&logger,
		)
		.unwrap();
		assert!(!candidate.insufficient_funds);
		assert_eq!(candidate.psbt.unsigned_tx.output[0].value, Amount::from_sat(546));
		assert_eq!(candidate.fee, Amount::from_sat(10_000 + ANCHOR_OUTPUT_VALUE_SATOSHI - 546));
		logger.assert_log_contains(MODULE, "reducing fee", 1);
	}

	#[test]
	fn missing_change_script_abandons_round() {
		let logger = TestLogger::new();
		let wallet = TestWallet::new(vec![100_000]);
		wallet.fail_change_script();
		let chain = TestChainTopology::new(500, 5_000);
		let context = context_with_wallet(&wallet);
		let attempt = &context.attempts[0];
		let base = base_weight(&context, attempt);
		assert!(build_candidate(
			&context,
			attempt,
			5_000,
			base,
			&chain,
			&wallet,
			&AnchorSpendConfig::default(),
			&logger,
		)
		.is_err());
		logger.assert_log_contains(MODULE, "Failed to get a change script", 1);
	}
}
