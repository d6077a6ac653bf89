// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

#![allow(missing_docs)]

use core::future::Future;
use core::pin::pin;
use core::task;

use std::sync::Mutex;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::transaction::{Transaction, TxIn, TxOut, Version};
use bitcoin::{
	Amount, OutPoint, ScriptBuf, Sequence, Txid, WPubkeyHash, WScriptHash, Witness,
};

use crate::anchorspend::context::AnchorLocation;
use crate::anchorspend::{
	AnchorSpendHandle, AnchorWallet, FundingRequest, FundingSelection, FundingUtxo,
	UnilateralCloseInfo,
};
use crate::chain::chaininterface::{fee_for_weight, BroadcasterInterface, ChainTopology};
use crate::ln::chan_utils::{get_anchor_redeemscript, ANCHOR_OUTPUT_VALUE_SATOSHI, BASE_INPUT_WEIGHT};
use crate::ln::channel::{AnchorChannel, ChannelType};
use crate::ln::htlc::{HtlcLedger, InboundHtlc, OutboundHtlc};
use crate::ln::types::ChannelId;
use crate::sign::{AnchorSpendSigner, SignAnchorSpendRequest};
use crate::util::async_poll::dummy_waker;
use crate::util::errors::AnchorSpendSignerError;
use crate::util::hash_tables::{new_hash_map, HashMap};
use crate::util::logger::{Level, Logger, Record};

pub struct TestLogger {
	level: Level,
	pub lines: Mutex<HashMap<(&'static str, String), usize>>,
	pub context: Mutex<HashMap<(&'static str, Option<PublicKey>, Option<ChannelId>), usize>>,
}

impl TestLogger {
	pub fn new() -> TestLogger {
		TestLogger {
			level: Level::Trace,
			lines: Mutex::new(new_hash_map()),
			context: Mutex::new(new_hash_map()),
		}
	}

	/// Search for the number of occurrence of the logged lines which
	/// 1. belongs to the specified module and
	/// 2. contains `line` in it.
	/// And asserts if the number of occurrences is the same with the given `count`
	pub fn assert_log_contains(&self, module: &str, line: &str, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		let l: usize = log_entries
			.iter()
			.filter(|&(&(m, ref l), _c)| m == module && l.contains(line))
			.map(|(_, c)| c)
			.sum();
		assert_eq!(l, count)
	}

	/// Search for the number of occurrences of logged lines which
	/// 1. belong to the specified module and
	/// 2. carry the given peer and channel context.
	/// And asserts if the number of occurrences is the same with the given `count`
	pub fn assert_log_context_contains(
		&self, module: &str, peer_id: Option<PublicKey>, channel_id: Option<ChannelId>,
		count: usize,
	) {
		let context_entries = self.context.lock().unwrap();
		let l: usize = context_entries
			.iter()
			.filter(|&(&(m, p, c), _count)| m == module && p == peer_id && c == channel_id)
			.map(|(_, count)| count)
			.sum();
		assert_eq!(l, count)
	}
}

impl Logger for TestLogger {
	fn log(&self, record: Record) {
		let context = (record.module_path, record.peer_id, record.channel_id);
		*self.lines.lock().unwrap().entry((record.module_path, format!("{}", record.args))).or_insert(0) += 1;
		*self.context.lock().unwrap().entry(context).or_insert(0) += 1;
		if record.level >= self.level {
			println!("{}", record);
		}
	}
}

pub struct TestBroadcaster {
	pub txn_broadcasted: Mutex<Vec<(Transaction, AnchorSpendHandle)>>,
}

impl TestBroadcaster {
	pub fn new() -> TestBroadcaster {
		TestBroadcaster { txn_broadcasted: Mutex::new(Vec::new()) }
	}
}

impl BroadcasterInterface for TestBroadcaster {
	fn broadcast_anchor_spend(&self, tx: &Transaction, handle: AnchorSpendHandle) {
		assert_eq!(tx.input[0].sequence, Sequence::ENABLE_RBF_NO_LOCKTIME);
		self.txn_broadcasted.lock().unwrap().push((tx.clone(), handle));
	}
}

/// A chain at a settable height whose feerate estimates only depend on how many blocks away the
/// target is.
pub struct TestChainTopology {
	height: Mutex<u32>,
	feerate: Mutex<u32>,
	/// (max blocks away, feerate), sorted by ascending blocks.
	feerate_schedule: Mutex<Vec<(u32, u32)>>,
	queried_targets: Mutex<Vec<u32>>,
}

impl TestChainTopology {
	pub fn new(height: u32, feerate_sat_per_1000_weight: u32) -> Self {
		Self {
			height: Mutex::new(height),
			feerate: Mutex::new(feerate_sat_per_1000_weight),
			feerate_schedule: Mutex::new(Vec::new()),
			queried_targets: Mutex::new(Vec::new()),
		}
	}

	pub fn set_height(&self, height: u32) {
		*self.height.lock().unwrap() = height;
	}

	pub fn set_feerate_schedule(&self, mut schedule: Vec<(u32, u32)>) {
		schedule.sort_by_key(|&(blocks, _)| blocks);
		*self.feerate_schedule.lock().unwrap() = schedule;
	}

	/// The block heights estimates were asked for, in order.
	pub fn queried_targets(&self) -> Vec<u32> {
		self.queried_targets.lock().unwrap().clone()
	}
}

impl ChainTopology for TestChainTopology {
	fn best_block_height(&self) -> u32 {
		*self.height.lock().unwrap()
	}

	fn feerate_for_target(&self, block_height: u32) -> u32 {
		self.queried_targets.lock().unwrap().push(block_height);
		let blocks_away = block_height.saturating_sub(self.best_block_height());
		self.feerate_schedule
			.lock()
			.unwrap()
			.iter()
			.find(|&&(max_blocks, _)| blocks_away <= max_blocks)
			.map(|&(_, feerate)| feerate)
			.unwrap_or(*self.feerate.lock().unwrap())
	}

	fn default_locktime(&self) -> LockTime {
		LockTime::from_height(self.best_block_height()).unwrap()
	}
}

/// A wallet picking its UTXOs greedily, in the order they were added.
pub struct TestWallet {
	utxos: Mutex<Vec<FundingUtxo>>,
	anchor_locations: Mutex<HashMap<ChannelId, Vec<AnchorLocation>>>,
	misreport_sufficient_funds: Mutex<bool>,
	max_funded_feerate: Mutex<Option<u32>>,
	/// How many more change scripts are handed out before failing, if limited.
	change_scripts_left: Mutex<Option<usize>>,
	selections: Mutex<usize>,
}

impl TestWallet {
	/// A P2WPKH input's script_sig and witness, with their lengths.
	pub const SATISFACTION_WEIGHT: u64 = 4 + 109;

	pub fn new(utxo_values_sat: Vec<u64>) -> Self {
		let wallet = Self {
			utxos: Mutex::new(Vec::new()),
			anchor_locations: Mutex::new(new_hash_map()),
			misreport_sufficient_funds: Mutex::new(false),
			max_funded_feerate: Mutex::new(None),
			change_scripts_left: Mutex::new(None),
			selections: Mutex::new(0),
		};
		for value in utxo_values_sat {
			wallet.add_utxo(value);
		}
		wallet
	}

	pub fn add_utxo(&self, value_sat: u64) {
		let mut utxos = self.utxos.lock().unwrap();
		let idx = utxos.len() as u8;
		utxos.push(FundingUtxo {
			outpoint: OutPoint { txid: Txid::from_byte_array([0xa0 + idx; 32]), vout: idx as u32 },
			output: TxOut {
				value: Amount::from_sat(value_sat),
				script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([idx; 20])),
			},
			satisfaction_weight: Self::SATISFACTION_WEIGHT,
			key_index: idx as u32,
			close_info: None,
		});
	}

	pub fn set_close_info(&self, utxo_idx: usize, close_info: UnilateralCloseInfo) {
		self.utxos.lock().unwrap()[utxo_idx].close_info = Some(close_info);
	}

	pub fn add_anchor_location(&self, channel_id: ChannelId, location: AnchorLocation) {
		self.anchor_locations.lock().unwrap().entry(channel_id).or_insert_with(Vec::new).push(location);
	}

	/// Makes the wallet claim it reached the target feerate even when it didn't.
	pub fn misreport_sufficient_funds(&self) {
		*self.misreport_sufficient_funds.lock().unwrap() = true;
	}

	/// Makes the wallet refuse to add any UTXO to spends targeting a higher feerate.
	pub fn set_max_funded_feerate(&self, feerate_sat_per_1000_weight: u32) {
		*self.max_funded_feerate.lock().unwrap() = Some(feerate_sat_per_1000_weight);
	}

	pub fn fail_change_script(&self) {
		self.fail_change_script_after(0);
	}

	pub fn fail_change_script_after(&self, successes: usize) {
		*self.change_scripts_left.lock().unwrap() = Some(successes);
	}

	pub fn change_script(&self) -> ScriptBuf {
		let mut script = vec![0x51, 0x20];
		script.extend_from_slice(&[0x77; 32]);
		ScriptBuf::from_bytes(script)
	}

	/// How many times UTXOs were selected.
	pub fn selection_count(&self) -> usize {
		*self.selections.lock().unwrap()
	}
}

impl AnchorWallet for TestWallet {
	fn known_anchor_locations(&self, channel_id: &ChannelId) -> Vec<AnchorLocation> {
		self.anchor_locations.lock().unwrap().get(channel_id).cloned().unwrap_or_default()
	}

	fn select_funding_inputs(&self, request: FundingRequest) -> FundingSelection {
		*self.selections.lock().unwrap() += 1;
		let needed = |weight: u64| {
			Amount::from_sat(fee_for_weight(request.target_feerate_sat_per_1000_weight, weight))
				.checked_sub(request.already_paid)
				.unwrap_or(Amount::ZERO) + request.min_output
		};

		let mut total_weight = request.existing_weight;
		let mut value = Amount::ZERO;
		let mut utxos = Vec::new();
		let available = match *self.max_funded_feerate.lock().unwrap() {
			Some(max) if request.target_feerate_sat_per_1000_weight > max => Vec::new(),
			_ => self.utxos.lock().unwrap().clone(),
		};
		for utxo in available.iter() {
			if value >= needed(total_weight) {
				break;
			}
			total_weight += BASE_INPUT_WEIGHT + utxo.satisfaction_weight;
			value += utxo.output.value;
			utxos.push(utxo.clone());
		}

		let insufficient_funds =
			value < needed(total_weight) && !*self.misreport_sufficient_funds.lock().unwrap();
		FundingSelection { utxos, total_weight, insufficient_funds }
	}

	fn get_change_script(&self) -> Result<ScriptBuf, ()> {
		match &mut *self.change_scripts_left.lock().unwrap() {
			Some(0) => return Err(()),
			Some(left) => *left -= 1,
			None => {},
		}
		Ok(self.change_script())
	}
}

enum SignerMode {
	Sign,
	DropWitness,
	Fail(AnchorSpendSignerError),
}

/// A signer putting well-formed but bogus signatures in place.
pub struct TestSigner {
	capable: bool,
	mode: Mutex<SignerMode>,
	requests: Mutex<Vec<SignAnchorSpendRequest>>,
}

impl TestSigner {
	pub fn new() -> Self {
		Self { capable: true, mode: Mutex::new(SignerMode::Sign), requests: Mutex::new(Vec::new()) }
	}

	pub fn incapable() -> Self {
		Self { capable: false, ..Self::new() }
	}

	/// Makes the signer leave the last input of every spend unsigned.
	pub fn drop_witnesses(&self) {
		*self.mode.lock().unwrap() = SignerMode::DropWitness;
	}

	pub fn fail_with(&self, err: AnchorSpendSignerError) {
		*self.mode.lock().unwrap() = SignerMode::Fail(err);
	}

	pub fn sign_normally(&self) {
		*self.mode.lock().unwrap() = SignerMode::Sign;
	}

	pub fn requests(&self) -> Vec<SignAnchorSpendRequest> {
		self.requests.lock().unwrap().clone()
	}

	fn sign(&self, request: SignAnchorSpendRequest) -> Result<Psbt, AnchorSpendSignerError> {
		self.requests.lock().unwrap().push(request.clone());
		let mut psbt = request.psbt;
		let unsigned_inputs = match &*self.mode.lock().unwrap() {
			SignerMode::Sign => 0,
			SignerMode::DropWitness => 1,
			SignerMode::Fail(err) => return Err(err.clone()),
		};
		let signed_inputs = psbt.inputs.len().saturating_sub(unsigned_inputs);
		for (idx, input) in psbt.inputs.iter_mut().take(signed_inputs).enumerate() {
			let signature = vec![0x30; 72];
			let witness = if idx == 0 {
				let witness_script = input.witness_script.clone().unwrap_or_default();
				Witness::from_slice(&[signature, witness_script.to_bytes()])
			} else {
				Witness::from_slice(&[signature, vec![0x02; 33]])
			};
			input.final_script_witness = Some(witness);
		}
		Ok(psbt)
	}
}

impl AnchorSpendSigner for TestSigner {
	fn supports_anchor_spend_signing(&self) -> bool {
		self.capable
	}

	fn sign_anchor_spend<'a>(
		&'a self, request: SignAnchorSpendRequest,
	) -> impl Future<Output = Result<Psbt, AnchorSpendSignerError>> + Send + 'a {
		let res = self.sign(request);
		async move { res }
	}
}

pub struct TestHtlcLedger {
	inbound: Mutex<HashMap<ChannelId, Vec<InboundHtlc>>>,
	outbound: Mutex<HashMap<ChannelId, Vec<OutboundHtlc>>>,
}

impl TestHtlcLedger {
	pub fn new() -> Self {
		Self { inbound: Mutex::new(new_hash_map()), outbound: Mutex::new(new_hash_map()) }
	}

	pub fn add_inbound(&self, channel_id: ChannelId, htlc: InboundHtlc) {
		self.inbound.lock().unwrap().entry(channel_id).or_insert_with(Vec::new).push(htlc);
	}

	pub fn add_outbound(&self, channel_id: ChannelId, htlc: OutboundHtlc) {
		self.outbound.lock().unwrap().entry(channel_id).or_insert_with(Vec::new).push(htlc);
	}
}

impl HtlcLedger for TestHtlcLedger {
	fn inbound_htlcs(&self, channel_id: &ChannelId) -> Vec<InboundHtlc> {
		self.inbound.lock().unwrap().get(channel_id).cloned().unwrap_or_default()
	}

	fn outbound_htlcs(&self, channel_id: &ChannelId) -> Vec<OutboundHtlc> {
		self.outbound.lock().unwrap().get(channel_id).cloned().unwrap_or_default()
	}
}

/// An anchor channel we decided to close at height 500.
pub fn test_channel() -> AnchorChannel {
	let secp_ctx = Secp256k1::signing_only();
	let funding_key = SecretKey::from_slice(&[42; 32]).unwrap();
	let counterparty_key = SecretKey::from_slice(&[43; 32]).unwrap();
	AnchorChannel {
		channel_id: ChannelId::from_bytes([7; 32]),
		counterparty_node_id: PublicKey::from_secret_key(&secp_ctx, &counterparty_key),
		channel_type: ChannelType::AnchorsZeroFeeHtlcTx,
		funding_pubkey: PublicKey::from_secret_key(&secp_ctx, &funding_key),
		close_attempt_height: 500,
	}
}

/// A commitment transaction for `channel` with a `to_local` output, our anchor and our
/// counterparty's.
pub fn anchor_commitment_tx(channel: &AnchorChannel, to_local_sat: u64) -> Transaction {
	let our_anchor = get_anchor_redeemscript(&channel.funding_pubkey);
	// Any key will do for their anchor, as long as it isn't ours.
	let their_anchor = get_anchor_redeemscript(&channel.counterparty_node_id);
	Transaction {
		version: Version::TWO,
		lock_time: LockTime::ZERO,
		input: vec![TxIn {
			previous_output: OutPoint { txid: Txid::from_byte_array([1; 32]), vout: 0 },
			script_sig: ScriptBuf::new(),
			sequence: Sequence::MAX,
			witness: Witness::from_slice(&[vec![], vec![0x30; 72], vec![0x30; 72], vec![0x52; 71]]),
		}],
		output: vec![
			TxOut {
				value: Amount::from_sat(to_local_sat),
				script_pubkey: ScriptBuf::new_p2wsh(&WScriptHash::from_byte_array([4; 32])),
			},
			TxOut {
				value: Amount::from_sat(ANCHOR_OUTPUT_VALUE_SATOSHI),
				script_pubkey: our_anchor.to_p2wsh(),
			},
			TxOut {
				value: Amount::from_sat(ANCHOR_OUTPUT_VALUE_SATOSHI),
				script_pubkey: their_anchor.to_p2wsh(),
			},
		],
	}
}

/// Polls a future which never has to wait, e.g. one only awaiting [`TestSigner`].
pub fn poll_ready<F: Future>(fut: F) -> F::Output {
	let mut fut = pin!(fut);
	let waker = dummy_waker();
	let mut ctx = task::Context::from_waker(&waker);
	match fut.as_mut().poll(&mut ctx) {
		task::Poll::Ready(res) => res,
		task::Poll::Pending => panic!("Future was not ready on first poll"),
	}
}
