// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Picks the feerate an anchor spend should target, given what is at risk at each deadline.

use core::cmp;

use crate::anchorspend::candidate::{base_weight, build_candidate, Candidate};
use crate::anchorspend::context::{AnchorAttempt, AnchorContext};
use crate::anchorspend::AnchorWallet;
use crate::chain::chaininterface::{ChainTopology, FEERATE_FLOOR_SATS_PER_KW};
use crate::util::config::AnchorSpendConfig;
use crate::util::logger::Logger;

/// Returns the cheapest anchor spend for the attempt at `attempt_idx` which is still worth what it
/// protects, or `None` if spending the anchor is not worth it (or not possible) right now.
///
/// Deadlines are walked from the furthest to the nearest. At each, everything at risk from that
/// deadline on is weighed against the fee needed to confirm by it; the walk stops at the first
/// deadline for which that fee isn't worth it. This assumes the feerate needed only grows as the
/// deadline gets nearer, and may miss a worthwhile nearer deadline if the fee market disagrees.
///
/// If nothing is at risk, a spend targeting the low-priority deadline is built instead, as long as
/// the commitment transaction doesn't pay enough on its own and the wallet has UTXOs to add.
pub fn choose_spend<
	T: ChainTopology + ?Sized,
	W: AnchorWallet + ?Sized,
	L: Logger + ?Sized,
>(
	context: &AnchorContext, attempt_idx: usize, chain: &T, wallet: &W,
	config: &AnchorSpendConfig, logger: &L,
) -> Option<Candidate> {
	let attempt = context.attempts.get(attempt_idx)?;
	let base_weight = base_weight(context, attempt);
	let commitment_weight = attempt.location.commitment_weight;
	let commitment_feerate = attempt.location.commitment_feerate_sat_per_1000_weight();
	let current_height = chain.best_block_height();

	let mut total_value_msat: u64 = 0;
	let mut best: Option<Candidate> = None;

	for deadline in context.deadlines.iter().rev() {
		// The low-priority deadline is handled below.
		if !deadline.important {
			continue;
		}

		total_value_msat = total_value_msat.saturating_add(deadline.value_msat);
		let target_feerate =
			chain.feerate_for_target(deadline.block).max(FEERATE_FLOOR_SATS_PER_KW);

		if commitment_feerate >= target_feerate {
			log_trace!(
				logger,
				"{} commitment tx feerate {} sat/kW already meets {} sat/kW for block {}",
				attempt.side,
				commitment_feerate,
				target_feerate,
				deadline.block
			);
			continue;
		}

		let candidate = match build_candidate(
			context,
			attempt,
			target_feerate,
			base_weight,
			chain,
			wallet,
			config,
			logger,
		) {
			Ok(candidate) => candidate,
			// Whatever we built for a further deadline is still good.
			Err(()) => break,
		};
		log_debug!(
			logger,
			"Candidate anchor spend total weight = {} (commitment weight {}, anchor spend {})",
			candidate.weight,
			commitment_weight,
			candidate.weight.saturating_sub(commitment_weight)
		);

		let blocks_away = deadline.block as i64 - current_height as i64;
		if total_value_msat <= candidate.fee.to_sat().saturating_mul(1000) {
			log_debug!(
				logger,
				"Not worth fee {} sat for {} commitment tx to get {} msat at block {} ({:+}) at feerate {} sat/kW",
				candidate.fee.to_sat(),
				attempt.side,
				deadline.value_msat,
				deadline.block,
				blocks_away,
				target_feerate
			);
			break;
		}

		if candidate.package_feerate_sat_per_1000_weight < target_feerate {
			if candidate.funding_utxos.is_empty() {
				// Spending the anchor alone pays nothing towards the package, so rather than
				// accepting this one as the best we can do we keep whatever we built for a further
				// deadline, if anything.
				log_warn!(
					logger,
					"No UTXOs to bump {} commitment tx to feerate {} sat/kW!",
					attempt.side,
					target_feerate
				);
				break;
			}
			log_warn!(
				logger,
				"We want to bump {} commitment tx to feerate {} sat/kW, but can only bump to {} sat/kW with {} UTXOs!",
				attempt.side,
				target_feerate,
				candidate.package_feerate_sat_per_1000_weight,
				candidate.funding_utxos.len()
			);
			// We won't do any better at higher feerates.
			best = Some(candidate);
			break;
		}

		log_debug!(
			logger,
			"Worth fee {} sat for {} commitment tx to get {} msat at block {} ({:+}) at feerate {} sat/kW",
			candidate.fee.to_sat(),
			attempt.side,
			deadline.value_msat,
			deadline.block,
			blocks_away,
			candidate.package_feerate_sat_per_1000_weight
		);
		best = Some(candidate);
	}

	if best.is_none() && context.only_low_priority_deadline() {
		return low_priority_spend(context, attempt, base_weight, chain, wallet, config, logger);
	}
	best
}

fn low_priority_spend<T: ChainTopology + ?Sized, W: AnchorWallet + ?Sized, L: Logger + ?Sized>(
	context: &AnchorContext, attempt: &AnchorAttempt, base_weight: u64, chain: &T, wallet: &W,
	config: &AnchorSpendConfig, logger: &L,
) -> Option<Candidate> {
	let low_priority_deadline = context.deadlines.first()?;
	let commitment_feerate = attempt.location.commitment_feerate_sat_per_1000_weight();

	// We're not in a hurry, but never aim for less than a dozen blocks away.
	let block_target = cmp::max(
		low_priority_deadline.block,
		chain.best_block_height().saturating_add(config.min_low_priority_target_blocks),
	);
	let target_feerate = chain.feerate_for_target(block_target).max(FEERATE_FLOOR_SATS_PER_KW);

	if commitment_feerate >= target_feerate {
		log_debug!(
			logger,
			"Avoiding anchor spend: {} commitment tx feerate already {} sat/kW for target {} sat/kW",
			attempt.side,
			commitment_feerate,
			target_feerate
		);
		return None;
	}

	log_debug!(
		logger,
		"Low-priority anchor spend aiming for block {} (feerate {} sat/kW)",
		block_target,
		target_feerate
	);
	let candidate = build_candidate(
		context,
		attempt,
		target_feerate,
		base_weight,
		chain,
		wallet,
		config,
		logger,
	)
	.ok()?;

	// Spending the anchor without adding any UTXO doesn't get us anywhere.
	if candidate.funding_utxos.is_empty() {
		log_debug!(
			logger,
			"No UTXOs to add to a low-priority spend of our {} commitment tx anchor",
			attempt.side
		);
		return None;
	}
	Some(candidate)
}
