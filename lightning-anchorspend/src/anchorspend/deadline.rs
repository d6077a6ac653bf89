// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The value we stand to lose at each block height if a commitment transaction has not confirmed
//! by then.

use core::cmp;

use crate::ln::htlc::{InboundHtlc, OutboundHtlc};
use crate::util::logger::Logger;

/// An amount at risk if the commitment transaction is not confirmed by `block`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
	/// Whether anything is actually at risk. The trailing low-priority deadline is the only one
	/// which is not, and it is never treated as less than a dozen blocks away.
	pub important: bool,
	/// The block height the commitment transaction should be confirmed by.
	pub block: u32,
	/// The value at risk, in millisatoshis.
	pub value_msat: u64,
}

impl Deadline {
	/// The zero-value deadline placed at the end of every schedule so that the commitment
	/// transaction eventually gets confirmed even when nothing is at risk.
	///
	/// It sits `low_priority_anchor_blocks` after the latest of the last important deadline and
	/// `close_attempt_height`, capped at the maximum block height. Returns `None` if that leaves
	/// no block after the last important deadline.
	pub fn low_priority(
		important: &[Deadline], close_attempt_height: u32, low_priority_anchor_blocks: u32,
	) -> Option<Self> {
		let block = cmp::max(
			important.last().map(|deadline| deadline.block).unwrap_or(0),
			close_attempt_height,
		)
		.saturating_add(low_priority_anchor_blocks);
		match important.last() {
			Some(last) if last.block >= block => None,
			_ => Some(Deadline { important: false, block, value_msat: 0 }),
		}
	}
}

/// Turns the HTLCs pending on a channel into (unmerged) deadlines.
///
/// Inbound HTLCs only count if we know the preimage; we cannot claim the others anyway. Outbound
/// HTLCs count at the expiry of the upstream HTLC we have to settle, or at their own expiry plus
/// `cltv_expiry_delta` if we are the origin of the payment.
pub fn deadlines_from_htlcs(
	inbound: &[InboundHtlc], outbound: &[OutboundHtlc], cltv_expiry_delta: u16,
) -> Vec<Deadline> {
	let claimable = inbound.iter().filter(|htlc| htlc.preimage_known).map(|htlc| Deadline {
		important: true,
		block: htlc.cltv_expiry,
		value_msat: htlc.amount_msat,
	});
	let offered = outbound.iter().map(|htlc| Deadline {
		important: true,
		block: htlc
			.upstream_cltv_expiry
			.unwrap_or_else(|| htlc.cltv_expiry.saturating_add(cltv_expiry_delta as u32)),
		value_msat: htlc.amount_msat,
	});
	claimable.chain(offered).collect()
}

/// Sorts `deadlines` by ascending block and sums the values of those sharing a block.
///
/// If summing would overflow, the addend is dropped and the failure logged.
pub fn merge_deadlines<L: Logger + ?Sized>(deadlines: &mut Vec<Deadline>, logger: &L) {
	deadlines.sort_by_key(|deadline| deadline.block);

	let mut merged: Vec<Deadline> = Vec::with_capacity(deadlines.len());
	for deadline in deadlines.drain(..) {
		debug_assert!(deadline.important);
		match merged.last_mut() {
			Some(prev) if prev.block == deadline.block => {
				match prev.value_msat.checked_add(deadline.value_msat) {
					Some(sum) => prev.value_msat = sum,
					None => {
						log_error!(
							logger,
							"Cannot add deadlines {} msat + {} msat at block {}!",
							prev.value_msat,
							deadline.value_msat,
							deadline.block
						);
					},
				}
			},
			_ => merged.push(deadline),
		}
	}
	*deadlines = merged;
}

/// Builds the full deadline schedule for a channel: its HTLC deadlines merged, followed by the
/// low-priority deadline unless an HTLC expires at the maximum block height.
pub fn build_deadline_schedule<L: Logger + ?Sized>(
	inbound: &[InboundHtlc], outbound: &[OutboundHtlc], close_attempt_height: u32,
	cltv_expiry_delta: u16, low_priority_anchor_blocks: u32, logger: &L,
) -> Vec<Deadline> {
	let mut deadlines = deadlines_from_htlcs(inbound, outbound, cltv_expiry_delta);
	merge_deadlines(&mut deadlines, logger);
	if let Some(low_priority) =
		Deadline::low_priority(&deadlines, close_attempt_height, low_priority_anchor_blocks)
	{
		deadlines.push(low_priority);
	}
	deadlines
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::util::test_utils::TestLogger;

	fn important(block: u32, value_msat: u64) -> Deadline {
		Deadline { important: true, block, value_msat }
	}

	#[test]
	fn merges_outbound_htlcs_sharing_upstream_expiry() {
		let logger = TestLogger::new();
		let outbound = [
			OutboundHtlc { amount_msat: 10_000, cltv_expiry: 600, upstream_cltv_expiry: Some(650) },
			OutboundHtlc { amount_msat: 20_000, cltv_expiry: 610, upstream_cltv_expiry: Some(650) },
		];
		let mut deadlines = deadlines_from_htlcs(&[], &outbound, 34);
		merge_deadlines(&mut deadlines, &logger);
		assert_eq!(deadlines, vec![important(650, 30_000)]);
	}

	#[test]
	fn merged_schedule_is_sorted_unique_and_preserves_value() {
		let logger = TestLogger::new();
		let sequences: Vec<Vec<Deadline>> = vec![
			vec![],
			vec![important(5, 1)],
			vec![important(9, 3), important(2, 4), important(9, 5), important(2, 6)],
			vec![important(700, 1), important(700, 1), important(700, 1), important(1, 0)],
			vec![important(30, 10), important(20, 20), important(10, 30), important(20, 40)],
		];
		for original in sequences {
			let mut merged = original.clone();
			merge_deadlines(&mut merged, &logger);
			for pair in merged.windows(2) {
				assert!(pair[0].block < pair[1].block);
			}
			for deadline in merged.iter() {
				let expected: u64 = original
					.iter()
					.filter(|d| d.block == deadline.block)
					.map(|d| d.value_msat)
					.sum();
				assert_eq!(deadline.value_msat, expected);
			}
			for deadline in original.iter() {
				assert!(merged.iter().any(|d| d.block == deadline.block));
			}
		}
		logger.assert_log_contains("lightning_anchorspend::anchorspend::deadline", "Cannot add", 0);
	}

	#[test]
	fn merge_overflow_drops_addend() {
		let logger = TestLogger::new();
		let mut deadlines = vec![important(100, u64::MAX - 1), important(100, 2), important(90, 7)];
		merge_deadlines(&mut deadlines, &logger);
		assert_eq!(deadlines, vec![important(90, 7), important(100, u64::MAX - 1)]);
		logger.assert_log_contains(
			"lightning_anchorspend::anchorspend::deadline",
			"Cannot add deadlines",
			1,
		);
	}

	#[test]
	fn collects_only_claimable_inbound_htlcs() {
		let inbound = [
			InboundHtlc { amount_msat: 50_000, cltv_expiry: 700, preimage_known: true },
			InboundHtlc { amount_msat: 80_000, cltv_expiry: 710, preimage_known: false },
		];
		assert_eq!(deadlines_from_htlcs(&inbound, &[], 34), vec![important(700, 50_000)]);
	}

	#[test]
	fn origin_htlcs_use_expiry_delta() {
		let outbound =
			[OutboundHtlc { amount_msat: 1_000, cltv_expiry: 800, upstream_cltv_expiry: None }];
		assert_eq!(deadlines_from_htlcs(&[], &outbound, 34), vec![important(834, 1_000)]);

		let outbound =
			[OutboundHtlc { amount_msat: 1_000, cltv_expiry: u32::MAX, upstream_cltv_expiry: None }];
		assert_eq!(deadlines_from_htlcs(&[], &outbound, 34), vec![important(u32::MAX, 1_000)]);
	}

	#[test]
	fn single_claimable_htlc_schedule() {
		let logger = TestLogger::new();
		let inbound = [InboundHtlc { amount_msat: 50_000, cltv_expiry: 700, preimage_known: true }];
		let schedule = build_deadline_schedule(&inbound, &[], 600, 34, 2016, &logger);
		assert_eq!(
			schedule,
			vec![
				important(700, 50_000),
				Deadline { important: false, block: 700 + 2016, value_msat: 0 },
			]
		);
	}

	#[test]
	fn low_priority_deadline_base() {
		// Without HTLCs, the close attempt height is the base.
		assert_eq!(
			Deadline::low_priority(&[], 500, 2016),
			Some(Deadline { important: false, block: 2516, value_msat: 0 })
		);
		// A close attempt after the last HTLC deadline wins.
		assert_eq!(Deadline::low_priority(&[important(400, 1)], 500, 2016).unwrap().block, 2516);
		assert_eq!(Deadline::low_priority(&[important(600, 1)], 500, 2016).unwrap().block, 2616);
		assert_eq!(
			Deadline::low_priority(&[important(u32::MAX - 1, 1)], 500, 2016).unwrap().block,
			u32::MAX
		);
		assert_eq!(Deadline::low_priority(&[important(u32::MAX, 1)], 500, 2016), None);
	}

	#[test]
	fn no_low_priority_deadline_after_htlc_at_maximum_height() {
		let logger = TestLogger::new();
		let inbound = [
			InboundHtlc { amount_msat: 50_000, cltv_expiry: 700, preimage_known: true },
			InboundHtlc { amount_msat: 10_000, cltv_expiry: u32::MAX, preimage_known: true },
		];
		let schedule = build_deadline_schedule(&inbound, &[], 600, 34, 2016, &logger);
		assert_eq!(schedule, vec![important(700, 50_000), important(u32::MAX, 10_000)]);
	}
}
