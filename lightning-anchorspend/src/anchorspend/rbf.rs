// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Whether a new anchor spend may replace the one we last broadcast.

use bitcoin::Amount;

/// Returns whether an anchor spend paying `candidate_fee` for a package of `candidate_weight` pays
/// enough more than the previous spend's `last_spend_fee` to replace it.
///
/// We assume the minimum relay fee of 1 sat/vbyte, which the fee increase has to pay for the whole
/// package.
pub fn admits_replacement(
	candidate_fee: Amount, last_spend_fee: Amount, candidate_weight: u64,
) -> bool {
	match candidate_fee.checked_sub(last_spend_fee) {
		Some(increase) => increase >= Amount::from_sat(candidate_weight / 4),
		None => false,
	}
}
