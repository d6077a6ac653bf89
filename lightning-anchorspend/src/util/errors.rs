// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Error types live here.

use core::fmt;

/// A failure to communicate with the signing authority.
///
/// These indicate a broken trusted component rather than a transient condition: the anchor spender
/// logs them and aborts. A reply which parses but does not finalize into a valid transaction is
/// not an [`AnchorSpendSignerError`], it is returned as a [`Psbt`] lacking final witnesses.
///
/// [`Psbt`]: bitcoin::psbt::Psbt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnchorSpendSignerError {
	/// The signer answered with bytes which could not be parsed as a PSBT.
	MalformedReply {
		/// The raw reply, for diagnostics.
		reply: Vec<u8>,
	},
	/// The signer went away before answering.
	Disconnected,
}

impl fmt::Display for AnchorSpendSignerError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::MalformedReply { reply } => {
				write!(f, "Signer sent a malformed anchor spend reply ({} bytes)", reply.len())
			},
			Self::Disconnected => write!(f, "Signer disconnected before answering."),
		}
	}
}

impl std::error::Error for AnchorSpendSignerError {}
