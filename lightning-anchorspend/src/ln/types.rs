// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Various wrapper types (most around 32-byte arrays) for use in lightning.

use core::fmt;

/// A unique 32-byte identifier for a channel.
///
/// The anchor spender never derives these itself; they are handed to it by the node along with
/// the closing channel.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChannelId(pub [u8; 32]);

impl ChannelId {
	/// Generic constructor; create a new channel ID from the provided data.
	pub fn from_bytes(data: [u8; 32]) -> Self {
		Self(data)
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", crate::util::logger::DebugBytes(&self.0))
	}
}

#[cfg(test)]
mod tests {
	use super::ChannelId;

	#[test]
	fn test_channel_id_display() {
		let channel_id = ChannelId::from_bytes([0xab; 32]);
		assert_eq!(channel_id.to_string(), "ab".repeat(32));
	}
}
