// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The channel-level view the anchor spender needs: which channel is closing, what HTLCs it
//! still carries and where its anchor outputs are.

pub mod chan_utils;
pub mod channel;
pub mod htlc;
pub mod types;
