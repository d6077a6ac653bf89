// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The crate keys its per-channel anchor state in `hashbrown`'s `HashMap`s with the `std`
//! `RandomState` hasher, so that hashing stays randomized and is not vulnerable to HashDoS.
//!
//! This module simply re-exports the `HashMap` used here for public consumption.

pub use std::collections::hash_map::RandomState;

/// The HashMap type used throughout the crate.
pub type HashMap<K, V> = hashbrown::HashMap<K, V, RandomState>;

/// Builds a new [`HashMap`].
pub fn new_hash_map<K, V>() -> HashMap<K, V> {
	HashMap::with_hasher(RandomState::new())
}
