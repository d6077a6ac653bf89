// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

#![crate_name = "lightning_anchorspend"]

//! Anchor output fee bumping for force-closed Lightning channels.
//!
//! When a channel featuring anchor outputs is force-closed, its commitment transaction carries
//! whatever feerate was agreed upon when it was signed, which may be far too low to confirm before
//! the HTLCs it carries expire. This crate decides, for each such commitment transaction, whether
//! spending one of its anchor outputs in a Child-Pays-For-Parent transaction is worth the fee
//! given the value at risk, picks the cheapest feerate which protects that value, has the spend
//! signed by an external signing authority and keeps replacing it (via Replace-By-Fee) each time
//! the broadcaster retransmits it.
//!
//! The entry point is [`AnchorSpender`], which is driven by commitment broadcast outcomes and by
//! the broadcaster's retransmission hook. Users without an async runtime may use
//! [`AnchorSpenderSync`] instead.
//!
//! The crate does not do chain tracking, feerate estimation, coin selection, key management or
//! networking itself; those are provided through the traits in [`chain::chaininterface`],
//! [`anchorspend::AnchorWallet`], [`ln::htlc::HtlcLedger`] and [`sign::AnchorSpendSigner`].
//!
//! [`AnchorSpender`]: crate::anchorspend::AnchorSpender
//! [`AnchorSpenderSync`]: crate::anchorspend::sync::AnchorSpenderSync

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate bitcoin;
extern crate core;
extern crate hashbrown;

#[macro_use]
pub mod util;
pub mod anchorspend;
pub mod chain;
pub mod ln;
pub mod sign;
