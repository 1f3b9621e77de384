//! # Ferry DCC
//!
//! Codec for the chat-side DCC negotiation text that tells a remote peer
//! where to collect or deliver a relayed file.
//!
//! This crate provides:
//! - Parsing of inbound `SSEND` offers and `RESUME` requests
//! - Encoding of offers, resume requests and `ACCEPT` replies, plain or
//!   wrapped in `\x01` control bytes
//!
//! Parsing never fails hard. Negotiation text comes from untrusted peers, so
//! anything malformed yields `None` and the caller simply ignores the message.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod message;
pub mod parse;

pub use message::{Accept, Negotiation, Offer, Resume};
pub use parse::{parse, parse_offer, parse_resume};

/// Control byte wrapping a negotiation payload
pub const CTCP_DELIM: char = '\x01';

/// Command word that prefixes every negotiation payload
pub const DCC_PREFIX: &str = "DCC";
