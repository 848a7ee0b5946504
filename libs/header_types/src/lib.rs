//! # Header Types
//!
//! Value types shared by the header cache and its tooling.
//!
//! A [`MessageHeader`] is the metadata record the remote message service
//! publishes for every stored message: who it is addressed to (the `I`
//! point, which doubles as the record's unique identifier), when the
//! service learned about it, and when it stops being valid.
//!
//! The canonical serialized form is a fixed-width ASCII string, see
//! [`header`] for the layout. Parsing never yields a partially valid
//! record: failures come back as [`HeaderParseError`].

pub mod header;

pub use header::{
    HeaderParseError, MessageHeader, HEADER_VERSION, IDENTIFIER_HEX_LEN, SERIALIZED_LEN,
};
