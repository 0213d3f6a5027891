//! Binary wire primitives for the relay RPC protocol.
//!
//! Everything on the wire is little-endian and 4-byte aligned:
//! * integers serialize as raw little-endian bytes,
//! * byte strings carry a 1-byte length (or an `0xfe` marker plus three
//!   length bytes for 254+) and are zero-padded to a 4-byte boundary,
//! * big integers serialize as byte strings of their big-endian magnitude,
//! * vectors are `0x1cb5c415 | count | items`.
//!
//! [`Reader`] carries a *sticky* error: after the first failure every further
//! read is a no-op returning a zero value, and the error is surfaced once at
//! the end via [`Reader::finish`]. This keeps multi-field decoders free of
//! per-field `?` noise without losing the failure.

#![deny(unsafe_code)]

pub mod read;
pub mod write;

pub use read::{Reader, WireError};
pub use write::Writer;

/// Constructor id of the boxed `vector` type.
pub const VECTOR_ID: u32 = 0x1cb5c415;
/// Constructor id of `boolTrue`.
pub const BOOL_TRUE_ID: u32 = 0x997275b5;
/// Constructor id of `boolFalse`.
pub const BOOL_FALSE_ID: u32 = 0xbc799737;
