//! Session transport for the relay RPC protocol.
//!
//! This crate covers everything between the TCP socket and the decoded
//! payload bytes:
//! * abridged framing ([`transport`])
//! * message-id and sequence-number generation ([`message`])
//! * the plaintext and encrypted envelopes ([`envelope`])
//! * the four-step DH key exchange ([`handshake`])
//!
//! It is payload-agnostic: bodies are opaque byte buffers produced and
//! consumed by whoever owns the codec.

#![deny(unsafe_code)]

pub mod envelope;
pub mod handshake;
pub mod message;
pub mod transport;

pub use envelope::{Envelope, EnvelopeError};
pub use message::{MsgIdGen, SeqGen};
