//! Error types for the client core.

use std::{fmt, io};

use relay_proto::envelope::EnvelopeError;
use relay_proto::handshake::NegotiateError;
use relay_wire::WireError;

use crate::store::StoreError;

// ── RpcError ──────────────────────────────────────────────────────────────────

/// An error the server returned in response to an RPC call.
///
/// Numeric suffixes are stripped from the name and kept in [`RpcError::value`]:
/// `"PHONE_MIGRATE_4"` becomes `{ name: "PHONE_MIGRATE", value: Some(4) }`.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE, digits removed.
    pub name: String,
    /// Numeric suffix extracted from the name, if any.
    pub value: Option<u32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Parse a raw server error string like `"NETWORK_MIGRATE_2"`.
    pub fn from_wire(code: i32, message: &str) -> Self {
        if let Some(idx) = message.rfind('_') {
            let suffix = &message[idx + 1..];
            if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(value) = suffix.parse::<u32>() {
                    return Self { code, name: message[..idx].to_string(), value: Some(value) };
                }
            }
        }
        Self { code, name: message.to_string(), value: None }
    }

    /// Match the error name, with an optional `'*'` prefix or suffix wildcard.
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }
}

// ── ClientError ───────────────────────────────────────────────────────────────

/// The error type returned by every client operation.
#[derive(Debug)]
pub enum ClientError {
    /// Network / socket failure.
    Io(io::Error),
    /// The key exchange failed.
    Negotiate(NegotiateError),
    /// An envelope did not decrypt or parse.
    Envelope(EnvelopeError),
    /// A payload did not decode.
    Wire(WireError),
    /// The server answered with an RPC error.
    Rpc(RpcError),
    /// The session store failed.
    Store(StoreError),
    /// A migration named a data center we have no address for.
    UnknownDc(i32),
    /// The response channel closed before a response arrived.
    Dropped,
    /// The peer sent something that makes no sense here.
    Unexpected(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Negotiate(e) => write!(f, "key exchange: {e}"),
            Self::Envelope(e) => write!(f, "envelope: {e}"),
            Self::Wire(e) => write!(f, "wire: {e}"),
            Self::Rpc(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "session store: {e}"),
            Self::UnknownDc(dc) => write!(f, "unknown DC id: {dc}"),
            Self::Dropped => write!(f, "request dropped"),
            Self::Unexpected(what) => write!(f, "unexpected response: {what}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
impl From<NegotiateError> for ClientError {
    fn from(e: NegotiateError) -> Self {
        Self::Negotiate(e)
    }
}
impl From<EnvelopeError> for ClientError {
    fn from(e: EnvelopeError) -> Self {
        Self::Envelope(e)
    }
}
impl From<WireError> for ClientError {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}
impl From<RpcError> for ClientError {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}
impl From<StoreError> for ClientError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_split_off() {
        let e = RpcError::from_wire(303, "PHONE_MIGRATE_4");
        assert_eq!(e.name, "PHONE_MIGRATE");
        assert_eq!(e.value, Some(4));
        assert!(e.is("PHONE_MIGRATE"));
        assert!(e.is("PHONE_*"));
        assert!(e.is("*_MIGRATE"));
        assert!(!e.is("NETWORK_MIGRATE"));
    }

    #[test]
    fn plain_names_are_kept() {
        let e = RpcError::from_wire(400, "SESSION_PASSWORD_NEEDED");
        assert_eq!(e.name, "SESSION_PASSWORD_NEEDED");
        assert_eq!(e.value, None);
    }
}
