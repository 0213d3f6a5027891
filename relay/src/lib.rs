//! # relay — client library for a layered binary RPC protocol
//!
//! `relay` keeps an authenticated, encrypted, ordered session with a
//! data-center endpoint, multiplexes request/response traffic over one TCP
//! connection, survives reconnects and data-center migrations, and hands
//! server-initiated events to your handler.
//!
//! The workspace is split by concern and wired together here:
//!
//! | Sub-crate      | Role                                                  |
//! |----------------|-------------------------------------------------------|
//! | `relay-wire`   | Binary wire primitives (reader, writer, framing)      |
//! | `relay-crypto` | AES-IGE, SHA macros, RSA, factorization, key schedule |
//! | `relay-proto`  | Abridged transport, envelopes, ids, key exchange      |
//! | `relay-client` | Queues, workers, dispatcher, reconnect, auth, stores  |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use relay::{Client, StdinAuthProvider};
//!
//! # async fn run() -> Result<(), relay::ClientError> {
//! let client = Client::new(12345, "app-hash");
//! client.init_and_connect().await?;
//! client.auth(&StdinAuthProvider).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Re-export of [`relay_wire`] — binary wire primitives.
pub use relay_wire as wire;

/// Re-export of [`relay_crypto`] — cryptographic primitives.
pub use relay_crypto as crypto;

/// Re-export of [`relay_proto`] — transport, envelopes and key exchange.
pub use relay_proto as proto;

/// Re-export of [`relay_client`] — the client core.
pub use relay_client as client;

// ── Convenience re-exports ────────────────────────────────────────────────────

pub use relay_client::{
    AppConfig, AuthDataProvider, Client, ClientError, FileStore, MemoryStore, NoopStore,
    Response, RpcError, SessionInfo, SessionStore, StdinAuthProvider, StoreError,
    DEFAULT_ENDPOINT, DEFAULT_LAYER,
};

pub use relay_crypto::AuthKey;
pub use relay_proto::handshake::Finished;
