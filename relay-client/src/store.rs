//! Pluggable session persistence.
//!
//! The on-disk format is four wire-framed fields in order: auth key bytes,
//! auth key hash, server salt (`i64`), endpoint address (string). A missing
//! key is stored as an empty byte string.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use relay_crypto::AuthKey;
use relay_wire::{Reader, WireError, Writer};

use crate::state::SessionInfo;

// ── Error ─────────────────────────────────────────────────────────────────────

/// Errors from a [`SessionStore`].
#[derive(Debug)]
pub enum StoreError {
    /// No session has been persisted yet. Recoverable: connect fresh.
    NoSession,
    /// Filesystem failure.
    Io(io::Error),
    /// The stored bytes did not parse.
    Malformed(WireError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => write!(f, "no session data"),
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Malformed(e) => write!(f, "malformed session data: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
impl From<WireError> for StoreError {
    fn from(e: WireError) -> Self {
        Self::Malformed(e)
    }
}

// ── Trait ─────────────────────────────────────────────────────────────────────

/// Where session data lives between runs.
pub trait SessionStore: Send + Sync {
    /// Persist the key material, salt and address.
    fn save(&self, session: &SessionInfo) -> Result<(), StoreError>;

    /// Populate `session` from storage, or fail with
    /// [`StoreError::NoSession`] when nothing was saved yet.
    fn load(&self, session: &mut SessionInfo) -> Result<(), StoreError>;
}

// ── Shared encoding ───────────────────────────────────────────────────────────

fn encode_session(session: &SessionInfo) -> Vec<u8> {
    let mut w = Writer::with_capacity(300);
    match &session.auth_key {
        Some(key) => {
            w.bytes(key.bytes());
            w.bytes(&key.key_id());
        }
        None => {
            w.bytes(&[]);
            w.bytes(&[]);
        }
    }
    w.i64(session.server_salt);
    w.string(&session.addr);
    w.into_bytes()
}

fn decode_session(bytes: &[u8], session: &mut SessionInfo) -> Result<(), StoreError> {
    let mut r = Reader::new(bytes);
    let key_bytes = r.bytes();
    let _key_hash = r.bytes();
    let salt = r.i64();
    let addr = r.string();
    r.finish()?;

    session.auth_key = match key_bytes.len() {
        0 => None,
        256 => Some(AuthKey::from_bytes(key_bytes.try_into().unwrap())),
        _ => return Err(StoreError::Malformed(WireError::ShortRead)),
    };
    session.server_salt = salt;
    session.addr = addr;
    Ok(())
}

// ── FileStore ─────────────────────────────────────────────────────────────────

/// The default store: one compact binary file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store sessions at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStore for FileStore {
    fn save(&self, session: &SessionInfo) -> Result<(), StoreError> {
        std::fs::write(&self.path, encode_session(session))?;
        Ok(())
    }

    fn load(&self, session: &mut SessionInfo) -> Result<(), StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NoSession),
            Err(e) => return Err(e.into()),
        };
        decode_session(&bytes, session)
    }
}

// ── NoopStore ─────────────────────────────────────────────────────────────────

/// Persists nothing; every load reports no session.
pub struct NoopStore;

impl SessionStore for NoopStore {
    fn save(&self, _session: &SessionInfo) -> Result<(), StoreError> {
        Ok(())
    }

    fn load(&self, _session: &mut SessionInfo) -> Result<(), StoreError> {
        Err(StoreError::NoSession)
    }
}

// ── MemoryStore ───────────────────────────────────────────────────────────────

/// Keeps the session in memory. Useful for tests and always-fresh bots.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, session: &SessionInfo) -> Result<(), StoreError> {
        *self.data.lock().unwrap() = Some(encode_session(session));
        Ok(())
    }

    fn load(&self, session: &mut SessionInfo) -> Result<(), StoreError> {
        match self.data.lock().unwrap().as_deref() {
            Some(bytes) => decode_session(bytes, session),
            None => Err(StoreError::NoSession),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionInfo {
        SessionInfo {
            dc_id: 2,
            auth_key: Some(AuthKey::from_bytes(core::array::from_fn(|i| (i % 256) as u8))),
            server_salt: -99,
            addr: "127.0.0.1:443".to_string(),
            session_id: 1234,
        }
    }

    #[test]
    fn memory_roundtrip() {
        let store = MemoryStore::new();
        store.save(&sample()).unwrap();

        let mut loaded = SessionInfo::default();
        store.load(&mut loaded).unwrap();
        assert_eq!(loaded.auth_key, sample().auth_key);
        assert_eq!(loaded.server_salt, -99);
        assert_eq!(loaded.addr, "127.0.0.1:443");
    }

    #[test]
    fn missing_session_is_recoverable() {
        let mut out = SessionInfo::default();
        assert!(matches!(MemoryStore::new().load(&mut out), Err(StoreError::NoSession)));
        assert!(matches!(NoopStore.load(&mut out), Err(StoreError::NoSession)));
    }

    #[test]
    fn file_roundtrip() {
        let path = std::env::temp_dir().join(format!("relay-session-{}", std::process::id()));
        let store = FileStore::new(&path);
        store.save(&sample()).unwrap();

        let mut loaded = SessionInfo::default();
        store.load(&mut loaded).unwrap();
        assert_eq!(loaded.auth_key, sample().auth_key);
        assert_eq!(loaded.addr, "127.0.0.1:443");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn keyless_session_roundtrips_as_none() {
        let store = MemoryStore::new();
        let mut info = sample();
        info.auth_key = None;
        store.save(&info).unwrap();

        let mut loaded = SessionInfo::default();
        store.load(&mut loaded).unwrap();
        assert!(loaded.auth_key.is_none());
    }

    #[test]
    fn file_store_missing_is_no_session() {
        let store = FileStore::new("/nonexistent-relay/none.session");
        let mut out = SessionInfo::default();
        assert!(matches!(store.load(&mut out), Err(StoreError::NoSession)));
    }
}
