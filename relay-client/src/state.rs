//! Session state: the authoritative session record, id/sequence counters,
//! and the pending-packet table.

use std::collections::HashMap;

use tokio::sync::oneshot;

use relay_crypto::AuthKey;
use relay_proto::{MsgIdGen, SeqGen};

use crate::proto::{DcOption, TlValue};

/// The authoritative session record.
///
/// The authorization key and its hash travel together: [`SessionInfo::auth_key`]
/// is `Some` exactly when the key has been established, and the persisted hash
/// is derived from it on save.
#[derive(Clone, Debug, Default)]
pub struct SessionInfo {
    /// Data-center id the session is attached to.
    pub dc_id: i32,
    /// The authorization key, once established.
    pub auth_key: Option<AuthKey>,
    /// Current server salt.
    pub server_salt: i64,
    /// Endpoint address as `host:port`.
    pub addr: String,
    /// Random id for this connection epoch.
    pub session_id: i64,
}

/// One in-flight packet, owned by the pending table.
///
/// The table holds the packet; queues refer back to it by message id, and the
/// response slot is a one-shot channel the dispatcher fires at most once.
pub(crate) struct PendingPacket {
    pub msg_id: i64,
    pub seq_no: i32,
    pub msg: TlValue,
    pub responder: Option<oneshot::Sender<TlValue>>,
    pub needs_ack: bool,
}

/// Everything guarded by the single session mutex.
pub(crate) struct SessionState {
    pub session: SessionInfo,
    pub msg_ids: MsgIdGen,
    pub seq: SeqGen,
    pub pending: HashMap<i64, PendingPacket>,
    pub encryption_ready: bool,
    pub dc_options: Vec<DcOption>,
}

impl SessionState {
    pub fn new(session: SessionInfo) -> Self {
        Self {
            session,
            msg_ids: MsgIdGen::new(),
            seq: SeqGen::new(),
            pending: HashMap::new(),
            encryption_ready: false,
            dc_options: Vec::new(),
        }
    }

    /// Allocate the id and sequence number for one outgoing message.
    pub fn assign(&mut self, content_related: bool) -> (i64, i32) {
        (self.msg_ids.next(), self.seq.next(content_related))
    }

    /// Look up the endpoint for a DC from the learned options.
    pub fn dc_addr(&self, dc_id: i32, ipv6: bool) -> Option<String> {
        self.dc_options
            .iter()
            .find(|o| o.id == dc_id && o.ipv6 == ipv6 && !o.media_only && !o.cdn && !o.tcpo_only)
            .map(|o| format!("{}:{}", o.ip, o.port))
    }
}
