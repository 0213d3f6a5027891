//! Asynchronous client core for the relay RPC protocol.
//!
//! Maintains one authenticated, encrypted, ordered session with a data-center
//! endpoint, multiplexes request/response traffic over a single TCP
//! connection, survives transient failures and data-center migrations, and
//! delivers server-initiated events to an injected handler.
//!
//! ```rust,no_run
//! use relay_client::{Client, proto::TlValue};
//!
//! # async fn run() -> Result<(), relay_client::ClientError> {
//! let client = Client::new(12345, "app-hash");
//! client.init_session(false).await?;
//! client.connect().await?;
//!
//! client.set_event_handler(|event| println!("event: {event:?}"));
//! let response = client.invoke(TlValue::Ping { ping_id: 1 }).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod auth;
mod config;
mod dispatch;
mod errors;
pub mod proto;
mod state;
mod store;

pub use auth::{AuthDataProvider, StdinAuthProvider};
pub use config::{AppConfig, DEFAULT_ENDPOINT, DEFAULT_LAYER};
pub use errors::{ClientError, RpcError};
pub use state::SessionInfo;
pub use store::{FileStore, MemoryStore, NoopStore, SessionStore, StoreError};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;

use relay_crypto::{AuthKey, Side};
use relay_proto::envelope::{pack_encrypted, unpack_encrypted};
use relay_proto::{handshake, transport, MsgIdGen};
use relay_wire::Writer;

use proto::{build, Codec, ServiceCodec, TlValue};
use state::{PendingPacket, SessionState};

/// Long-lived workers per connection generation.
const WORKER_COUNT: usize = 4;
/// Caller-facing queue bound.
const EXT_QUEUE_CAP: usize = 64;
/// Internal queue bound; the slack absorbs retransmissions.
const INT_QUEUE_CAP: usize = 1024;
/// Most packets the send worker folds into one container.
const MAX_BATCH: usize = 16;
/// Keepalive cadence.
const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Pause between reconnect attempts.
const RECONNECT_RETRY: Duration = Duration::from_secs(5);
/// Transfer worker nap while the internal queue lacks headroom.
const TRANSFER_NAP: Duration = Duration::from_millis(10);

type Shared<T> = Arc<Mutex<T>>;
type EventHandler = Arc<dyn Fn(TlValue) + Send + Sync>;

/// A packet freshly enqueued by a caller or an internal routine.
pub(crate) struct Outbound {
    pub msg: TlValue,
    pub responder: Option<oneshot::Sender<TlValue>>,
}

/// One slot on the internal queue.
pub(crate) enum QueueItem {
    /// A packet that still needs an id and a pending-table entry.
    Fresh(Outbound),
    /// Re-send an in-flight packet with its original id and sequence number.
    /// Skipped silently if the packet completed in the meantime.
    Resend { msg_id: i64 },
}

pub(crate) struct Inner {
    pub(crate) app: AppConfig,
    pub(crate) store: Box<dyn SessionStore>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) handler: std::sync::RwLock<Option<EventHandler>>,

    pub(crate) ext_cap: usize,
    pub(crate) ext_tx: mpsc::Sender<Outbound>,
    pub(crate) ext_rx: Shared<mpsc::Receiver<Outbound>>,
    pub(crate) int_tx: mpsc::Sender<QueueItem>,
    pub(crate) int_rx: Shared<mpsc::Receiver<QueueItem>>,
    pub(crate) stop_tx: mpsc::Sender<()>,
    pub(crate) stop_rx: Shared<mpsc::Receiver<()>>,

    pub(crate) workers: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) reconnect_gate: Semaphore,
    preseeded: bool,
    watchdog_started: AtomicBool,
}

impl Inner {
    pub(crate) fn save_session_logged(&self, session: &SessionInfo) {
        if let Err(e) = self.store.save(session) {
            log::error!("failed to save session data: {e}");
        }
    }
}

/// A pending response. Resolves once the dispatcher completes the packet,
/// which may happen after any number of reconnects.
pub struct Response {
    rx: oneshot::Receiver<TlValue>,
}

impl Response {
    /// Wait for the response. RPC errors come back as [`ClientError::Rpc`].
    pub async fn wait(self) -> Result<TlValue, ClientError> {
        match self.rx.await {
            Ok(TlValue::RpcError { code, message }) => {
                Err(ClientError::Rpc(RpcError::from_wire(code, &message)))
            }
            Ok(value) => Ok(value),
            Err(_) => Err(ClientError::Dropped),
        }
    }
}

/// The client core. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<Inner>,
}

impl Client {
    /// A client with the default file store (`relay.session`) and codec.
    pub fn new(app_id: i32, app_hash: &str) -> Self {
        Self::with_config(AppConfig::new(app_id, app_hash), Box::new(FileStore::new("relay.session")), None)
    }

    /// A client with explicit configuration, store, and optionally a
    /// pre-loaded session record.
    pub fn with_config(
        app: AppConfig,
        store: Box<dyn SessionStore>,
        session: Option<SessionInfo>,
    ) -> Self {
        Self::with_codec(app, store, Arc::new(ServiceCodec), session)
    }

    /// Like [`Client::with_config`] with an application-supplied codec.
    pub fn with_codec(
        app: AppConfig,
        store: Box<dyn SessionStore>,
        codec: Arc<dyn Codec>,
        session: Option<SessionInfo>,
    ) -> Self {
        Self::build(app, store, codec, session, EXT_QUEUE_CAP, INT_QUEUE_CAP)
    }

    fn build(
        app: AppConfig,
        store: Box<dyn SessionStore>,
        codec: Arc<dyn Codec>,
        session: Option<SessionInfo>,
        ext_cap: usize,
        int_cap: usize,
    ) -> Self {
        let (ext_tx, ext_rx) = mpsc::channel(ext_cap);
        let (int_tx, int_rx) = mpsc::channel(int_cap);
        let (stop_tx, stop_rx) = mpsc::channel(WORKER_COUNT);
        let preseeded = session.is_some();

        Self {
            inner: Arc::new(Inner {
                app,
                store,
                codec,
                state: Mutex::new(SessionState::new(session.unwrap_or_default())),
                handler: std::sync::RwLock::new(None),
                ext_cap,
                ext_tx,
                ext_rx: Arc::new(Mutex::new(ext_rx)),
                int_tx,
                int_rx: Arc::new(Mutex::new(int_rx)),
                stop_tx,
                stop_rx: Arc::new(Mutex::new(stop_rx)),
                workers: Mutex::new(Vec::new()),
                reconnect_gate: Semaphore::new(1),
                preseeded,
                watchdog_started: AtomicBool::new(false),
            }),
        }
    }

    /// Register the handler for server-initiated events. It runs on its own
    /// task per event and may block.
    pub fn set_event_handler<F>(&self, handler: F)
    where
        F: Fn(TlValue) + Send + Sync + 'static,
    {
        *self.inner.handler.write().unwrap() = Some(Arc::new(handler));
    }

    /// The application configuration this client was built with.
    pub fn app_config(&self) -> &AppConfig {
        &self.inner.app
    }

    /// A copy of the current session record.
    pub async fn copy_session(&self) -> SessionInfo {
        self.inner.state.lock().await.session.clone()
    }

    // ── Session setup ─────────────────────────────────────────────────────────

    /// Prepare the session record: load it from the store (or start fresh at
    /// the default endpoint) and draw a new random session id.
    ///
    /// `preseeded_ready` only applies when the session record was injected at
    /// construction time and says whether its key is already usable.
    pub async fn init_session(&self, preseeded_ready: bool) -> Result<(), ClientError> {
        let mut st = self.inner.state.lock().await;
        if self.inner.preseeded {
            st.encryption_ready = preseeded_ready;
        } else {
            match self.inner.store.load(&mut st.session) {
                Ok(()) => st.encryption_ready = true,
                Err(StoreError::NoSession) => {
                    st.session.addr = DEFAULT_ENDPOINT.to_string();
                    st.encryption_ready = false;
                }
                Err(e) => return Err(e.into()),
            }
        }
        let mut raw = [0u8; 8];
        relay_crypto::random_bytes(&mut raw);
        st.session.session_id = i64::from_le_bytes(raw);
        Ok(())
    }

    /// [`Client::init_session`] followed by [`Client::connect`].
    pub async fn init_and_connect(&self) -> Result<(), ClientError> {
        self.init_session(false).await?;
        self.connect().await
    }

    // ── Connect ───────────────────────────────────────────────────────────────

    /// Open the TCP connection, run the key exchange if the session has no
    /// usable key, start the workers, and fetch the endpoint configuration.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (addr, ready) = {
            let st = self.inner.state.lock().await;
            log::info!("connecting to DC {} ({})...", st.session.dc_id, st.session.addr);
            (st.session.addr.clone(), st.encryption_ready)
        };

        let mut stream = TcpStream::connect(&addr).await?;
        transport::send_init(&mut stream).await?;

        if !ready {
            let mut handshake_ids = MsgIdGen::new();
            let done = handshake::negotiate(&mut stream, &mut handshake_ids).await?;
            let mut st = self.inner.state.lock().await;
            st.session.auth_key = Some(AuthKey::from_bytes(done.auth_key));
            st.session.server_salt = done.first_salt;
            st.msg_ids.set_time_offset(done.time_offset);
            st.msg_ids.bump_past(handshake_ids.last());
            st.encryption_ready = true;
            self.inner.store.save(&st.session)?;
        }

        let (reader, writer) = stream.into_split();
        self.spawn_io_workers(reader, writer).await;

        log::debug!("connecting: fetching endpoint configuration...");
        match self.invoke_internal(build::init_connection(&self.inner.app)).await? {
            TlValue::Config(cfg) => {
                let mut st = self.inner.state.lock().await;
                st.session.dc_id = cfg.this_dc;
                st.dc_options = cfg.dc_options;
            }
            other => {
                return Err(ClientError::Unexpected(format!(
                    "config fetch answered with {:#010x}",
                    other.constructor_id()
                )))
            }
        }

        self.spawn_queue_workers().await;
        self.spawn_watchdog();

        let st = self.inner.state.lock().await;
        log::info!("connected to DC {} ({})", st.session.dc_id, st.session.addr);
        Ok(())
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Enqueue a request on the bounded external queue. Blocks when the
    /// queue is full.
    pub async fn send(&self, msg: TlValue) -> Response {
        let (tx, rx) = oneshot::channel();
        let _ = self.inner.ext_tx.send(Outbound { msg, responder: Some(tx) }).await;
        Response { rx }
    }

    /// Enqueue a request and wait for its response.
    pub async fn invoke(&self, msg: TlValue) -> Result<TlValue, ClientError> {
        self.send(msg).await.wait().await
    }

    /// Internal sends skip the external queue so connect-time traffic cannot
    /// deadlock against caller backpressure.
    pub(crate) async fn invoke_internal(&self, msg: TlValue) -> Result<TlValue, ClientError> {
        let (tx, rx) = oneshot::channel();
        let _ = self.inner.int_tx.send(QueueItem::Fresh(Outbound { msg, responder: Some(tx) })).await;
        Response { rx }.wait().await
    }

    // ── Reconnect ─────────────────────────────────────────────────────────────

    /// Reconnect to the current data center.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let dc = self.inner.state.lock().await.session.dc_id;
        self.reconnect_to_dc(dc).await
    }

    /// Stop the workers, reconnect (to a possibly different DC), and re-queue
    /// every packet still awaiting completion.
    pub(crate) async fn reconnect_to_dc(&self, new_dc: i32) -> Result<(), ClientError> {
        {
            let st = self.inner.state.lock().await;
            log::info!("reconnecting: DC {} -> {}", st.session.dc_id, new_dc);
        }

        log::debug!("stopping workers...");
        for _ in 0..WORKER_COUNT {
            let _ = self.inner.stop_tx.send(()).await;
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.inner.workers.lock().await;
            workers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        log::debug!("workers stopped");

        // Workers that had already exited never took their token.
        {
            let mut stop_rx = self.inner.stop_rx.lock().await;
            while stop_rx.try_recv().is_ok() {}
        }

        let pending_ids: Vec<i64> = {
            let st = self.inner.state.lock().await;
            st.pending.keys().copied().collect()
        };
        log::debug!("{} pending packet(s) before reconnect", pending_ids.len());

        {
            let mut st = self.inner.state.lock().await;
            if new_dc != st.session.dc_id {
                // A different DC means a different key: redo the exchange.
                st.encryption_ready = false;
                let addr = st.dc_addr(new_dc, false).ok_or(ClientError::UnknownDc(new_dc))?;
                st.session.dc_id = new_dc;
                st.session.addr = addr;
            }
        }

        self.connect().await?;

        // Packets answered in the meantime are gone from the table; the rest
        // go back on the internal queue with their ids intact. The server
        // deduplicates by message id, so re-sent duplicates are harmless.
        let mut requeued = 0usize;
        for msg_id in pending_ids {
            let still_pending = self.inner.state.lock().await.pending.contains_key(&msg_id);
            if still_pending {
                let _ = self.inner.int_tx.send(QueueItem::Resend { msg_id }).await;
                requeued += 1;
            }
        }
        log::debug!("re-queued {requeued} pending packet(s)");

        let st = self.inner.state.lock().await;
        log::info!("reconnected to DC {} ({})", st.session.dc_id, st.session.addr);
        Ok(())
    }

    /// Reconnect until it succeeds, from a worker that lost the connection.
    /// At most one of these runs at a time.
    pub(crate) async fn reconnect_forever(&self) {
        log::info!("reconnecting...");
        let permit = match self.inner.reconnect_gate.try_acquire() {
            Ok(p) => p,
            Err(_) => {
                log::info!("reconnection already in progress, aborting");
                return;
            }
        };
        loop {
            let dc = self.inner.state.lock().await.session.dc_id;
            match self.reconnect_to_dc(dc).await {
                Ok(()) => break,
                Err(e) => {
                    log::error!("failed to reconnect: {e}");
                    log::info!("retrying in {RECONNECT_RETRY:?}");
                    tokio::time::sleep(RECONNECT_RETRY).await;
                }
            }
        }
        drop(permit);
    }

    fn spawn_reconnect(&self) {
        let client = self.clone();
        tokio::spawn(async move { client.reconnect_forever().await });
    }

    // ── Workers ───────────────────────────────────────────────────────────────

    pub(crate) async fn spawn_io_workers<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut workers = self.inner.workers.lock().await;
        workers.push(tokio::spawn(self.clone().send_worker(writer)));
        workers.push(tokio::spawn(self.clone().read_worker(reader)));
    }

    pub(crate) async fn spawn_queue_workers(&self) {
        let mut workers = self.inner.workers.lock().await;
        workers.push(tokio::spawn(self.clone().transfer_worker()));
        workers.push(tokio::spawn(self.clone().ping_worker()));
    }

    /// Drains the internal queue, assigns ids, records pending packets,
    /// encrypts and writes. Batches whatever is immediately available into a
    /// single container frame.
    async fn send_worker<W: AsyncWrite + Unpin + Send + 'static>(self, mut writer: W) {
        loop {
            let first = tokio::select! {
                biased;
                _ = recv_stop(&self.inner.stop_rx) => {
                    log::debug!("send worker done");
                    return;
                }
                item = recv_item(&self.inner.int_rx) => match item {
                    Some(item) => item,
                    None => return,
                },
            };

            let mut batch = vec![first];
            {
                let mut rx = self.inner.int_rx.lock().await;
                while batch.len() < MAX_BATCH {
                    match rx.try_recv() {
                        Ok(item) => batch.push(item),
                        Err(_) => break,
                    }
                }
            }

            let frame = match self.seal_batch(batch).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    log::error!("sending failed: {e}");
                    self.spawn_reconnect();
                    return;
                }
            };
            if let Err(e) = transport::write_frame(&mut writer, &frame).await {
                log::error!("sending failed: {e}");
                self.spawn_reconnect();
                return;
            }
        }
    }

    /// Turn a batch of queue items into one encrypted frame.
    async fn seal_batch(&self, batch: Vec<QueueItem>) -> Result<Option<Vec<u8>>, ClientError> {
        let mut st = self.inner.state.lock().await;
        let auth_key = st
            .session
            .auth_key
            .clone()
            .ok_or_else(|| ClientError::Unexpected("sending without an authorization key".into()))?;

        let mut entries: Vec<(i64, i32, Vec<u8>)> = Vec::with_capacity(batch.len());
        for item in batch {
            match item {
                QueueItem::Fresh(out) => {
                    let body = self.inner.codec.encode(&out.msg);
                    let content = out.msg.is_content_related();
                    let (msg_id, seq_no) = st.assign(content);
                    log::debug!("sending {:#010x} as #{msg_id}", out.msg.constructor_id());
                    if content {
                        st.pending.insert(
                            msg_id,
                            PendingPacket {
                                msg_id,
                                seq_no,
                                msg: out.msg,
                                responder: out.responder,
                                needs_ack: true,
                            },
                        );
                    }
                    entries.push((msg_id, seq_no, body));
                }
                QueueItem::Resend { msg_id } => match st.pending.get(&msg_id) {
                    Some(packet) => {
                        log::debug!("re-sending #{msg_id}");
                        entries.push((packet.msg_id, packet.seq_no, self.inner.codec.encode(&packet.msg)));
                    }
                    None => log::debug!("skipping re-send of completed #{msg_id}"),
                },
            }
        }
        if entries.is_empty() {
            return Ok(None);
        }

        let salt = st.session.server_salt;
        let session_id = st.session.session_id;
        let frame = if entries.len() == 1 {
            let (msg_id, seq_no, body) = &entries[0];
            pack_encrypted(&auth_key, salt, session_id, *msg_id, *seq_no, body, Side::Client)
        } else {
            // The container gets its own id, allocated after the entries so
            // it compares greater than all of them.
            let mut w = Writer::new();
            w.u32(proto::MSG_CONTAINER);
            w.i32(entries.len() as i32);
            for (msg_id, seq_no, body) in &entries {
                w.i64(*msg_id);
                w.i32(*seq_no);
                w.i32(body.len() as i32);
                w.raw(body);
            }
            let (container_id, container_seq) = st.assign(false);
            pack_encrypted(
                &auth_key,
                salt,
                session_id,
                container_id,
                container_seq,
                w.as_ref(),
                Side::Client,
            )
        };
        Ok(Some(frame))
    }

    /// Reads frames, decrypts, decodes and dispatches.
    async fn read_worker<R: AsyncRead + Unpin + Send + 'static>(self, mut reader: R) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = recv_stop(&self.inner.stop_rx) => {
                    log::debug!("read worker done");
                    return;
                }
                frame = transport::read_frame(&mut reader) => match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::error!("reading failed: {e}");
                        self.spawn_reconnect();
                        return;
                    }
                },
            };
            if let Err(e) = self.receive_frame(frame).await {
                log::error!("inbound frame rejected: {e}");
                self.spawn_reconnect();
                return;
            }
        }
    }

    async fn receive_frame(&self, frame: Vec<u8>) -> Result<(), ClientError> {
        let (auth_key, session_id) = {
            let st = self.inner.state.lock().await;
            let key = st
                .session
                .auth_key
                .clone()
                .ok_or_else(|| ClientError::Unexpected("inbound frame without a key".into()))?;
            (key, st.session.session_id)
        };
        let envelope = unpack_encrypted(&auth_key, &frame, Side::Server)?;
        if envelope.session_id != session_id {
            return Err(ClientError::Unexpected(format!(
                "frame for session {:#x}, ours is {:#x}",
                envelope.session_id, session_id
            )));
        }
        let value = self.inner.codec.decode(&envelope.body)?;
        self.process(envelope.msg_id, envelope.seq_no, value, true).await;
        Ok(())
    }

    /// Moves packets from the external to the internal queue while the
    /// internal queue keeps at least one external-capacity worth of headroom,
    /// so retransmissions always have somewhere to go.
    async fn transfer_worker(self) {
        loop {
            if self.inner.int_tx.capacity() >= self.inner.ext_cap {
                tokio::select! {
                    biased;
                    _ = recv_stop(&self.inner.stop_rx) => {
                        log::debug!("transfer worker done");
                        return;
                    }
                    out = recv_outbound(&self.inner.ext_rx) => match out {
                        Some(out) => {
                            if self.inner.int_tx.send(QueueItem::Fresh(out)).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    },
                }
            } else {
                {
                    let mut stop_rx = self.inner.stop_rx.lock().await;
                    if stop_rx.try_recv().is_ok() {
                        log::debug!("transfer worker done");
                        return;
                    }
                }
                tokio::time::sleep(TRANSFER_NAP).await;
            }
        }
    }

    /// Keeps the connection warm with a ping every minute.
    async fn ping_worker(self) {
        loop {
            tokio::select! {
                biased;
                _ = recv_stop(&self.inner.stop_rx) => {
                    log::debug!("ping worker done");
                    return;
                }
                _ = tokio::time::sleep(PING_INTERVAL) => {
                    let mut raw = [0u8; 8];
                    relay_crypto::random_bytes(&mut raw);
                    let ping = Outbound {
                        msg: TlValue::Ping { ping_id: i64::from_le_bytes(raw) },
                        responder: None,
                    };
                    if self.inner.int_tx.send(QueueItem::Fresh(ping)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Periodically flags packets stuck in the pending table.
    fn spawn_watchdog(&self) {
        if self.inner.watchdog_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as i64;
                let st = client.inner.state.lock().await;
                for &msg_id in st.pending.keys() {
                    let age = now - (msg_id >> 32);
                    if age > 5 {
                        log::warn!("pending #{msg_id} has waited {age}s");
                    }
                }
                log::debug!("{} pending packet(s) total", st.pending.len());
            }
        });
    }
}

// ── Shared-receiver helpers ───────────────────────────────────────────────────

/// Take one stop token. Each worker consumes exactly one.
async fn recv_stop(rx: &Shared<mpsc::Receiver<()>>) {
    let mut rx = rx.lock().await;
    let _ = rx.recv().await;
}

async fn recv_item(rx: &Shared<mpsc::Receiver<QueueItem>>) -> Option<QueueItem> {
    let mut rx = rx.lock().await;
    rx.recv().await
}

async fn recv_outbound(rx: &Shared<mpsc::Receiver<Outbound>>) -> Option<Outbound> {
    let mut rx = rx.lock().await;
    rx.recv().await
}


#[cfg(test)]
mod queue_tests {
    use super::*;

    fn opaque(n: u8) -> TlValue {
        let mut w = Writer::new();
        w.u32(0x5544_3322);
        w.i32(n as i32);
        TlValue::Opaque(w.into_bytes())
    }

    #[tokio::test]
    async fn transfer_applies_headroom_backpressure() {
        let client = testing::client(2, 4);
        tokio::spawn(client.clone().transfer_worker());

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let producer = client.clone();
        tokio::spawn(async move {
            for n in 0..10u8 {
                producer.send(opaque(n)).await;
                let _ = progress_tx.send(n);
            }
        });

        // Internal takes 3 (headroom >= 2 while len <= 2), external takes 2:
        // five sends complete, the sixth blocks.
        for expected in 0..5u8 {
            let n = tokio::time::timeout(Duration::from_secs(1), progress_rx.recv())
                .await
                .expect("send should not block yet")
                .unwrap();
            assert_eq!(n, expected);
        }
        assert!(
            tokio::time::timeout(Duration::from_millis(200), progress_rx.recv()).await.is_err(),
            "sixth send must block while the send worker is paused"
        );

        // "Unpause": drain the internal queue like the send worker would and
        // verify every packet arrives in order.
        for expected in 0..10u8 {
            let item = testing::next_item(&client).await;
            match item {
                QueueItem::Fresh(out) => assert_eq!(out.msg, opaque(expected)),
                QueueItem::Resend { .. } => panic!("unexpected resend"),
            }
        }
    }

    #[tokio::test]
    async fn stop_token_halts_transfer_worker() {
        let client = testing::client(2, 4);
        let handle = tokio::spawn(client.clone().transfer_worker());
        client.inner.stop_tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("transfer worker should stop")
            .unwrap();
    }
}
