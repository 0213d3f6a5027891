//! Classifies inbound payloads and routes them to pending requests or the
//! event handler.

use std::future::Future;
use std::pin::Pin;

use crate::proto::TlValue;
use crate::{Client, Outbound, QueueItem};

impl Client {
    /// Process one decoded inbound payload.
    ///
    /// Containers recurse with each inner message's own id and sequence
    /// number; after all nested processing, any odd-sequence message gets
    /// exactly one acknowledgement enqueued for its id.
    pub(crate) fn process<'a>(
        &'a self,
        msg_id: i64,
        seq_no: i32,
        value: TlValue,
        to_handler: bool,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match value {
                TlValue::Container(items) => {
                    for item in items {
                        self.process(item.msg_id, item.seq_no, item.value, true).await;
                    }
                }

                TlValue::BadServerSalt { bad_msg_id, new_server_salt, .. } => {
                    log::debug!("server salt rotated (was stale for #{bad_msg_id})");
                    let pending_ids: Vec<i64> = {
                        let mut st = self.inner.state.lock().await;
                        st.session.server_salt = new_server_salt;
                        self.inner.save_session_logged(&st.session);
                        st.pending.keys().copied().collect()
                    };
                    for id in pending_ids {
                        let _ = self.inner.int_tx.send(QueueItem::Resend { msg_id: id }).await;
                    }
                }

                TlValue::BadMsgNotification { bad_msg_id, bad_msg_seq_no, error_code } => {
                    log::debug!("bad message notification for #{bad_msg_id}: code {error_code}");
                    self.complete(
                        bad_msg_id,
                        TlValue::BadMsgNotification { bad_msg_id, bad_msg_seq_no, error_code },
                    )
                    .await;
                }

                TlValue::MsgsStateInfo { req_msg_id, info } => {
                    self.complete(req_msg_id, TlValue::MsgsStateInfo { req_msg_id, info }).await;
                }

                TlValue::NewSessionCreated { server_salt, .. } => {
                    log::debug!("server created a new session");
                    let mut st = self.inner.state.lock().await;
                    st.session.server_salt = server_salt;
                    self.inner.save_session_logged(&st.session);
                }

                TlValue::Ping { ping_id } => {
                    let pong = Outbound {
                        msg: TlValue::Pong { msg_id, ping_id },
                        responder: None,
                    };
                    let _ = self.inner.int_tx.send(QueueItem::Fresh(pong)).await;
                }

                TlValue::Pong { ping_id, .. } => {
                    log::debug!("pong {ping_id}");
                }

                TlValue::MsgsAck { msg_ids } => {
                    let mut st = self.inner.state.lock().await;
                    for id in msg_ids {
                        let finished = match st.pending.get_mut(&id) {
                            Some(packet) => {
                                packet.needs_ack = false;
                                // Responseless packets are finished once acked.
                                packet.responder.is_none()
                            }
                            None => false,
                        };
                        if finished {
                            st.pending.remove(&id);
                        }
                    }
                }

                TlValue::RpcResult { req_msg_id, inner } => {
                    let inner = *inner;
                    self.process(msg_id, 0, inner.clone(), false).await;
                    self.complete(req_msg_id, inner).await;
                }

                other => {
                    if to_handler {
                        let handler = self.inner.handler.read().unwrap().clone();
                        if let Some(handler) = handler {
                            tokio::task::spawn_blocking(move || handler(other));
                        }
                    }
                }
            }

            if seq_no & 1 == 1 {
                let ack = Outbound { msg: TlValue::MsgsAck { msg_ids: vec![msg_id] }, responder: None };
                let _ = self.inner.int_tx.send(QueueItem::Fresh(ack)).await;
            }
        })
    }

    /// Deliver `response` to the packet's one-shot slot and drop the packet.
    ///
    /// The slot fires at most once; anything addressed to an already-completed
    /// or waiterless packet is logged and dropped.
    pub(crate) async fn complete(&self, msg_id: i64, response: TlValue) {
        let mut st = self.inner.state.lock().await;
        match st.pending.remove(&msg_id) {
            Some(mut packet) => match packet.responder.take() {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => log::warn!("response to #{msg_id}, which has no waiter"),
            },
            None => log::warn!("duplicate or unaddressed response for #{msg_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::InnerMessage;
    use crate::state::PendingPacket;
    use crate::testing;
    use crate::SessionStore;

    use tokio::sync::oneshot;

    async fn register(client: &crate::Client, msg_id: i64, responder: bool) -> Option<oneshot::Receiver<TlValue>> {
        let mut st = client.inner.state.lock().await;
        let (tx, rx) = oneshot::channel();
        let (responder, rx) = if responder { (Some(tx), Some(rx)) } else { (None, None) };
        st.pending.insert(
            msg_id,
            PendingPacket {
                msg_id,
                seq_no: 1,
                msg: TlValue::Ping { ping_id: msg_id },
                responder,
                needs_ack: true,
            },
        );
        rx
    }

    #[tokio::test]
    async fn container_dispatch() {
        let client = testing::client(4, 64);
        let rx = register(&client, 7, true).await.unwrap();

        client
            .process(
                100,
                2,
                TlValue::Container(vec![
                    InnerMessage { msg_id: 10, seq_no: 1, value: TlValue::Ping { ping_id: 1 } },
                    InnerMessage {
                        msg_id: 12,
                        seq_no: 3,
                        value: TlValue::RpcResult {
                            req_msg_id: 7,
                            inner: Box::new(TlValue::Bool(true)),
                        },
                    },
                ]),
                true,
            )
            .await;

        // The ping is answered with a pong carrying the ping's msg_id.
        match testing::next_item(&client).await {
            QueueItem::Fresh(out) => assert_eq!(out.msg, TlValue::Pong { msg_id: 10, ping_id: 1 }),
            _ => panic!("expected pong"),
        }
        // Both odd-sequence children are acknowledged, in processing order.
        match testing::next_item(&client).await {
            QueueItem::Fresh(out) => assert_eq!(out.msg, TlValue::MsgsAck { msg_ids: vec![10] }),
            _ => panic!("expected ack for 10"),
        }
        match testing::next_item(&client).await {
            QueueItem::Fresh(out) => assert_eq!(out.msg, TlValue::MsgsAck { msg_ids: vec![12] }),
            _ => panic!("expected ack for 12"),
        }
        // The rpc_result completed pending packet 7 with its payload.
        assert_eq!(rx.await.unwrap(), TlValue::Bool(true));
        assert!(!client.inner.state.lock().await.pending.contains_key(&7));
    }

    #[tokio::test]
    async fn salt_rotation_requeues_pending() {
        let client = testing::client(4, 64);
        let rx = register(&client, 40, true).await.unwrap();

        client
            .process(
                200,
                0,
                TlValue::BadServerSalt {
                    bad_msg_id: 40,
                    bad_msg_seq_no: 1,
                    error_code: 48,
                    new_server_salt: 0x5a17,
                },
                true,
            )
            .await;

        // Salt replaced and persisted.
        assert_eq!(client.inner.state.lock().await.session.server_salt, 0x5a17);
        let mut saved = crate::SessionInfo::default();
        client.inner.store.load(&mut saved).unwrap();
        assert_eq!(saved.server_salt, 0x5a17);

        // The in-flight packet is re-queued by id and still pending.
        match testing::next_item(&client).await {
            QueueItem::Resend { msg_id } => assert_eq!(msg_id, 40),
            _ => panic!("expected resend"),
        }
        assert!(client.inner.state.lock().await.pending.contains_key(&40));

        // Its real response still completes it afterwards.
        client
            .process(
                201,
                0,
                TlValue::RpcResult { req_msg_id: 40, inner: Box::new(TlValue::Bool(false)) },
                true,
            )
            .await;
        assert_eq!(rx.await.unwrap(), TlValue::Bool(false));
    }

    #[tokio::test]
    async fn ack_clears_responseless_packets_only() {
        let client = testing::client(4, 64);
        register(&client, 50, false).await;
        let _rx = register(&client, 51, true).await;

        client.process(300, 0, TlValue::MsgsAck { msg_ids: vec![50, 51] }, true).await;

        let st = client.inner.state.lock().await;
        assert!(!st.pending.contains_key(&50), "fire-and-forget packet leaves on ack");
        let kept = st.pending.get(&51).expect("request packet stays until its response");
        assert!(!kept.needs_ack);
    }

    #[tokio::test]
    async fn completion_fires_exactly_once() {
        let client = testing::client(4, 64);
        let rx = register(&client, 60, true).await.unwrap();

        client.complete(60, TlValue::Bool(true)).await;
        // Second completion is dropped without panicking.
        client.complete(60, TlValue::Bool(false)).await;

        assert_eq!(rx.await.unwrap(), TlValue::Bool(true));
    }

    #[tokio::test]
    async fn odd_sequence_events_reach_handler_and_get_acked() {
        let client = testing::client(4, 64);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client.set_event_handler(move |value| {
            let _ = tx.send(value);
        });

        let event = TlValue::Opaque(vec![0x44, 0x33, 0x22, 0x11, 1, 0, 0, 0]);
        client.process(500, 5, event.clone(), true).await;

        let delivered = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, event);

        match testing::next_item(&client).await {
            QueueItem::Fresh(out) => assert_eq!(out.msg, TlValue::MsgsAck { msg_ids: vec![500] }),
            _ => panic!("expected ack"),
        }
    }

    #[tokio::test]
    async fn rpc_error_reaches_the_waiter_verbatim() {
        let client = testing::client(4, 64);
        let rx = register(&client, 70, true).await.unwrap();

        client
            .process(
                600,
                0,
                TlValue::RpcResult {
                    req_msg_id: 70,
                    inner: Box::new(TlValue::RpcError { code: 303, message: "PHONE_MIGRATE_4".into() }),
                },
                true,
            )
            .await;

        assert_eq!(
            rx.await.unwrap(),
            TlValue::RpcError { code: 303, message: "PHONE_MIGRATE_4".into() }
        );
    }
}
