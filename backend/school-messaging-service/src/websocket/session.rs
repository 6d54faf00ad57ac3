//! One live connection bound to one (account, conversation).
//!
//! A session runs three tasks:
//! - the receive loop reads frames, tracks the idle deadline and queues
//!   envelopes for dispatch;
//! - the send loop drains the bounded outbound queue and sends keepalive
//!   pings;
//! - the dispatch worker handles queued envelopes one at a time, so requests
//!   from one connection are processed in arrival order.
//!
//! They share a [`SessionHandle`]; closing it stops all three.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::Instrument;
use uuid::Uuid;

use super::dispatcher::Dispatcher;
use super::message_types::{OutboundEvent, RawEnvelope};
use super::transport::{Frame, FrameSink, TransportError};
use super::ConnectionRegistry;
use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Frames waiting for the send loop.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Arc<str>),
    Pong(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The queue is full; the session is being torn down.
    #[error("send queue full")]
    Full,

    #[error("session closed")]
    Closed,

    #[error("failed to encode frame")]
    Encode,
}

/// Shared state of a live session; this is what the registry holds.
pub struct SessionHandle {
    id: SessionId,
    account_id: Uuid,
    conversation_id: Uuid,
    queue: Mutex<Option<mpsc::Sender<Outbound>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    registry: ConnectionRegistry,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("account_id", &self.account_id)
            .field("conversation_id", &self.conversation_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionHandle {
    /// Creates an unregistered handle and the receiving end of its queue.
    pub fn new(
        account_id: Uuid,
        conversation_id: Uuid,
        capacity: usize,
        registry: ConnectionRegistry,
    ) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Arc::new(Self {
            id: SessionId::new(),
            account_id,
            conversation_id,
            queue: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            registry,
        });
        (handle, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the session has been closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    /// Queues a frame without waiting.
    ///
    /// A full queue means the peer is not keeping up: the session is closed
    /// in the background and the frame is dropped.
    pub fn enqueue(self: &Arc<Self>, frame: Outbound) -> Result<(), EnqueueError> {
        let result = {
            let guard = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                Some(tx) => tx.try_send(frame),
                None => return Err(EnqueueError::Closed),
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.close().await });
                Err(EnqueueError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    pub fn send(self: &Arc<Self>, event: &OutboundEvent) -> Result<(), EnqueueError> {
        let text = event.to_text().map_err(|e| {
            tracing::warn!(event_type = event.event_type(), error = %e, "failed to encode frame");
            EnqueueError::Encode
        })?;
        self.enqueue(Outbound::Text(text))
    }

    /// Tears the session down. Only the first call has any effect: it
    /// stops the loops, releases the queue and unregisters from the hub.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.registry
            .unregister(self.conversation_id, self.id)
            .await;
        tracing::debug!(session_id = %self.id, "session handle closed");
    }
}

/// Live connection of `account_id` to `conversation_id`.
pub struct ClientSession {
    pub account_id: Uuid,
    pub conversation_id: Uuid,
    pub config: SessionConfig,
    pub registry: ConnectionRegistry,
    pub dispatcher: Arc<Dispatcher>,
}

impl ClientSession {
    /// Writes `snapshot`, then serves the connection until it ends.
    ///
    /// Fails without registering if the snapshot cannot be written in time.
    /// Everything after that ends the session normally.
    pub async fn run<K, S>(self, snapshot: Arc<str>, sink: K, source: S) -> Result<(), TransportError>
    where
        K: FrameSink,
        S: Stream<Item = Result<Frame, TransportError>>,
    {
        let span = tracing::info_span!(
            "ws_session",
            conversation_id = %self.conversation_id,
            account_id = %self.account_id,
        );
        self.serve(snapshot, sink, source).instrument(span).await
    }

    async fn serve<K, S>(self, snapshot: Arc<str>, mut sink: K, source: S) -> Result<(), TransportError>
    where
        K: FrameSink,
        S: Stream<Item = Result<Frame, TransportError>>,
    {
        let cfg = self.config;

        let written = match timeout(cfg.snapshot_write_timeout, sink.send_text(&snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::WriteTimeout),
        };
        if let Err(e) = written {
            tracing::warn!(error = %e, "snapshot write failed, dropping connection");
            let _ = timeout(cfg.write_timeout, sink.close()).await;
            return Err(e);
        }

        let (handle, queue) = SessionHandle::new(
            self.account_id,
            self.conversation_id,
            cfg.send_queue_capacity,
            self.registry.clone(),
        );
        self.registry.register(handle.clone()).await;
        tracing::info!(session_id = %handle.id(), "session opened");

        let writer = tokio::spawn(
            send_loop(sink, queue, handle.clone(), cfg.clone()).in_current_span(),
        );

        let (dispatch_tx, dispatch_rx) = mpsc::channel(cfg.dispatch_queue_capacity);
        tokio::spawn(
            dispatch_loop(self.dispatcher.clone(), handle.clone(), dispatch_rx).in_current_span(),
        );

        let reason = receive_loop(&handle, source, dispatch_tx, &cfg).await;

        handle.close().await;
        if let Err(e) = writer.await {
            tracing::warn!(error = %e, "send loop panicked");
        }
        tracing::info!(session_id = %handle.id(), reason, "session closed");
        Ok(())
    }
}

async fn receive_loop<S>(
    handle: &Arc<SessionHandle>,
    source: S,
    dispatch: mpsc::Sender<RawEnvelope>,
    cfg: &SessionConfig,
) -> &'static str
where
    S: Stream<Item = Result<Frame, TransportError>>,
{
    let mut source = std::pin::pin!(source);
    let idle = tokio::time::sleep(cfg.pong_wait);
    tokio::pin!(idle);

    loop {
        let frame = tokio::select! {
            biased;
            _ = handle.closed() => return "closed",
            _ = &mut idle => return "idle timeout",
            frame = source.next() => frame,
        };

        let frame = match frame {
            None => return "stream ended",
            Some(Err(e)) => {
                tracing::debug!(error = %e, "read failed");
                return "read error";
            }
            Some(Ok(frame)) => frame,
        };

        match frame {
            Frame::Close => return "peer closed",
            Frame::Pong(_) => idle.as_mut().reset(Instant::now() + cfg.pong_wait),
            Frame::Ping(payload) => {
                let _ = handle.enqueue(Outbound::Pong(payload));
            }
            Frame::Binary(_) => tracing::trace!("ignoring binary frame"),
            Frame::Text(text) => {
                if text.len() > cfg.max_frame_bytes {
                    tracing::warn!(len = text.len(), "inbound frame exceeds limit");
                    return "frame too large";
                }
                let Some(envelope) = RawEnvelope::parse(&text) else {
                    tracing::trace!("dropping non-envelope frame");
                    continue;
                };
                match dispatch.try_send(envelope) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let _ = handle.send(&OutboundEvent::error("too many pending requests"));
                    }
                    Err(TrySendError::Closed(_)) => return "dispatcher stopped",
                }
            }
        }
    }
}

async fn send_loop<K: FrameSink>(
    mut sink: K,
    mut queue: mpsc::Receiver<Outbound>,
    handle: Arc<SessionHandle>,
    cfg: SessionConfig,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + cfg.ping_period, cfg.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let written = tokio::select! {
            biased;
            _ = handle.closed() => break,
            frame = queue.recv() => match frame {
                Some(Outbound::Text(text)) => timeout(cfg.write_timeout, sink.send_text(&text)).await,
                Some(Outbound::Pong(payload)) => timeout(cfg.write_timeout, sink.pong(&payload)).await,
                None => break,
            },
            _ = ping.tick() => timeout(cfg.write_timeout, sink.ping(b"")).await,
        };

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "write failed");
                break;
            }
            Err(_) => {
                tracing::warn!("write timed out");
                break;
            }
        }
    }

    handle.close().await;
    if timeout(cfg.write_timeout, sink.close()).await.is_err() {
        tracing::debug!("close frame timed out");
    }
}

async fn dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    handle: Arc<SessionHandle>,
    mut inbox: mpsc::Receiver<RawEnvelope>,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = handle.closed() => break,
            envelope = inbox.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        dispatcher.dispatch(&handle, envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, AccountRole};
    use crate::repository::{MemoryStore, Repositories};
    use crate::services::ConversationService;
    use crate::websocket::transport::testing::{ChannelSink, StalledSink, Written};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
    use tokio_stream::wrappers::UnboundedReceiverStream;

    struct Fixture {
        registry: ConnectionRegistry,
        dispatcher: Arc<Dispatcher>,
        teacher: Uuid,
        conversation: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let school = Uuid::new_v4();
        let teacher = Account::new(school, AccountRole::Teacher);
        let student = Account::new(school, AccountRole::Student);
        store.insert_account(teacher.clone()).await;
        store.insert_account(student.clone()).await;

        let service = ConversationService::new(Repositories::from_store(store));
        let conversation = service
            .create_direct_conversation(teacher.id, student.id)
            .await
            .unwrap()
            .conversation
            .id;
        let registry = ConnectionRegistry::new();
        let dispatcher = Arc::new(Dispatcher::new(
            service,
            Arc::new(registry.clone()),
            Duration::from_secs(5),
        ));
        Fixture {
            registry,
            dispatcher,
            teacher: teacher.id,
            conversation,
        }
    }

    impl Fixture {
        fn session(&self) -> ClientSession {
            ClientSession {
                account_id: self.teacher,
                conversation_id: self.conversation,
                config: SessionConfig::default(),
                registry: self.registry.clone(),
                dispatcher: self.dispatcher.clone(),
            }
        }
    }

    type Inbound = UnboundedSender<Result<Frame, TransportError>>;

    fn source() -> (Inbound, UnboundedReceiverStream<Result<Frame, TransportError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, UnboundedReceiverStream::new(rx))
    }

    fn snapshot() -> Arc<str> {
        Arc::from(r#"{"type":"conversation.snapshot","data":{}}"#)
    }

    async fn next_written(rx: &mut UnboundedReceiver<Written>) -> Written {
        tokio::time::timeout(Duration::from_secs(120), rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("sink dropped")
    }

    async fn next_json(rx: &mut UnboundedReceiver<Written>) -> Value {
        loop {
            match next_written(rx).await {
                Written::Text(text) => return serde_json::from_str(&text).unwrap(),
                Written::Ping => continue,
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    async fn wait_for_sessions(registry: &ConnectionRegistry, conversation: Uuid, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.session_count(conversation).await != n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("session count never reached target");
    }

    #[tokio::test]
    async fn snapshot_first_then_requests_are_served() {
        let fx = fixture().await;
        let (sink, mut written) = ChannelSink::new();
        let (inbound, stream) = source();
        let task = tokio::spawn(fx.session().run(snapshot(), sink, stream));

        assert_eq!(next_json(&mut written).await["type"], "conversation.snapshot");
        wait_for_sessions(&fx.registry, fx.conversation, 1).await;

        inbound.send(Ok(Frame::Text("not json".into()))).unwrap();
        inbound.send(Ok(Frame::Binary(Bytes::from_static(b"\x00")))).unwrap();
        inbound
            .send(Ok(Frame::Text(json!({"type": "presence.update", "data": {}}).to_string())))
            .unwrap();
        assert_eq!(
            next_json(&mut written).await,
            json!({"type": "error", "data": {"message": "unsupported event"}})
        );

        inbound
            .send(Ok(Frame::Text(
                json!({"type": "message.create", "data": {"kind": "text", "text": "hello"}})
                    .to_string(),
            )))
            .unwrap();
        assert_eq!(next_json(&mut written).await["type"], "message.create.ack");
        assert_eq!(next_json(&mut written).await["type"], "message.created");

        inbound.send(Ok(Frame::Close)).unwrap();
        assert_eq!(task.await.unwrap(), Ok(()));
        assert_eq!(next_written(&mut written).await, Written::Close);
        assert_eq!(fx.registry.session_count(fx.conversation).await, 0);
    }

    #[tokio::test]
    async fn requests_from_one_connection_are_handled_in_order() {
        let fx = fixture().await;
        let (sink, mut written) = ChannelSink::new();
        let (inbound, stream) = source();
        let task = tokio::spawn(fx.session().run(snapshot(), sink, stream));
        next_json(&mut written).await;

        for i in 0..5 {
            inbound
                .send(Ok(Frame::Text(
                    json!({"type": "message.create", "data": {"kind": "text", "text": format!("m{i}")}})
                        .to_string(),
                )))
                .unwrap();
        }

        let mut acked = Vec::new();
        while acked.len() < 5 {
            let frame = next_json(&mut written).await;
            if frame["type"] == "message.create.ack" {
                acked.push(frame["data"]["text"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(acked, vec!["m0", "m1", "m2", "m3", "m4"]);

        drop(inbound);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn request_burst_is_refused_without_dropping_connection() {
        let fx = fixture().await;
        let (sink, mut written) = ChannelSink::new();
        let (inbound, stream) = source();
        let mut session = fx.session();
        session.config.dispatch_queue_capacity = 1;
        session.config.send_queue_capacity = 64;
        let task = tokio::spawn(session.run(snapshot(), sink, stream));
        next_json(&mut written).await;
        wait_for_sessions(&fx.registry, fx.conversation, 1).await;

        for i in 0..10 {
            inbound
                .send(Ok(Frame::Text(
                    json!({"type": "message.create", "data": {"kind": "text", "text": format!("b{i}")}})
                        .to_string(),
                )))
                .unwrap();
        }

        let busy = json!({"type": "error", "data": {"message": "too many pending requests"}});
        let (mut refused, mut acked) = (0, 0);
        while refused == 0 || acked == 0 {
            let frame = next_json(&mut written).await;
            if frame == busy {
                refused += 1;
            } else if frame["type"] == "message.create.ack" {
                acked += 1;
            }
        }

        assert!(refused >= 1);
        assert!(acked >= 1);
        assert!(!task.is_finished());
        assert_eq!(fx.registry.session_count(fx.conversation).await, 1);

        inbound.send(Ok(Frame::Close)).unwrap();
        assert_eq!(task.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let fx = fixture().await;
        let (sink, mut written) = ChannelSink::new();
        let (inbound, stream) = source();
        let task = tokio::spawn(fx.session().run(snapshot(), sink, stream));
        next_json(&mut written).await;

        inbound
            .send(Ok(Frame::Ping(Bytes::from_static(b"are-you-there"))))
            .unwrap();
        assert_eq!(
            next_written(&mut written).await,
            Written::Pong(b"are-you-there".to_vec())
        );

        inbound
            .send(Err(TransportError::Protocol("reset".into())))
            .unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(fx.registry.session_count(fx.conversation).await, 0);
    }

    #[tokio::test]
    async fn failed_snapshot_never_registers() {
        let fx = fixture().await;
        let (mut sink, _written) = ChannelSink::new();
        sink.broken = true;
        let (_inbound, stream) = source();

        let result = fx.session().run(snapshot(), sink, stream).await;
        assert_eq!(result, Err(TransportError::Closed));
        assert_eq!(fx.registry.conversation_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_snapshot_write_times_out() {
        let fx = fixture().await;
        let (_inbound, stream) = source();

        let result = fx.session().run(snapshot(), StalledSink, stream).await;
        assert_eq!(result, Err(TransportError::WriteTimeout));
        assert_eq!(fx.registry.conversation_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_and_idle_deadline() {
        let fx = fixture().await;
        let (sink, mut written) = ChannelSink::new();
        let (inbound, stream) = source();
        let task = tokio::spawn(fx.session().run(snapshot(), sink, stream));
        next_json(&mut written).await;

        // First ping after the ping period; a pong pushes the deadline out.
        assert_eq!(next_written(&mut written).await, Written::Ping);
        inbound.send(Ok(Frame::Pong(Bytes::new()))).unwrap();
        assert_eq!(next_written(&mut written).await, Written::Ping);
        assert!(!task.is_finished());

        // No more pongs: the idle deadline ends the session.
        let outcome = tokio::time::timeout(Duration::from_secs(120), task)
            .await
            .expect("idle session should end");
        assert_eq!(outcome.unwrap(), Ok(()));
        assert_eq!(fx.registry.session_count(fx.conversation).await, 0);
    }

    #[tokio::test]
    async fn oversized_frame_ends_session() {
        let fx = fixture().await;
        let (sink, mut written) = ChannelSink::new();
        let (inbound, stream) = source();
        let task = tokio::spawn(fx.session().run(snapshot(), sink, stream));
        next_json(&mut written).await;

        let huge = "x".repeat(SessionConfig::default().max_frame_bytes + 1);
        inbound.send(Ok(Frame::Text(huge))).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(next_written(&mut written).await, Written::Close);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let conversation = Uuid::new_v4();
        let (handle, mut rx) = SessionHandle::new(Uuid::new_v4(), conversation, 4, registry.clone());
        registry.register(handle.clone()).await;

        handle.close().await;
        handle.close().await;

        assert!(handle.is_closed());
        assert_eq!(registry.session_count(conversation).await, 0);
        assert!(!registry.unregister(conversation, handle.id()).await);
        assert_eq!(
            handle.enqueue(Outbound::Text(Arc::from("late"))),
            Err(EnqueueError::Closed)
        );
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_closes_tear_down_once() {
        let registry = ConnectionRegistry::new();
        let conversation = Uuid::new_v4();
        let (handle, _rx) = SessionHandle::new(Uuid::new_v4(), conversation, 4, registry.clone());
        let (sibling, _sibling_rx) =
            SessionHandle::new(Uuid::new_v4(), conversation, 4, registry.clone());
        registry.register(handle.clone()).await;
        registry.register(sibling.clone()).await;

        let closers: Vec<_> = (0..3)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.close().await })
            })
            .collect();
        tokio::join!(handle.close(), handle.close(), handle.close());
        for closer in closers {
            closer.await.unwrap();
        }

        assert!(handle.is_closed());
        assert!(!sibling.is_closed());
        assert_eq!(registry.session_count(conversation).await, 1);
        assert!(!registry.unregister(conversation, handle.id()).await);
        assert!(registry.unregister(conversation, sibling.id()).await);
    }

    #[tokio::test]
    async fn full_queue_fails_fast_and_closes() {
        let registry = ConnectionRegistry::new();
        let conversation = Uuid::new_v4();
        let (handle, _rx) = SessionHandle::new(Uuid::new_v4(), conversation, 2, registry.clone());
        registry.register(handle.clone()).await;

        assert!(handle.enqueue(Outbound::Text(Arc::from("1"))).is_ok());
        assert!(handle.enqueue(Outbound::Text(Arc::from("2"))).is_ok());
        assert_eq!(
            handle.enqueue(Outbound::Text(Arc::from("3"))),
            Err(EnqueueError::Full)
        );

        tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .unwrap();
        wait_for_sessions(&registry, conversation, 0).await;
    }

    #[tokio::test]
    async fn evicted_session_stops_its_loops() {
        let fx = fixture().await;
        let (sink, mut written) = ChannelSink::new();
        let (_inbound, stream) = source();
        let task = tokio::spawn(fx.session().run(snapshot(), sink, stream));
        next_json(&mut written).await;
        wait_for_sessions(&fx.registry, fx.conversation, 1).await;

        // The hub gives up on the session from outside its own loops.
        let handles: Vec<_> = {
            let guard = fx.registry.inner.read().await;
            guard
                .get(&fx.conversation)
                .map(|s| s.values().cloned().collect())
                .unwrap_or_default()
        };
        for handle in handles {
            handle.close().await;
        }

        task.await.unwrap().unwrap();
        assert_eq!(fx.registry.session_count(fx.conversation).await, 0);
    }
}
