//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.
//!
//! Each connection runs two loops joined only by its outbound queue and its
//! cancellation token:
//!
//! - the **read loop** runs inline, decodes inbound frames and hands them to
//!   the [`MessageHandler`]
//! - the **write loop** is spawned, drains the queue to the socket and sends
//!   keepalive pings

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, close_code};
use chorus_core::Frame;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::broadcast::ConnectionRegistry;
use super::connection::ClientConnection;
use super::handler::MessageHandler;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_FRAMES_DROPPED_TOTAL,
};

/// Per-connection timing and queue limits.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Interval between server-initiated Ping frames.
    pub ping_interval: Duration,
    /// Longest wait for any inbound frame before the connection is dropped.
    pub read_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            ping_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Everything a session needs from the server.
pub struct SessionContext {
    /// Active connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Inbound message state machine.
    pub handler: Arc<MessageHandler>,
    /// Limits applied to each connection.
    pub config: SessionConfig,
    /// Server shutdown token; every connection token is a child of it.
    pub shutdown: CancellationToken,
}

/// Why the read loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadEnd {
    /// The client sent a Close frame.
    ClientClosed,
    /// The inbound stream ended.
    StreamEnded,
    /// No frame arrived within the read timeout.
    TimedOut,
    /// The transport reported an error.
    TransportError,
    /// The connection was closed from the server side.
    Cancelled,
}

/// Run a WebSocket session for an authenticated user.
///
/// 1. Creates the connection and registers it (closing any older connection
///    of the same user)
/// 2. Spawns the write loop
/// 3. Runs the read loop until the client goes away or the connection closes
/// 4. Closes the connection, waits for the write loop and cleans up once
#[instrument(skip_all, fields(username = %username))]
pub async fn run_ws_session<W, R, E>(sink: W, stream: R, username: String, ctx: Arc<SessionContext>)
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (tx, rx) = mpsc::channel::<Frame>(ctx.config.queue_capacity);
    let connection = Arc::new(ClientConnection::new(username, tx, &ctx.shutdown));

    info!(conn_id = %connection.id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let _ = ctx.registry.register(connection.clone()).await;

    let writer = tokio::spawn(write_loop(
        sink,
        rx,
        connection.clone(),
        ctx.config.ping_interval,
    ));

    let end = read_loop(stream, &connection, &ctx.handler, ctx.config.read_timeout).await;

    connection.close();
    if let Err(e) = writer.await {
        warn!(error = %e, "write loop task failed");
    }
    ctx.handler.handle_disconnect(&connection).await;

    info!(conn_id = %connection.id, reason = ?end, dropped = connection.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Consume inbound frames until the link ends.
///
/// Every received frame, including Ping and Pong, refreshes the read
/// deadline. Text and UTF-8 Binary frames are dispatched to `handler`.
pub async fn read_loop<R, E>(
    mut stream: R,
    conn: &ClientConnection,
    handler: &MessageHandler,
    read_timeout: Duration,
) -> ReadEnd
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let cancel = conn.cancellation().clone();
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return ReadEnd::Cancelled,
            next = tokio::time::timeout(read_timeout, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                info!(timeout = ?read_timeout, "client unresponsive, disconnecting");
                return ReadEnd::TimedOut;
            }
            Ok(None) => return ReadEnd::StreamEnded,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "websocket read error");
                return ReadEnd::TransportError;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        let outcome = match msg {
            Message::Text(text) => handler.handle_message(conn, text.as_str()).await,
            Message::Binary(data) => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    handler.handle_message(conn, text).await
                } else {
                    debug!(len = data.len(), "received non-UTF8 binary frame");
                    counter!(WS_FRAMES_DROPPED_TOTAL, "reason" => "binary").increment(1);
                    continue;
                }
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                return ReadEnd::ClientClosed;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        trace!(?outcome, "frame handled");
    }
}

/// Drain the outbound queue to the socket and send keepalive pings.
///
/// Frames already queued when one is dequeued are written with it as a
/// single newline-separated Text message. On close the loop sends a normal
/// Close frame and discards whatever is still queued.
pub async fn write_loop<W>(
    mut sink: W,
    mut queue: mpsc::Receiver<Frame>,
    conn: Arc<ClientConnection>,
    ping_interval: Duration,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let cancel = conn.cancellation().clone();
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);

    let link_open = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break true,
            frame = queue.recv() => {
                let Some(frame) = frame else { break true };
                let text = coalesce(&frame, &mut queue);
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!(error = %e, "websocket write failed");
                    break false;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    debug!(error = %e, "websocket ping failed");
                    break false;
                }
            }
        }
    };

    conn.close();
    if link_open {
        let close = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Utf8Bytes::from_static(""),
        }));
        if let Err(e) = sink.send(close).await {
            debug!(error = %e, "failed to send close frame");
        }
    }

    queue.close();
    let mut discarded = 0usize;
    while queue.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!(discarded, "discarded queued frames on close");
    }
}

/// Join `first` with the frames already waiting behind it. Frames queued
/// while the batch is being built go into the next write.
fn coalesce(first: &Frame, queue: &mut mpsc::Receiver<Frame>) -> String {
    let mut text = String::from(&**first);
    for _ in 0..queue.len() {
        let Ok(next) = queue.try_recv() else { break };
        text.push('\n');
        text.push_str(&next);
    }
    text
}

#[cfg(test)]
mod tests {
    use chorus_core::TrackId;
    use chorus_store::{ListenerStore, MemoryIdentityDirectory, MemoryListenerStore};
    use futures::channel::mpsc as fmpsc;

    use super::*;
    use crate::websocket::gateway::ListenerGateway;

    type Inbound = Result<Message, std::io::Error>;

    fn make_context(config: SessionConfig) -> (Arc<SessionContext>, Arc<MemoryListenerStore>) {
        let store = Arc::new(MemoryListenerStore::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = Arc::new(ListenerGateway::new(store.clone(), registry.clone()));
        let handler = Arc::new(MessageHandler::new(
            gateway,
            Arc::new(MemoryIdentityDirectory::new()),
            registry.clone(),
        ));
        let ctx = Arc::new(SessionContext {
            registry,
            handler,
            config,
            shutdown: CancellationToken::new(),
        });
        (ctx, store)
    }

    fn make_connection(capacity: usize) -> (Arc<ClientConnection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new("alice".into(), tx, &CancellationToken::new());
        (Arc::new(conn), rx)
    }

    fn text(s: &str) -> Inbound {
        Ok(Message::Text(s.to_owned().into()))
    }

    #[tokio::test]
    async fn queued_frames_are_coalesced() {
        let (conn, rx) = make_connection(8);
        for f in ["a", "b", "c"] {
            assert!(conn.send(Frame::from(f)));
        }
        let (sink, mut out) = fmpsc::unbounded::<Message>();
        let writer = tokio::spawn(write_loop(sink, rx, conn.clone(), Duration::from_secs(30)));

        let Some(Message::Text(t)) = out.next().await else {
            panic!("expected a text message");
        };
        assert_eq!(t.as_str(), "a\nb\nc");

        conn.close();
        writer.await.unwrap();
    }

    #[test]
    fn batch_is_bounded_by_queue_length() {
        let (tx, mut rx) = mpsc::channel::<Frame>(8);
        for f in ["a", "b", "c"] {
            tx.try_send(Frame::from(f)).unwrap();
        }
        let first = rx.try_recv().unwrap();
        assert_eq!(rx.len(), 2);
        assert_eq!(coalesce(&first, &mut rx), "a\nb\nc");
        assert!(rx.is_empty());

        tx.try_send(Frame::from("d")).unwrap();
        let first = rx.try_recv().unwrap();
        assert_eq!(coalesce(&first, &mut rx), "d");
    }

    #[tokio::test(start_paused = true)]
    async fn pings_on_interval() {
        let (conn, rx) = make_connection(8);
        let (sink, mut out) = fmpsc::unbounded::<Message>();
        let writer = tokio::spawn(write_loop(sink, rx, conn.clone(), Duration::from_secs(30)));

        assert!(matches!(out.next().await, Some(Message::Ping(_))));
        assert!(matches!(out.next().await, Some(Message::Ping(_))));

        conn.close();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn close_sends_normal_close_and_discards_queue() {
        let (conn, rx) = make_connection(8);
        conn.close();
        assert!(!conn.send(Frame::from("late")));

        let (sink, mut out) = fmpsc::unbounded::<Message>();
        write_loop(sink, rx, conn.clone(), Duration::from_secs(30)).await;

        let Some(Message::Close(Some(frame))) = out.next().await else {
            panic!("expected a close frame");
        };
        assert_eq!(frame.code, close_code::NORMAL);
        assert!(out.next().await.is_none());
    }

    #[tokio::test]
    async fn write_failure_closes_connection() {
        let (conn, rx) = make_connection(8);
        let (sink, out) = fmpsc::unbounded::<Message>();
        drop(out);
        assert!(conn.send(Frame::from("x")));

        write_loop(sink, rx, conn.clone(), Duration::from_secs(30)).await;
        assert!(!conn.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn read_deadline_expires() {
        let (ctx, _store) = make_context(SessionConfig::default());
        let (conn, _rx) = make_connection(8);
        let (_tx, stream) = fmpsc::unbounded::<Inbound>();

        let end = read_loop(stream, &conn, &ctx.handler, Duration::from_secs(60)).await;
        assert_eq!(end, ReadEnd::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_refreshes_deadline() {
        let (ctx, _store) = make_context(SessionConfig::default());
        let (conn, _rx) = make_connection(8);
        let (tx, stream) = fmpsc::unbounded::<Inbound>();

        let feeder = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_secs(40)).await;
                tx.unbounded_send(Ok(Message::Pong(Bytes::new()))).unwrap();
            }
            tx
        });

        let start = tokio::time::Instant::now();
        let end = read_loop(stream, &conn, &ctx.handler, Duration::from_secs(60)).await;
        assert_eq!(end, ReadEnd::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(180));
        drop(feeder.await.unwrap());
    }

    #[tokio::test]
    async fn read_loop_dispatches_text_and_binary() {
        let (ctx, store) = make_context(SessionConfig::default());
        let (conn, _rx) = make_connection(8);
        let (tx, stream) = fmpsc::unbounded::<Inbound>();

        tx.unbounded_send(text(r#"{"t":"join_session","p":{"track_id":7,"position":1.5}}"#))
            .unwrap();
        tx.unbounded_send(Ok(Message::Binary(
            br#"{"t":"seek","p":{"position":9.0}}"#.to_vec().into(),
        )))
        .unwrap();
        tx.unbounded_send(Ok(Message::Binary(vec![0xff_u8, 0xfe].into())))
            .unwrap();
        tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        let end = read_loop(stream, &conn, &ctx.handler, Duration::from_secs(60)).await;
        assert_eq!(end, ReadEnd::ClientClosed);
        assert_eq!(conn.track_id(), Some(TrackId::new(7)));
        let alice = store.currently_listening("alice").await.unwrap().unwrap();
        assert!((alice.position - 9.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn read_loop_stops_on_close() {
        let (ctx, _store) = make_context(SessionConfig::default());
        let (conn, _rx) = make_connection(8);
        let (_tx, stream) = fmpsc::unbounded::<Inbound>();
        conn.close();

        let end = read_loop(stream, &conn, &ctx.handler, Duration::from_secs(60)).await;
        assert_eq!(end, ReadEnd::Cancelled);
    }

    #[tokio::test]
    async fn session_cleans_up_on_disconnect() {
        let (ctx, store) = make_context(SessionConfig::default());
        let (sink, _out) = fmpsc::unbounded::<Message>();
        let (tx, stream) = fmpsc::unbounded::<Inbound>();

        tx.unbounded_send(text(r#"{"t":"join_session","p":{"track_id":7}}"#))
            .unwrap();
        drop(tx);

        run_ws_session(sink, stream, "alice".into(), ctx.clone()).await;

        assert_eq!(ctx.registry.connection_count().await, 0);
        assert!(store.currently_listening("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shutdown_closes_session() {
        let (ctx, _store) = make_context(SessionConfig::default());
        let (sink, mut out) = fmpsc::unbounded::<Message>();
        let (_tx, stream) = fmpsc::unbounded::<Inbound>();

        let session = tokio::spawn(run_ws_session(sink, stream, "alice".into(), ctx.clone()));
        while ctx.registry.connection_count().await == 0 {
            tokio::task::yield_now().await;
        }
        ctx.shutdown.cancel();
        session.await.unwrap();

        assert!(matches!(out.next().await, Some(Message::Close(_))));
        assert_eq!(ctx.registry.connection_count().await, 0);
    }
}
