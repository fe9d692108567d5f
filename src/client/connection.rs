//! The client connection actor: lazy connect, handshake, retry with
//! backoff, and message dispatch (spec.md §4.5).
//!
//! Grounded on `WishKnish-KnishIO-Client-Rust`'s `WebSocketManager`: a
//! command channel drives a background task that owns the connection state
//! machine, reconnects with exponential backoff, and resubscribes
//! operations that opted in. Unlike that reference, the command channel and
//! the public [`Client`] handle are not generic over the transport — only
//! [`Client::new`] is, so embedders never need to name the connector type
//! after construction.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::close;
use crate::engine::ExecutionResult;
use crate::id::{generate_unique, IdGenerator};
use crate::message::{self, ClientMessage, ServerMessage, SubscribePayload};
use crate::transport::{CloseEvent, InboundFrame, OutboundFrame, Transport};

use super::config::{ClientConfig, Connector};
use super::subscription::{SinkError, Subscription, SubscriptionSink};

/// A handle to a running client connection actor.
///
/// Cloning shares the same background task and operation registry; the
/// actor shuts down once every clone has been dropped.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    active_ids: Arc<Mutex<HashSet<String>>>,
    id_generator: Arc<dyn IdGenerator>,
}

impl Client {
    /// Builds a client from `config` and spawns its connection actor.
    ///
    /// If `config.lazy` is `false` the actor starts dialing immediately;
    /// otherwise it waits for the first [`Client::subscribe`] call.
    pub fn new<C: Connector>(config: ClientConfig<C>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let active_ids = Arc::new(Mutex::new(HashSet::new()));
        let id_generator = config.id_generator.clone();
        let actor_active_ids = active_ids.clone();
        tokio::spawn(run_actor(Arc::new(config), commands_rx, actor_active_ids));
        Self {
            commands: commands_tx,
            active_ids,
            id_generator,
        }
    }

    /// Subscribes `sink` to `payload`'s results. The returned
    /// [`Subscription`]'s id is allocated immediately and is valid to read
    /// even though the connection may not exist yet.
    ///
    /// The operation does not resubscribe under a new id after a retried
    /// connection drop; use [`Client::subscribe_with_retry`] for that.
    pub fn subscribe(&self, payload: SubscribePayload, sink: SubscriptionSink) -> Subscription {
        self.subscribe_inner(payload, sink, false)
    }

    /// Like [`Client::subscribe`], but the operation is resent with a fresh
    /// id if the connection drops and a retry succeeds (spec.md §4.5:
    /// "operations that opted into resubscription").
    pub fn subscribe_with_retry(&self, payload: SubscribePayload, sink: SubscriptionSink) -> Subscription {
        self.subscribe_inner(payload, sink, true)
    }

    fn subscribe_inner(&self, payload: SubscribePayload, sink: SubscriptionSink, retry: bool) -> Subscription {
        let id = {
            let mut active = self.active_ids.lock().unwrap();
            let id = generate_unique(self.id_generator.as_ref(), &active);
            active.insert(id.clone());
            id
        };
        let _ = self.commands.send(Command::Subscribe {
            id: id.clone(),
            payload,
            sink,
            retry,
        });
        Subscription::new(id, self.commands.clone())
    }
}

pub(super) enum Command {
    Subscribe {
        id: String,
        payload: SubscribePayload,
        sink: SubscriptionSink,
        retry: bool,
    },
    Unsubscribe {
        id: String,
    },
}

struct Operation {
    payload: SubscribePayload,
    sink: SubscriptionSink,
    retry: bool,
    dispatched: bool,
}

enum Phase {
    Disconnected,
    Connecting,
    Reconnecting(Duration),
}

async fn run_actor<C: Connector>(
    config: Arc<ClientConfig<C>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    active_ids: Arc<Mutex<HashSet<String>>>,
) {
    let mut operations: HashMap<String, Operation> = HashMap::new();
    let mut phase = if config.lazy {
        Phase::Disconnected
    } else {
        Phase::Connecting
    };
    let mut attempt: u32 = 0;

    loop {
        phase = match phase {
            Phase::Disconnected => match commands.recv().await {
                None => return,
                Some(cmd) => {
                    apply_command(cmd, &mut operations, &active_ids);
                    Phase::Connecting
                }
            },
            Phase::Connecting => {
                match connect_and_run(&config, &mut commands, &mut operations, &active_ids).await {
                    None => return,
                    Some(event) => {
                        match after_episode(&config, event, &mut attempt, &mut operations, &active_ids) {
                            Some(wait) => Phase::Reconnecting(wait),
                            None => Phase::Disconnected,
                        }
                    }
                }
            }
            Phase::Reconnecting(wait) => {
                let sleep = tokio::time::sleep(wait);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        () = &mut sleep => break,
                        cmd = commands.recv() => match cmd {
                            None => return,
                            Some(cmd) => apply_command(cmd, &mut operations, &active_ids),
                        },
                    }
                }
                Phase::Connecting
            }
        };
    }
}

fn apply_command(cmd: Command, operations: &mut HashMap<String, Operation>, active_ids: &Mutex<HashSet<String>>) {
    match cmd {
        Command::Subscribe { id, payload, sink, retry } => {
            operations.insert(id, Operation { payload, sink, retry, dispatched: false });
        }
        Command::Unsubscribe { id } => {
            if operations.remove(&id).is_some() {
                active_ids.lock().unwrap().remove(&id);
            }
        }
    }
}

/// Decides what happens to the operations left over from an ended
/// connection episode. Returns the backoff to wait before reconnecting, or
/// `None` if the actor should go idle instead.
fn after_episode<C: Connector>(
    config: &ClientConfig<C>,
    event: CloseEvent,
    attempt: &mut u32,
    operations: &mut HashMap<String, Operation>,
    active_ids: &Mutex<HashSet<String>>,
) -> Option<Duration> {
    config.events.closed(&event);
    tracing::debug!(code = event.code, reason = %event.reason, "connection closed");
    let retryable = (config.should_retry)(&event) && *attempt < config.retry_attempts;

    if !retryable {
        error_out_all(operations, active_ids, &event);
        *attempt = 0;
        return None;
    }

    let abandoning: Vec<String> = operations
        .iter()
        .filter(|(_, op)| !op.retry)
        .map(|(id, _)| id.clone())
        .collect();
    for id in abandoning {
        if let Some(operation) = operations.remove(&id) {
            active_ids.lock().unwrap().remove(&id);
            operation.sink.emit_error(SinkError::Closed(event.clone()));
        }
    }

    if operations.is_empty() {
        *attempt = 0;
        return None;
    }

    let survivors: Vec<Operation> = operations
        .drain()
        .map(|(id, mut op)| {
            active_ids.lock().unwrap().remove(&id);
            op.dispatched = false;
            op
        })
        .collect();
    {
        let mut active = active_ids.lock().unwrap();
        for operation in survivors {
            let id = generate_unique(config.id_generator.as_ref(), &active);
            active.insert(id.clone());
            operations.insert(id, operation);
        }
    }

    let wait = (config.retry_wait)(*attempt);
    *attempt += 1;
    Some(wait)
}

fn error_out_all(operations: &mut HashMap<String, Operation>, active_ids: &Mutex<HashSet<String>>, event: &CloseEvent) {
    for (id, operation) in operations.drain() {
        active_ids.lock().unwrap().remove(&id);
        operation.sink.emit_error(SinkError::Closed(event.clone()));
    }
}

/// Dials one connection, runs its handshake, and — on success — dispatches
/// operations until the connection ends. Returns `None` only when the
/// command channel closed entirely (every [`Client`] handle was dropped).
async fn connect_and_run<C: Connector>(
    config: &Arc<ClientConfig<C>>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    operations: &mut HashMap<String, Operation>,
    active_ids: &Mutex<HashSet<String>>,
) -> Option<CloseEvent> {
    config.events.connecting();
    tracing::debug!("connecting");
    let transport = match config.connector.connect().await {
        Ok(transport) => transport,
        Err(_) => return Some(CloseEvent::abnormal()),
    };
    let (mut tx, mut rx) = transport.split();

    let init = ClientMessage::ConnectionInit {
        payload: config.connection_params.resolve(),
    };
    if tx
        .send(OutboundFrame::text(message::encode_client_message(&init)))
        .await
        .is_err()
    {
        return Some(CloseEvent::abnormal());
    }

    let deadline = tokio::time::sleep(config.connection_ack_wait_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                return Some(CloseEvent {
                    code: close::BAD_REQUEST,
                    reason: "connection_ack wait timeout".into(),
                    was_clean: true,
                });
            }
            frame = rx.next() => {
                match frame {
                    Some(Ok(InboundFrame::Text(text))) => match message::decode_server_message(&text) {
                        Ok(ServerMessage::ConnectionAck { .. }) => {
                            config.events.connected();
                            tracing::debug!("connected");
                            break;
                        }
                        Ok(_) => {
                            return Some(CloseEvent {
                                code: close::BAD_REQUEST,
                                reason: "expected connection_ack".into(),
                                was_clean: true,
                            });
                        }
                        Err(e) => {
                            return Some(CloseEvent { code: close::BAD_REQUEST, reason: e.to_string(), was_clean: true });
                        }
                    },
                    Some(Ok(InboundFrame::Closed(event))) => return Some(event),
                    Some(Err(_)) | None => return Some(CloseEvent::abnormal()),
                }
            }
            cmd = commands.recv() => match cmd {
                None => return None,
                Some(cmd) => apply_command(cmd, operations, active_ids),
            }
        }
    }

    ready_loop(tx, rx, config, commands, operations, active_ids).await
}

/// Runs the free-form dispatch phase of one connection: flushes any
/// queued-but-undispatched `subscribe`s, then routes inbound messages to
/// sinks and outbound commands to the wire until the transport ends.
async fn ready_loop<C: Connector>(
    mut tx: <C::Transport as Transport>::Sink,
    mut rx: <C::Transport as Transport>::Stream,
    config: &Arc<ClientConfig<C>>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    operations: &mut HashMap<String, Operation>,
    active_ids: &Mutex<HashSet<String>>,
) -> Option<CloseEvent> {
    for (id, operation) in operations.iter_mut() {
        if !operation.dispatched {
            let msg = ClientMessage::Subscribe {
                id: id.clone(),
                payload: operation.payload.clone(),
            };
            if tx.send(OutboundFrame::text(message::encode_client_message(&msg))).await.is_err() {
                return Some(CloseEvent::abnormal());
            }
            operation.dispatched = true;
        }
    }

    let mut keep_alive = (config.keep_alive_interval > Duration::ZERO)
        .then(|| tokio::time::interval(config.keep_alive_interval));

    loop {
        tokio::select! {
            frame = rx.next() => {
                match frame {
                    Some(Ok(InboundFrame::Text(text))) => match message::decode_server_message(&text) {
                        Ok(msg) => {
                            config.events.message(&msg);
                            match msg {
                                ServerMessage::Next { id, payload } => {
                                    if let Some(operation) = operations.get(&id) {
                                        operation.sink.emit_next(ExecutionResult {
                                            data: payload.data,
                                            errors: payload.errors,
                                            extensions: payload.extensions,
                                        });
                                    }
                                }
                                ServerMessage::Error { id, payload } => {
                                    if let Some(operation) = operations.remove(&id) {
                                        active_ids.lock().unwrap().remove(&id);
                                        operation.sink.emit_error(SinkError::Graphql(payload));
                                    }
                                }
                                ServerMessage::Complete { id } => {
                                    if let Some(operation) = operations.remove(&id) {
                                        active_ids.lock().unwrap().remove(&id);
                                        operation.sink.emit_complete();
                                    }
                                }
                                ServerMessage::Ping { .. } => {
                                    let pong = ClientMessage::Pong { payload: Value::Null };
                                    let _ = tx.send(OutboundFrame::text(message::encode_client_message(&pong))).await;
                                }
                                ServerMessage::Pong { .. } | ServerMessage::ConnectionAck { .. } => {}
                            }
                        }
                        Err(e) => {
                            return Some(CloseEvent { code: close::BAD_REQUEST, reason: e.to_string(), was_clean: true });
                        }
                    },
                    Some(Ok(InboundFrame::Closed(event))) => return Some(event),
                    Some(Err(_)) | None => return Some(CloseEvent::abnormal()),
                }
            }
            cmd = commands.recv() => match cmd {
                None => return None,
                Some(Command::Subscribe { id, payload, sink, retry }) => {
                    let msg = ClientMessage::Subscribe { id: id.clone(), payload: payload.clone() };
                    if tx.send(OutboundFrame::text(message::encode_client_message(&msg))).await.is_err() {
                        return Some(CloseEvent::abnormal());
                    }
                    operations.insert(id, Operation { payload, sink, retry, dispatched: true });
                }
                Some(Command::Unsubscribe { id }) => {
                    if operations.remove(&id).is_some() {
                        active_ids.lock().unwrap().remove(&id);
                        let msg = ClientMessage::Complete { id };
                        let _ = tx.send(OutboundFrame::text(message::encode_client_message(&msg))).await;
                    }
                }
            },
            _ = async {
                keep_alive.as_mut().unwrap().tick().await;
            }, if keep_alive.is_some() => {
                let ping = ClientMessage::Ping { payload: Value::Null };
                if tx.send(OutboundFrame::text(message::encode_client_message(&ping))).await.is_err() {
                    return Some(CloseEvent::abnormal());
                }
            }
        }

        if config.lazy && operations.is_empty() {
            return Some(CloseEvent {
                code: close::NORMAL,
                reason: "idle, lazily disconnecting".into(),
                was_clean: true,
            });
        }
    }
}

#[cfg(test)]
mod test {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use futures::channel::mpsc as fmpsc;
    use futures::{Sink, Stream};
    use serde_json::json;

    use super::*;
    use crate::message::SubscribePayload;

    struct ChannelTransport {
        outbound: fmpsc::UnboundedSender<OutboundFrame>,
        inbound: fmpsc::UnboundedReceiver<Result<InboundFrame, std::convert::Infallible>>,
    }
    struct ChannelSink(fmpsc::UnboundedSender<OutboundFrame>);
    struct ChannelStream(fmpsc::UnboundedReceiver<Result<InboundFrame, std::convert::Infallible>>);

    impl Sink<OutboundFrame> for ChannelSink {
        type Error = std::convert::Infallible;
        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn start_send(self: Pin<&mut Self>, item: OutboundFrame) -> Result<(), Self::Error> {
            let _ = self.0.unbounded_send(item);
            Ok(())
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }
    impl Stream for ChannelStream {
        type Item = Result<InboundFrame, std::convert::Infallible>;
        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.0).poll_next(cx)
        }
    }
    impl Transport for ChannelTransport {
        type Error = std::convert::Infallible;
        type Sink = ChannelSink;
        type Stream = ChannelStream;
        fn split(self) -> (Self::Sink, Self::Stream) {
            (ChannelSink(self.outbound), ChannelStream(self.inbound))
        }
    }

    /// A [`Connector`] that serves pre-scripted transports one at a time,
    /// so reconnect behavior is deterministic under test.
    struct ScriptedConnector {
        server_tx: fmpsc::UnboundedSender<OutboundFrame>,
        server_rx: Mutex<Option<fmpsc::UnboundedReceiver<Result<InboundFrame, std::convert::Infallible>>>>,
        attempts: AtomicUsize,
    }

    /// Wires up one scripted connection attempt: a channel pair standing in
    /// for the wire, returned as (the connector `Client::new` dials,
    /// a sender for frames arriving "from the server", a receiver for
    /// frames the client under test sends "to the server").
    fn scripted_pair() -> (
        Arc<ScriptedConnector>,
        fmpsc::UnboundedSender<Result<InboundFrame, std::convert::Infallible>>,
        fmpsc::UnboundedReceiver<OutboundFrame>,
    ) {
        let (client_to_server_tx, client_to_server_rx) = fmpsc::unbounded();
        let (server_to_client_tx, server_to_client_rx) = fmpsc::unbounded();
        let connector = Arc::new(ScriptedConnector {
            server_tx: server_to_client_tx,
            server_rx: Mutex::new(Some(client_to_server_rx)),
            attempts: AtomicUsize::new(0),
        });
        (connector, client_to_server_tx, server_to_client_rx)
    }

    impl Connector for ScriptedConnector {
        type Transport = ChannelTransport;
        type Error = std::io::Error;

        fn connect(&self) -> futures::future::BoxFuture<'static, Result<ChannelTransport, Self::Error>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let inbound = self.server_rx.lock().unwrap().take();
            let outbound = self.server_tx.clone();
            Box::pin(async move {
                match inbound {
                    Some(inbound) => Ok(ChannelTransport { outbound, inbound }),
                    None => Err(std::io::Error::new(std::io::ErrorKind::Other, "already connected")),
                }
            })
        }
    }

    #[tokio::test]
    async fn subscribe_before_connect_allocates_an_id_immediately() {
        let (connector, _client_tx, mut from_client) = scripted_pair();
        let client = Client::new(ClientConfig::new(connector));

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let sink = SubscriptionSink::new(
            move |result| received_clone.lock().unwrap().push(result),
            |_| {},
            || {},
        );
        let subscription = client.subscribe(
            SubscribePayload {
                query: "{ hello }".into(),
                variables: json!({}),
                operation_name: None,
                extensions: json!(null),
            },
            sink,
        );
        assert_eq!(subscription.id().len(), 36);

        let init = from_client.next().await.unwrap();
        assert_eq!(init, OutboundFrame::text(r#"{"type":"connection_init","payload":null}"#));
    }

    #[tokio::test]
    async fn connecting_and_connected_hooks_fire_in_order() {
        let (connector, from_server, mut from_client) = scripted_pair();
        let connecting = Arc::new(AtomicUsize::new(0));
        let connected = Arc::new(AtomicUsize::new(0));
        let (connecting_clone, connected_clone) = (connecting.clone(), connected.clone());
        let config = ClientConfig::new(connector).with_events(crate::client::ClientEvents {
            on_connecting: Some(Arc::new(move || {
                connecting_clone.fetch_add(1, Ordering::SeqCst);
            })),
            on_connected: Some(Arc::new(move || {
                connected_clone.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        });
        let client = Client::new(config);

        let sink = SubscriptionSink::new(|_| {}, |_| {}, || {});
        let _subscription = client.subscribe(
            SubscribePayload {
                query: "{ hello }".into(),
                variables: json!({}),
                operation_name: None,
                extensions: json!(null),
            },
            sink,
        );

        // Drains the `connection_init` the actor sends once it dials.
        let _ = from_client.next().await.unwrap();
        assert_eq!(connecting.load(Ordering::SeqCst), 1);
        assert_eq!(connected.load(Ordering::SeqCst), 0);

        from_server
            .unbounded_send(Ok(InboundFrame::Text(message::encode_server_message(
                &ServerMessage::ConnectionAck { payload: None },
            ))))
            .unwrap();

        tokio::time::timeout(Duration::from_millis(200), async {
            while connected.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("on_connected never fired");
    }

    #[test]
    fn id_allocation_detects_collisions_against_active_ids() {
        let active: HashSet<String> = ["a".to_string()].into_iter().collect();
        let calls = std::cell::Cell::new(0);
        let generator = move || {
            let n = calls.get();
            calls.set(n + 1);
            if n == 0 { "a".to_string() } else { "b".to_string() }
        };
        assert_eq!(generate_unique(&generator, &active), "b");
    }
}
