//! The handshake + dispatch state machine that drives one server connection
//! end to end (spec.md §4.3): negotiates `connection_init`, then multiplexes
//! any number of concurrent operations onto the transport's single outbound
//! writer until the connection closes.
//!
//! Grounded directly on `juniper_graphql_ws::graphql_transport_ws`'s
//! `ConnectionState`/`Connection`: the same `stoppers: HashMap<String,
//! oneshot::Sender<()>>` cancellation map, the same duplicate-id and
//! in-flight-limit checks, and the same trick of modeling keepalive pongs as
//! just another reaction stream fed into a `SelectAll`. Unlike the teacher,
//! this owns the transport directly instead of exposing itself as a
//! `Sink`/`Stream` pair for a web framework to forward into — `Transport` is
//! already this crate's framework-agnostic boundary, so there is nothing left
//! to bridge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use futures::{future, SinkExt};

use crate::close;
use crate::engine::{Engine, GraphqlFormattedError};
use crate::message::{self, ClientMessage, ServerMessage};
use crate::server::config::{ConnectionConfig, OnCompleteHook, OnConnect, ServerConfig};
use crate::server::operation::{self, OperationEvent};
use crate::transport::{CloseEvent, InboundFrame, OutboundFrame, Transport};

/// Drives `transport` until the connection closes: runs the `connection_init`
/// handshake (subject to `config.connection_init_wait_timeout`), then
/// dispatches `subscribe`/`complete`/`ping`/`pong` messages against
/// `config.engine` for as long as the transport stays open.
///
/// Returns the [`CloseEvent`] describing how the connection ended — useful
/// for logging, never required by the protocol itself.
#[tracing::instrument(skip_all)]
pub async fn serve<E, T, C>(transport: T, config: ServerConfig<E>, on_connect: C) -> CloseEvent
where
    E: Engine,
    T: Transport,
    C: OnConnect<E::Context>,
{
    let (mut tx, mut rx) = transport.split();

    let connection_config = match handshake::<T, E::Context, C>(
        &mut tx,
        &mut rx,
        config.connection_init_wait_timeout,
        on_connect,
    )
    .await
    {
        Ok(connection_config) => {
            tracing::debug!("handshake accepted, connection ready");
            Arc::new(connection_config)
        }
        Err(event) => {
            tracing::warn!(code = event.code, reason = %event.reason, "handshake rejected");
            return event;
        }
    };

    let mut stoppers: HashMap<String, oneshot::Sender<()>> = HashMap::new();
    let mut reactions: SelectAll<BoxStream<'static, ServerMessage>> = SelectAll::new();

    reactions.push(stream::once(future::ready(ServerMessage::ConnectionAck { payload: None })).boxed());
    if connection_config.keep_alive_interval > Duration::ZERO {
        reactions.push(keep_alive_stream(connection_config.keep_alive_interval));
    }

    loop {
        tokio::select! {
            frame = rx.next() => {
                match frame {
                    Some(Ok(InboundFrame::Text(text))) => match message::decode_client_message(&text) {
                        Ok(msg) => {
                            if let Some(event) =
                                dispatch(msg, &config.engine, &connection_config, &mut stoppers, &mut reactions)
                            {
                                tracing::warn!(code = event.code, reason = %event.reason, "protocol violation, closing connection");
                                close_with::<T>(&mut tx, &event).await;
                                return event;
                            }
                        }
                        Err(e) => {
                            let event = CloseEvent {
                                code: close::BAD_REQUEST,
                                reason: e.to_string(),
                                was_clean: true,
                            };
                            tracing::warn!(reason = %event.reason, "malformed message, closing connection");
                            close_with::<T>(&mut tx, &event).await;
                            return event;
                        }
                    },
                    Some(Ok(InboundFrame::Closed(event))) => {
                        tracing::debug!(code = event.code, "peer closed connection");
                        return event;
                    }
                    Some(Err(_)) | None => return CloseEvent::abnormal(),
                }
            }
            Some(message) = reactions.next(), if !reactions.is_empty() => {
                if tx
                    .send(OutboundFrame::text(message::encode_server_message(&message)))
                    .await
                    .is_err()
                {
                    return CloseEvent::abnormal();
                }
            }
        }
    }
}

/// Waits for an accepted `connection_init`, or closes the connection and
/// returns the [`CloseEvent`] that explains why one never arrived.
async fn handshake<T, CtxT, C>(
    tx: &mut T::Sink,
    rx: &mut T::Stream,
    wait_timeout: Duration,
    on_connect: C,
) -> Result<ConnectionConfig<CtxT>, CloseEvent>
where
    T: Transport,
    C: OnConnect<CtxT>,
{
    let sleep = tokio::time::sleep(wait_timeout);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => {
                let event = CloseEvent {
                    code: close::CONNECTION_INITIALISATION_TIMEOUT,
                    reason: "connection initialisation timeout".into(),
                    was_clean: true,
                };
                close_with::<T>(tx, &event).await;
                return Err(event);
            }
            frame = rx.next() => {
                match frame {
                    Some(Ok(InboundFrame::Text(text))) => match message::decode_client_message(&text) {
                        Ok(ClientMessage::ConnectionInit { payload }) => {
                            return match on_connect.call(payload).await {
                                Ok(connection_config) => Ok(connection_config),
                                Err(e) => {
                                    let event = CloseEvent {
                                        code: close::FORBIDDEN,
                                        reason: e.to_string(),
                                        was_clean: true,
                                    };
                                    close_with::<T>(tx, &event).await;
                                    Err(event)
                                }
                            };
                        }
                        Ok(ClientMessage::Ping { .. }) => {
                            let _ = tx
                                .send(OutboundFrame::text(message::encode_server_message(
                                    &ServerMessage::Pong { payload: None },
                                )))
                                .await;
                        }
                        Ok(ClientMessage::Subscribe { .. }) => {
                            let event = CloseEvent {
                                code: close::UNAUTHORIZED,
                                reason: "Unauthorized".into(),
                                was_clean: true,
                            };
                            close_with::<T>(tx, &event).await;
                            return Err(event);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let event = CloseEvent {
                                code: close::BAD_REQUEST,
                                reason: e.to_string(),
                                was_clean: true,
                            };
                            close_with::<T>(tx, &event).await;
                            return Err(event);
                        }
                    },
                    Some(Ok(InboundFrame::Closed(event))) => return Err(event),
                    Some(Err(_)) | None => return Err(CloseEvent::abnormal()),
                }
            }
        }
    }
}

/// Applies one accepted client message against `stoppers`/`reactions`.
/// Returns `Some` only when the message forces the connection closed.
fn dispatch<E: Engine>(
    msg: ClientMessage,
    engine: &E,
    connection_config: &Arc<ConnectionConfig<E::Context>>,
    stoppers: &mut HashMap<String, oneshot::Sender<()>>,
    reactions: &mut SelectAll<BoxStream<'static, ServerMessage>>,
) -> Option<CloseEvent> {
    match msg {
        ClientMessage::ConnectionInit { .. } => Some(CloseEvent {
            code: close::TOO_MANY_INITIALISATION_REQUESTS,
            reason: "too many initialisation requests".into(),
            was_clean: true,
        }),
        ClientMessage::Subscribe { id, payload } => {
            // Prune stoppers whose operation already finished on its own
            // before the duplicate-id check and the in-flight limit, so a
            // naturally-completed id is free to reuse (spec.md §8 property
            // 6: "reusing an id after its terminal is permitted").
            stoppers.retain(|_, tx| !tx.is_canceled());

            if stoppers.contains_key(&id) {
                return Some(CloseEvent {
                    code: close::SUBSCRIBER_ALREADY_EXISTS,
                    reason: format!("Subscriber for {id} already exists"),
                    was_clean: true,
                });
            }

            if connection_config.max_in_flight_operations > 0
                && stoppers.len() >= connection_config.max_in_flight_operations
            {
                reactions.push(
                    stream::iter(vec![
                        ServerMessage::Error {
                            id: id.clone(),
                            payload: vec![GraphqlFormattedError::from_message(
                                "Too many in-flight operations.",
                            )],
                        },
                        ServerMessage::Complete { id },
                    ])
                    .boxed(),
                );
                return None;
            }

            let (stop_tx, stop_rx) = oneshot::channel();
            stoppers.insert(id.clone(), stop_tx);

            tracing::debug!(%id, "operation started");
            let events = operation::start(engine.clone(), payload, connection_config.clone());
            reactions.push(operation_messages(id, events, stop_rx, connection_config.on_complete.clone()));
            None
        }
        ClientMessage::Complete { id } => {
            // Dropping the stopper fires the oneshot, which is what actually
            // tells `operation_messages` to stop; no reply is sent back.
            if stoppers.remove(&id).is_some() {
                tracing::debug!(%id, "operation cancelled by peer");
            }
            None
        }
        ClientMessage::Ping { .. } => {
            reactions.push(stream::once(future::ready(ServerMessage::Pong { payload: None })).boxed());
            None
        }
        ClientMessage::Pong { .. } => None,
    }
}

/// Tags an operation's events with `id`, appends the terminal `complete`
/// once the stream ends on its own, and stops early — without a trailing
/// `complete` — the moment `stop` fires. Invokes `on_complete` exactly once,
/// however the operation ends (natural completion, error, or cancellation
/// via `stop`).
fn operation_messages(
    id: String,
    events: BoxStream<'static, OperationEvent>,
    stop: oneshot::Receiver<()>,
    on_complete: Option<OnCompleteHook>,
) -> BoxStream<'static, ServerMessage> {
    enum State {
        Running(BoxStream<'static, OperationEvent>, oneshot::Receiver<()>),
        Done,
    }

    stream::unfold((State::Running(events, stop), on_complete), move |(state, on_complete)| {
        let id = id.clone();
        async move {
            match state {
                State::Running(mut events, mut stop) => {
                    tokio::select! {
                        biased;
                        _ = &mut stop => {
                            tracing::debug!(%id, "operation cancelled");
                            if let Some(hook) = &on_complete {
                                hook(&id);
                            }
                            None
                        }
                        next = events.next() => match next {
                            Some(OperationEvent::Next(result)) => Some((
                                ServerMessage::Next { id, payload: result.into() },
                                (State::Running(events, stop), on_complete),
                            )),
                            Some(OperationEvent::Error(errors)) => {
                                tracing::debug!(%id, "operation stopped with error");
                                if let Some(hook) = &on_complete {
                                    hook(&id);
                                }
                                Some((ServerMessage::Error { id, payload: errors }, (State::Done, on_complete)))
                            }
                            None => {
                                tracing::debug!(%id, "operation completed");
                                if let Some(hook) = &on_complete {
                                    hook(&id);
                                }
                                Some((ServerMessage::Complete { id }, (State::Done, on_complete)))
                            }
                        },
                    }
                }
                State::Done => None,
            }
        }
    })
    .boxed()
}

/// An immediate pong followed by one every `interval`, matching the teacher's
/// "unsolicited keepalive pongs" behavior rather than the legacy protocol's
/// server-initiated pings.
fn keep_alive_stream(interval: Duration) -> BoxStream<'static, ServerMessage> {
    stream::once(future::ready(()))
        .chain(stream::unfold((), move |()| async move {
            tokio::time::sleep(interval).await;
            Some(((), ()))
        }))
        .map(|()| ServerMessage::Pong { payload: None })
        .boxed()
}

async fn close_with<T: Transport>(tx: &mut T::Sink, event: &CloseEvent) {
    let _ = tx
        .send(OutboundFrame::Close {
            code: event.code,
            reason: event.reason.clone(),
        })
        .await;
}
