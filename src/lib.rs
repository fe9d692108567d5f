/*!

# graphql-transport-ws

An implementation of the [`graphql-transport-ws`][1] subprotocol: a
bidirectional protocol for multiplexing GraphQL queries, mutations, and
subscriptions over a single WebSocket connection.

This crate owns the protocol's "hard part" — the message codec, the
handshake, the operation registry, and the retry/keepalive policy — and
treats both the GraphQL engine that resolves operations and the raw
WebSocket transport as external collaborators, reached only through the
[`engine::Engine`] and [`transport::Transport`] traits. Neither trait names a
concrete GraphQL library or WebSocket crate, so this crate can sit in front
of whatever an embedder already uses for either.

## Server

[`server::serve`] drives one connection end to end: it waits for
`connection_init` (subject to
[`ServerConfig::connection_init_wait_timeout`](server::ServerConfig)), runs
the caller-supplied [`server::OnConnect`] hook to accept or reject the
handshake, then dispatches `subscribe`/`complete`/`ping`/`pong` messages
against an [`engine::Engine`] until the transport closes.

## Client

[`client::Client`] is the consumer side: it connects lazily on the first
subscription, retries a dropped connection with backoff, and exposes each
active operation as a [`client::Subscription`] that can be polled as a
`Stream` and unsubscribed from independently of the underlying connection's
lifetime.

[1]: https://github.com/enisdenjo/graphql-ws/blob/master/PROTOCOL.md

*/

#![warn(missing_docs)]

pub mod client;
pub mod close;
pub mod engine;
pub mod id;
pub mod message;
pub mod server;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
