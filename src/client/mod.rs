//! Client-side half of the protocol: lazy connect, handshake, retry with
//! backoff, and a per-operation subscription API for local callers
//! (spec.md §4.5, §4.6, §6).

pub mod config;
pub mod connection;
pub mod subscription;

pub use config::{ClientConfig, ClientEvents, ConnectionParams, Connector};
pub use connection::Client;
pub use subscription::{SinkError, Subscription, SubscriptionSink};
