//! Client-side configuration: how to dial a new transport, what
//! `connection_init` payload to send, and the retry policy to apply when a
//! connection drops (spec.md §4.5, §9 "Retry policy").

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use serde_json::Value;

use crate::id::{IdGenerator, UuidGenerator};
use crate::message::ServerMessage;
use crate::transport::{CloseEvent, Transport};

/// Dials a fresh [`Transport`], once per connection attempt.
///
/// This is the client-side counterpart to [`crate::transport::Transport`]:
/// the externally-owned capability to open a new socket, grounded on
/// `WishKnish`'s `establish_connection` (which wraps
/// `tokio_tungstenite::connect_async`) and generalized the same way
/// [`crate::engine::Engine`] generalizes the teacher's `juniper` dependency.
pub trait Connector: Send + Sync + 'static {
    /// The transport this connector produces.
    type Transport: Transport;

    /// The error returned when dialing fails outright (DNS, TCP connect,
    /// TLS, WebSocket upgrade rejection, …), as opposed to a close received
    /// after a connection was established.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Attempts to open one new connection.
    fn connect(&self) -> BoxFuture<'static, Result<Self::Transport, Self::Error>>;
}

impl<F, Fut, T, E> Connector for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Transport,
    E: std::error::Error + Send + Sync + 'static,
{
    type Transport = T;
    type Error = E;

    fn connect(&self) -> BoxFuture<'static, Result<T, E>> {
        Box::pin(self())
    }
}

impl<T: Connector + ?Sized> Connector for Arc<T> {
    type Transport = T::Transport;
    type Error = T::Error;

    fn connect(&self) -> BoxFuture<'static, Result<Self::Transport, Self::Error>> {
        T::connect(self)
    }
}

/// The `connection_init` payload: either a fixed value, or a producer
/// re-evaluated on every connection attempt (spec.md §4.5: "which may be a
/// value or a deferred producer").
#[derive(Clone)]
pub enum ConnectionParams {
    /// Sent unchanged on every attempt.
    Fixed(Value),
    /// Re-evaluated on every attempt, e.g. to refresh a short-lived token.
    Provider(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl ConnectionParams {
    /// Resolves the payload to send with this attempt's `connection_init`.
    #[must_use]
    pub fn resolve(&self) -> Value {
        match self {
            Self::Fixed(value) => value.clone(),
            Self::Provider(provider) => provider(),
        }
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self::Fixed(Value::Null)
    }
}

impl From<Value> for ConnectionParams {
    fn from(value: Value) -> Self {
        Self::Fixed(value)
    }
}

/// Whether `code` is treated as fatal (no retry) by the default retry
/// policy: `{1000, 1001, 1011, 4400, 4401, 4409, 4429}` plus every
/// `4000..=4999` code past `4499` (spec.md §4.5).
#[must_use]
pub fn is_fatal_close_event(code: u16) -> bool {
    matches!(code, 1000 | 1001 | 1011 | 4400 | 4401 | 4409 | 4429) || (4500..=4999).contains(&code)
}

/// The default backoff: `min(1000 * 2^attempt, 7000)` milliseconds, jittered
/// by up to ±100ms (spec.md §5: "`Math.min(1000 * 2**attempt, 7000) ±
/// jitter`").
#[must_use]
pub fn default_retry_wait(attempt: u32) -> Duration {
    let base = 1000_u64.saturating_mul(1_u64 << attempt.min(16)).min(7000);
    let jitter: i64 = rand::thread_rng().gen_range(-100..=100);
    let millis = (base as i64 + jitter).max(0);
    Duration::from_millis(millis as u64)
}

/// Lifecycle event hooks a caller may register to observe connection state
/// transitions, independent of any particular operation (spec.md §6:
/// "`on?` (event hooks: connecting|connected|closed|message)").
///
/// Every field is optional and called on a best-effort basis; a panicking
/// hook is not caught and will abort the connection actor's task, matching
/// how a thrown callback would propagate in the reference implementation.
#[derive(Clone, Default)]
pub struct ClientEvents {
    /// Called immediately before dialing a new transport (including
    /// reconnection attempts).
    pub on_connecting: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Called once `connection_ack` is received and the connection is
    /// ready to dispatch operations.
    pub on_connected: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Called once a connection episode ends, with the [`CloseEvent`] that
    /// ended it.
    pub on_closed: Option<Arc<dyn Fn(&CloseEvent) + Send + Sync>>,
    /// Called for every [`ServerMessage`] received while ready, before it
    /// is routed to its operation's sink.
    pub on_message: Option<Arc<dyn Fn(&ServerMessage) + Send + Sync>>,
}

impl ClientEvents {
    pub(super) fn connecting(&self) {
        if let Some(hook) = &self.on_connecting {
            hook();
        }
    }

    pub(super) fn connected(&self) {
        if let Some(hook) = &self.on_connected {
            hook();
        }
    }

    pub(super) fn closed(&self, event: &CloseEvent) {
        if let Some(hook) = &self.on_closed {
            hook(event);
        }
    }

    pub(super) fn message(&self, message: &ServerMessage) {
        if let Some(hook) = &self.on_message {
            hook(message);
        }
    }
}

/// Per-client configuration (spec.md §6: "Configuration — client").
pub struct ClientConfig<C: Connector> {
    /// Dials a new transport on every (re)connection attempt.
    pub connector: C,

    /// The `connection_init` payload, resolved fresh on every attempt.
    pub connection_params: ConnectionParams,

    /// Whether to defer connecting until the first `subscribe` call, and to
    /// tear the connection down once no operations remain. Default `true`.
    pub lazy: bool,

    /// How long to wait for `connection_ack` before treating the handshake
    /// as failed. Default 3s.
    pub connection_ack_wait_timeout: Duration,

    /// Maximum number of reconnection attempts per dropped-connection
    /// episode before giving up and erroring out every remaining operation.
    /// Default 5.
    pub retry_attempts: u32,

    /// Decides whether a given close event is worth retrying. Default
    /// [`is_fatal_close_event`], negated.
    pub should_retry: Arc<dyn Fn(&CloseEvent) -> bool + Send + Sync>,

    /// Computes the backoff delay before retry attempt number `attempt`
    /// (0-indexed). Default [`default_retry_wait`].
    pub retry_wait: Arc<dyn Fn(u32) -> Duration + Send + Sync>,

    /// Interval at which the client proactively sends `ping`. [`Duration::ZERO`]
    /// disables it; inbound `ping`s are always answered with `pong`
    /// regardless of this setting.
    pub keep_alive_interval: Duration,

    /// Generates operation ids. Default [`UuidGenerator`].
    pub id_generator: Arc<dyn IdGenerator>,

    /// Lifecycle event hooks. Empty by default.
    pub events: ClientEvents,
}

impl<C: Connector> ClientConfig<C> {
    /// Builds a configuration with every documented default.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            connection_params: ConnectionParams::default(),
            lazy: true,
            connection_ack_wait_timeout: Duration::from_secs(3),
            retry_attempts: 5,
            should_retry: Arc::new(|event: &CloseEvent| !is_fatal_close_event(event.code)),
            retry_wait: Arc::new(default_retry_wait),
            keep_alive_interval: Duration::ZERO,
            id_generator: Arc::new(UuidGenerator),
            events: ClientEvents::default(),
        }
    }

    /// Sets the `connection_init` payload.
    #[must_use]
    pub fn with_connection_params(mut self, params: impl Into<ConnectionParams>) -> Self {
        self.connection_params = params.into();
        self
    }

    /// Disables lazy connect: the client dials immediately on construction.
    #[must_use]
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Overrides the `connection_ack` wait timeout.
    #[must_use]
    pub fn with_connection_ack_wait_timeout(mut self, timeout: Duration) -> Self {
        self.connection_ack_wait_timeout = timeout;
        self
    }

    /// Overrides the retry attempt budget.
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Overrides `shouldRetry`.
    #[must_use]
    pub fn with_should_retry(
        mut self,
        should_retry: impl Fn(&CloseEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Arc::new(should_retry);
        self
    }

    /// Overrides `retryWait`.
    #[must_use]
    pub fn with_retry_wait(mut self, retry_wait: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.retry_wait = Arc::new(retry_wait);
        self
    }

    /// Sets the keepalive ping interval.
    #[must_use]
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Overrides the id generator.
    #[must_use]
    pub fn with_id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Arc::new(generator);
        self
    }

    /// Overrides the lifecycle event hooks.
    #[must_use]
    pub fn with_events(mut self, events: ClientEvents) -> Self {
        self.events = events;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fatal_set_matches_spec() {
        for code in [1000, 1001, 1011, 4400, 4401, 4409, 4429, 4500, 4999] {
            assert!(is_fatal_close_event(code), "{code} should be fatal");
        }
        for code in [1006, 1012, 4000, 4499] {
            assert!(!is_fatal_close_event(code), "{code} should not be fatal");
        }
    }

    #[test]
    fn backoff_is_capped_and_monotonic_before_cap() {
        let zero = default_retry_wait(0).as_millis() as i64;
        let one = default_retry_wait(1).as_millis() as i64;
        assert!((zero - 1000).abs() <= 100);
        assert!((one - 2000).abs() <= 100);
        let capped = default_retry_wait(10).as_millis() as i64;
        assert!((capped - 7000).abs() <= 100);
    }
}
