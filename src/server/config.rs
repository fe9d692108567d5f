//! Server-side configuration and handshake/operation hooks (spec.md §6).

use std::convert::Infallible;
use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::engine::{Engine, ExecutionResult, GraphqlFormattedError};
use crate::message::SubscribePayload;

/// Runs once per connection, when a `connection_init` message arrives.
/// Returns the full per-connection [`ConnectionConfig`] on acceptance, or an
/// error to reject the handshake with [`crate::close::FORBIDDEN`] (the
/// formatted error becomes the close reason).
///
/// A [`ConnectionConfig`] itself implements this trivially (always accept,
/// no payload inspection, hooks and limits carried over unchanged); closures
/// that inspect `payload` — e.g. to pull an auth token and stamp it into the
/// context — are the common case and are supported by the blanket impl
/// below, mirroring `juniper_graphql_ws::Init`.
pub trait OnConnect<CtxT>: Send + 'static {
    /// The error returned on handshake rejection. Its `Display` becomes the
    /// close reason sent to the client.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The future yielding the outcome.
    type Future: Future<Output = Result<ConnectionConfig<CtxT>, Self::Error>> + Send + 'static;

    /// Evaluates the hook against the `connection_init` payload.
    fn call(self, payload: Value) -> Self::Future;
}

impl<F, CtxT, Fut, E> OnConnect<CtxT> for F
where
    F: FnOnce(Value) -> Fut + Send + 'static,
    Fut: Future<Output = Result<ConnectionConfig<CtxT>, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;
    type Future = Fut;

    fn call(self, payload: Value) -> Fut {
        self(payload)
    }
}

impl<CtxT: Send + Sync + 'static> OnConnect<CtxT> for ConnectionConfig<CtxT> {
    type Error = Infallible;
    type Future = future::Ready<Result<ConnectionConfig<CtxT>, Infallible>>;

    fn call(self, _payload: Value) -> Self::Future {
        future::ready(Ok(self))
    }
}

/// Called just before an operation's document is parsed/validated. May
/// return a precomputed list of results, bypassing execution entirely
/// (spec.md §6: "`onSubscribe` may return a precomputed result array").
pub type OnSubscribeHook =
    Arc<dyn Fn(&SubscribePayload) -> Option<Vec<ExecutionResult>> + Send + Sync>;

/// Called after `onSubscribe` declines to bypass execution, immediately
/// before the operation runs. May rewrite the payload (e.g. to inject
/// default variables).
pub type OnOperationHook = Arc<dyn Fn(SubscribePayload) -> SubscribePayload + Send + Sync>;

/// Called for every outgoing `next` payload; may transform it (e.g. to
/// redact fields) before it is sent.
pub type OnNextHook = Arc<dyn Fn(ExecutionResult) -> ExecutionResult + Send + Sync>;

/// Called for every outgoing `error` payload; may transform it.
pub type OnErrorHook =
    Arc<dyn Fn(Vec<GraphqlFormattedError>) -> Vec<GraphqlFormattedError> + Send + Sync>;

/// Called once an operation reaches a terminal state, with its `id`.
pub type OnCompleteHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-connection server configuration, established once the accepted
/// `connection_init` payload produces a context.
///
/// Mirrors `juniper_graphql_ws::ConnectionConfig`'s builder style.
#[derive(Clone)]
pub struct ConnectionConfig<CtxT> {
    /// The connection's context, threaded through every operation.
    pub context: Arc<CtxT>,

    /// Maximum number of in-flight operations. `0` means unlimited.
    pub max_in_flight_operations: usize,

    /// Interval at which unsolicited keepalive `pong`s are sent.
    /// [`Duration::ZERO`] disables them.
    pub keep_alive_interval: Duration,

    /// See [`OnSubscribeHook`].
    pub on_subscribe: Option<OnSubscribeHook>,

    /// See [`OnOperationHook`].
    pub on_operation: Option<OnOperationHook>,

    /// See [`OnNextHook`].
    pub on_next: Option<OnNextHook>,

    /// See [`OnErrorHook`].
    pub on_error: Option<OnErrorHook>,

    /// See [`OnCompleteHook`].
    pub on_complete: Option<OnCompleteHook>,
}

impl<CtxT> ConnectionConfig<CtxT> {
    /// Constructs the configuration used once a connection is accepted.
    pub fn new(context: CtxT) -> Self {
        Self {
            context: Arc::new(context),
            max_in_flight_operations: 0,
            keep_alive_interval: Duration::from_secs(15),
            on_subscribe: None,
            on_operation: None,
            on_next: None,
            on_error: None,
            on_complete: None,
        }
    }

    /// Sets the in-flight operation cap.
    #[must_use]
    pub fn with_max_in_flight_operations(mut self, max: usize) -> Self {
        self.max_in_flight_operations = max;
        self
    }

    /// Sets the keepalive interval.
    #[must_use]
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Sets the `onSubscribe` hook.
    #[must_use]
    pub fn with_on_subscribe(mut self, hook: OnSubscribeHook) -> Self {
        self.on_subscribe = Some(hook);
        self
    }

    /// Sets the `onOperation` hook.
    #[must_use]
    pub fn with_on_operation(mut self, hook: OnOperationHook) -> Self {
        self.on_operation = Some(hook);
        self
    }

    /// Sets the `onNext` hook.
    #[must_use]
    pub fn with_on_next(mut self, hook: OnNextHook) -> Self {
        self.on_next = Some(hook);
        self
    }

    /// Sets the `onError` hook.
    #[must_use]
    pub fn with_on_error(mut self, hook: OnErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// Sets the `onComplete` hook.
    #[must_use]
    pub fn with_on_complete(mut self, hook: OnCompleteHook) -> Self {
        self.on_complete = Some(hook);
        self
    }
}

/// Top-level server configuration: everything needed to accept connections
/// against a given [`Engine`], independent of any single connection's
/// accepted context.
#[derive(Clone)]
pub struct ServerConfig<E: Engine> {
    /// The GraphQL engine operations are executed against.
    pub engine: E,

    /// How long to wait for `connection_init` before closing with
    /// [`crate::close::CONNECTION_INITIALISATION_TIMEOUT`]. Default 3s.
    pub connection_init_wait_timeout: Duration,
}

impl<E: Engine> ServerConfig<E> {
    /// Builds a configuration with the default 3-second init wait timeout.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            connection_init_wait_timeout: Duration::from_secs(3),
        }
    }

    /// Overrides the `connection_init` wait timeout.
    #[must_use]
    pub fn with_connection_init_wait_timeout(mut self, timeout: Duration) -> Self {
        self.connection_init_wait_timeout = timeout;
        self
    }
}
