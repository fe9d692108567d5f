//! The caller-facing side of a client operation: the sink it receives
//! results on, and the handle it unsubscribes with (spec.md §4.6).

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::{ExecutionResult, GraphqlFormattedError};
use crate::transport::CloseEvent;

use super::connection::Command;

/// Why a subscription ended in error, one of the three sources spec.md §7
/// documents: "a `GraphQLFormattedError[]`, a close event, or a transport
/// exception".
#[derive(Clone, Debug, PartialEq)]
pub enum SinkError {
    /// Field errors reported by an `error` message.
    Graphql(Vec<GraphqlFormattedError>),
    /// The connection closed while this operation was active.
    Closed(CloseEvent),
    /// The underlying transport raised an error outside of a clean close.
    Transport(String),
}

/// The observable-shaped capability set a caller supplies to
/// [`super::Client::subscribe`]: `{next, error, complete}`, with no
/// inheritance and no further structure (spec.md §9 "Observable-shaped
/// client sink").
///
/// At most one of `error`/`complete` is ever invoked, and never before the
/// last `next`.
#[derive(Clone)]
pub struct SubscriptionSink {
    next: Arc<dyn Fn(ExecutionResult) + Send + Sync>,
    error: Arc<dyn Fn(SinkError) + Send + Sync>,
    complete: Arc<dyn Fn() + Send + Sync>,
}

impl SubscriptionSink {
    /// Builds a sink from three independent callbacks.
    pub fn new(
        next: impl Fn(ExecutionResult) + Send + Sync + 'static,
        error: impl Fn(SinkError) + Send + Sync + 'static,
        complete: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            next: Arc::new(next),
            error: Arc::new(error),
            complete: Arc::new(complete),
        }
    }

    pub(super) fn emit_next(&self, result: ExecutionResult) {
        (self.next)(result);
    }

    pub(super) fn emit_error(&self, error: SinkError) {
        (self.error)(error);
    }

    pub(super) fn emit_complete(&self) {
        (self.complete)();
    }
}

/// A handle to one in-flight (or already-terminal) client operation.
///
/// Dropping this handle does not unsubscribe; call [`Subscription::unsubscribe`]
/// explicitly, matching spec.md's "returns an `unsubscribe` handle" rather
/// than a drop-guard.
pub struct Subscription {
    id: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub(super) fn new(id: String, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { id, commands }
    }

    /// The operation id this handle refers to.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Requests that the server stop this operation. A no-op if the
    /// operation already reached a terminal outcome (spec.md §4.6:
    /// "Invoking it after a terminal outcome is a no-op") — the command is
    /// simply ignored by the connection actor once the id is no longer
    /// registered.
    pub fn unsubscribe(&self) {
        let _ = self.commands.send(Command::Unsubscribe { id: self.id.clone() });
    }
}
