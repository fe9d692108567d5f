//! The boundary between this crate and a GraphQL engine.
//!
//! Everything in this module is an external collaborator per spec.md §1:
//! parsing, validation, and execution are not this crate's concern. An
//! [`Engine`] implementation is expected to wrap whatever GraphQL library an
//! embedder already uses (the reference implementation this protocol was
//! grounded against pairs it with `juniper`, but nothing here names that
//! crate).

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::SubscribePayload;

/// A single location (line/column) a [`GraphqlFormattedError`] may point at.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ErrorLocation {
    /// 1-indexed line number.
    pub line: u32,
    /// 1-indexed column number.
    pub column: u32,
}

/// A GraphQL error in the wire format used by `error` and `next` messages.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GraphqlFormattedError {
    /// Human-readable description of the error.
    pub message: String,

    /// Source locations the error applies to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ErrorLocation>>,

    /// Response-path segments (field names / list indices) the error
    /// applies to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,

    /// Engine-specific extension data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphqlFormattedError {
    /// Builds a bare error carrying only a message, as used for
    /// protocol-level failures that have no source location.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None,
        }
    }
}

/// The result of executing a query, mutation, or a single subscription
/// event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionResult {
    /// The result data, absent if execution failed before producing any.
    pub data: Option<Value>,

    /// Field errors raised during execution. Distinct from parse/validation
    /// errors, which engines report through [`Engine::operation_kind`]'s
    /// `Err` variant instead.
    pub errors: Vec<GraphqlFormattedError>,

    /// Arbitrary extension data.
    pub extensions: Option<Value>,
}

impl ExecutionResult {
    /// Builds a successful result with no field errors.
    #[must_use]
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
            extensions: None,
        }
    }
}

/// The three shapes of GraphQL operation this protocol distinguishes,
/// because queries/mutations answer with exactly one [`ExecutionResult`]
/// while subscriptions answer with a stream of them (spec.md §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// Answered via [`Engine::execute`].
    Query,
    /// Answered via [`Engine::execute`].
    Mutation,
    /// Answered via [`Engine::subscribe`].
    Subscription,
}

/// Capability set a GraphQL engine must provide for this crate to drive
/// operations against it.
///
/// Implementations are expected to be cheap to clone (an `Arc`-wrapped
/// schema is the common case, exactly as `juniper_graphql_ws::Schema` is
/// typically an `Arc<RootNode<...>>`).
pub trait Engine: Clone + Send + Sync + 'static {
    /// Connection-scoped context threaded through execution (accepted
    /// `connection_init` payload plus whatever the embedder's `on_connect`
    /// hook derived from it).
    type Context: Send + Sync + 'static;

    /// Parses and validates `payload.query`, determining whether it is a
    /// query, mutation, or subscription, without executing it.
    ///
    /// Mirrors the "first parse/validate the document" step of spec.md
    /// §4.3. Implementations built on engines that only expose a combined
    /// parse+execute entry point (as `juniper` does) may have to parse the
    /// document twice; that duplication is an accepted cost, not a defect.
    fn operation_kind(
        &self,
        payload: &SubscribePayload,
    ) -> Result<OperationKind, Vec<GraphqlFormattedError>>;

    /// Executes a query or mutation to completion and returns its single
    /// result.
    fn execute(
        &self,
        payload: SubscribePayload,
        context: Arc<Self::Context>,
    ) -> BoxFuture<'static, ExecutionResult>;

    /// Begins a subscription, returning a lazy, possibly infinite,
    /// non-restartable stream of results with an implicit cancellation hook
    /// (dropping the stream cancels it).
    fn subscribe(
        &self,
        payload: SubscribePayload,
        context: Arc<Self::Context>,
    ) -> BoxFuture<'static, Result<BoxStream<'static, ExecutionResult>, Vec<GraphqlFormattedError>>>;
}
