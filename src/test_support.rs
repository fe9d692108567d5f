//! Mock [`Engine`] implementations shared by this crate's unit and
//! integration tests, in the spirit of the `Query`/`Subscription` test
//! schema `juniper_graphql_ws::graphql_transport_ws::test` builds inline.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;

use crate::engine::{Engine, ExecutionResult, GraphqlFormattedError, OperationKind};
use crate::message::SubscribePayload;

fn is_subscription(payload: &SubscribePayload) -> bool {
    payload.query.trim_start().starts_with("subscription")
}

/// An engine whose query field `context` resolves to the connection's `i32`
/// context, and whose subscription field `greetings` streams five fixed
/// values, matching the scenarios spec.md §8 describes.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct EchoEngine;

impl Engine for EchoEngine {
    type Context = i32;

    fn operation_kind(
        &self,
        payload: &SubscribePayload,
    ) -> Result<OperationKind, Vec<GraphqlFormattedError>> {
        Ok(if is_subscription(payload) {
            OperationKind::Subscription
        } else {
            OperationKind::Query
        })
    }

    fn execute(
        &self,
        _payload: SubscribePayload,
        context: Arc<Self::Context>,
    ) -> BoxFuture<'static, ExecutionResult> {
        Box::pin(async move { ExecutionResult::data(json!({ "value": *context })) })
    }

    fn subscribe(
        &self,
        _payload: SubscribePayload,
        _context: Arc<Self::Context>,
    ) -> BoxFuture<'static, Result<BoxStream<'static, ExecutionResult>, Vec<GraphqlFormattedError>>>
    {
        Box::pin(async move {
            let greetings = ["Hi", "Bonjour", "Hola", "Ciao", "Zdravo"];
            Ok(stream::iter(greetings)
                .map(|g| ExecutionResult::data(json!({ "greetings": g })))
                .boxed())
        })
    }
}

/// An engine that never successfully parses anything — every operation
/// fails at `operation_kind`.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct NeverEngine;

impl Engine for NeverEngine {
    type Context = i32;

    fn operation_kind(
        &self,
        _payload: &SubscribePayload,
    ) -> Result<OperationKind, Vec<GraphqlFormattedError>> {
        Err(vec![GraphqlFormattedError::from_message(
            "Syntax Error: unexpected token",
        )])
    }

    fn execute(
        &self,
        _payload: SubscribePayload,
        _context: Arc<Self::Context>,
    ) -> BoxFuture<'static, ExecutionResult> {
        Box::pin(async { ExecutionResult::default() })
    }

    fn subscribe(
        &self,
        _payload: SubscribePayload,
        _context: Arc<Self::Context>,
    ) -> BoxFuture<'static, Result<BoxStream<'static, ExecutionResult>, Vec<GraphqlFormattedError>>>
    {
        Box::pin(async { Ok(stream::empty().boxed()) })
    }
}

/// An engine whose subscription never yields anything, for testing
/// cancellation (spec.md §8 scenario (f)).
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct HangingEngine;

impl Engine for HangingEngine {
    type Context = i32;

    fn operation_kind(
        &self,
        _payload: &SubscribePayload,
    ) -> Result<OperationKind, Vec<GraphqlFormattedError>> {
        Ok(OperationKind::Subscription)
    }

    fn execute(
        &self,
        _payload: SubscribePayload,
        _context: Arc<Self::Context>,
    ) -> BoxFuture<'static, ExecutionResult> {
        Box::pin(async { ExecutionResult::default() })
    }

    fn subscribe(
        &self,
        _payload: SubscribePayload,
        _context: Arc<Self::Context>,
    ) -> BoxFuture<'static, Result<BoxStream<'static, ExecutionResult>, Vec<GraphqlFormattedError>>>
    {
        Box::pin(async {
            Ok(stream::pending::<ExecutionResult>().boxed())
        })
    }
}
