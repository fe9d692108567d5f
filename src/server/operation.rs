//! Drives one `subscribe` to completion: parses/determines its kind, then
//! either executes it once or forwards a subscription's event stream
//! (spec.md §4.4).
//!
//! Unlike the teacher's `SubscriptionStart`, this does not need a
//! self-referential, unsafely-pinned state machine: [`Engine::execute`] and
//! [`Engine::subscribe`] take owned arguments and return `'static` futures,
//! so plain `Stream` combinators suffice.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use crate::engine::{Engine, ExecutionResult, GraphqlFormattedError, OperationKind};
use crate::message::SubscribePayload;
use crate::server::config::ConnectionConfig;

/// One event produced while an operation runs. The connection is
/// responsible for tagging these with the operation's `id` and appending
/// the terminal `complete` once the stream ends.
#[derive(Debug, PartialEq)]
pub enum OperationEvent {
    /// A `next` payload: one query/mutation result, or one subscription
    /// event.
    Next(ExecutionResult),
    /// An `error` payload. Always the last event produced for the
    /// operation — the returned stream ends immediately after.
    Error(Vec<GraphqlFormattedError>),
}

/// Starts `payload` against `engine` and returns the stream of
/// [`OperationEvent`]s it produces, applying the `onSubscribe`/
/// `onOperation`/`onNext`/`onError` hooks from `config` along the way.
pub fn start<E: Engine>(
    engine: E,
    payload: SubscribePayload,
    config: Arc<ConnectionConfig<E::Context>>,
) -> BoxStream<'static, OperationEvent> {
    if let Some(hook) = &config.on_subscribe {
        if let Some(results) = hook(&payload) {
            return apply_next_hook(stream::iter(results.into_iter().map(OperationEvent::Next)).boxed(), config);
        }
    }

    let payload = match &config.on_operation {
        Some(hook) => hook(payload),
        None => payload,
    };

    let kind = engine.operation_kind(&payload);
    let events = match kind {
        Err(errors) => stream::once(error_event(errors)).boxed(),
        Ok(OperationKind::Query | OperationKind::Mutation) => {
            let context = config.context.clone();
            stream::once(execute_event(engine, payload, context)).boxed()
        }
        Ok(OperationKind::Subscription) => {
            let context = config.context.clone();
            stream::once(engine.subscribe(payload, context))
                .flat_map(|result| match result {
                    Ok(events) => events.map(OperationEvent::Next).boxed(),
                    Err(errors) => stream::once(async move { OperationEvent::Error(errors) }).boxed(),
                })
                .boxed()
        }
    };

    apply_error_hook(apply_next_hook(events, config.clone()), config)
}

fn execute_event<E: Engine>(
    engine: E,
    payload: SubscribePayload,
    context: Arc<E::Context>,
) -> BoxFuture<'static, OperationEvent> {
    Box::pin(async move { OperationEvent::Next(engine.execute(payload, context).await) })
}

fn error_event(errors: Vec<GraphqlFormattedError>) -> BoxFuture<'static, OperationEvent> {
    Box::pin(async move { OperationEvent::Error(errors) })
}

fn apply_next_hook<CtxT: Send + Sync + 'static>(
    events: BoxStream<'static, OperationEvent>,
    config: Arc<ConnectionConfig<CtxT>>,
) -> BoxStream<'static, OperationEvent> {
    let Some(hook) = config.on_next.clone() else {
        return events;
    };
    events
        .map(move |event| match event {
            OperationEvent::Next(result) => OperationEvent::Next(hook(result)),
            other => other,
        })
        .boxed()
}

fn apply_error_hook<CtxT: Send + Sync + 'static>(
    events: BoxStream<'static, OperationEvent>,
    config: Arc<ConnectionConfig<CtxT>>,
) -> BoxStream<'static, OperationEvent> {
    let Some(hook) = config.on_error.clone() else {
        return events;
    };
    events
        .map(move |event| match event {
            OperationEvent::Error(errors) => OperationEvent::Error(hook(errors)),
            other => other,
        })
        .boxed()
}

#[cfg(test)]
mod test {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::test_support::{EchoEngine, NeverEngine};

    #[tokio::test]
    async fn query_emits_single_next() {
        let config = Arc::new(ConnectionConfig::new(7_i32));
        let payload = SubscribePayload {
            query: "{ value }".into(),
            variables: json!({}),
            operation_name: None,
            extensions: json!(null),
        };
        let events: Vec<_> = start(EchoEngine, payload, config).collect().await;
        assert_eq!(
            events,
            vec![OperationEvent::Next(ExecutionResult::data(json!({"value": 7})))]
        );
    }

    #[tokio::test]
    async fn subscription_forwards_every_event_then_ends() {
        let config = Arc::new(ConnectionConfig::new(0_i32));
        let payload = SubscribePayload {
            query: "subscription { greetings }".into(),
            variables: json!({}),
            operation_name: None,
            extensions: json!(null),
        };
        let events: Vec<_> = start(EchoEngine, payload, config).collect().await;
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn parse_error_short_circuits() {
        let config = Arc::new(ConnectionConfig::new(0_i32));
        let payload = SubscribePayload {
            query: "not graphql".into(),
            variables: json!({}),
            operation_name: None,
            extensions: json!(null),
        };
        let events: Vec<_> = start(NeverEngine, payload, config).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], OperationEvent::Error(_)));
    }
}
