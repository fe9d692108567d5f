//! The wire message format: a JSON object discriminated by a `type` field.
//!
//! Mirrors `graphql-transport-ws`'s eight message types (spec.md §6). Parsing
//! rejects unknown `type`s, `id` on connection-scoped messages, and missing
//! `id` on operation-scoped messages before any further field access — the
//! [`ClientMessage`]/[`ServerMessage`] enums are `serde`-tagged so `serde`
//! itself enforces this for us.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{ExecutionResult, GraphqlFormattedError};

/// Deserializes a `null`able value by placing the [`Default`] in its stead,
/// since `payload` fields are frequently omitted or sent as `null`.
fn default_for_null<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The payload of a `subscribe` message: a GraphQL request.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    /// The document body.
    pub query: String,

    /// The optional variables.
    #[serde(default, deserialize_with = "default_for_null")]
    pub variables: Value,

    /// The optional operation name (required if the document contains
    /// multiple operations).
    #[serde(default)]
    pub operation_name: Option<String>,

    /// Optional, protocol- or engine-specific extension data.
    #[serde(default, deserialize_with = "default_for_null")]
    pub extensions: Value,
}

/// Messages a client may send.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sent once, immediately after the socket opens.
    #[serde(deny_unknown_fields)]
    ConnectionInit {
        /// Optional connection parameters, often used for authentication.
        #[serde(default, deserialize_with = "default_for_null")]
        payload: Value,
    },
    /// Requests execution of the operation described in `payload`.
    Subscribe {
        /// Identifies this operation for the lifetime of its execution.
        /// Reusing the `id` of a currently active operation is a protocol
        /// violation.
        id: String,

        /// The query, variables, and operation name.
        payload: SubscribePayload,
    },
    /// Requests that the operation identified by `id` stop.
    Complete {
        /// The id of the operation to stop.
        id: String,
    },
    /// A keepalive probe; peers must reply with [`ServerMessage::Pong`] /
    /// a client `Pong`, but a missing reply is never a protocol violation.
    #[serde(deny_unknown_fields)]
    Ping {
        /// Optional, implementation-specific detail about the ping.
        #[serde(default, deserialize_with = "default_for_null")]
        payload: Value,
    },
    /// The reply to a `ping`.
    #[serde(deny_unknown_fields)]
    Pong {
        /// Optional, implementation-specific detail about the pong.
        #[serde(default, deserialize_with = "default_for_null")]
        payload: Value,
    },
}

/// The payload of a `next` message: one item of an [`ExecutionResult`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NextPayload {
    /// The result data, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Errors raised during execution (as opposed to parse/validation
    /// errors, which are sent as an `error` message instead).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlFormattedError>,

    /// Arbitrary extension data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl From<ExecutionResult> for NextPayload {
    fn from(result: ExecutionResult) -> Self {
        Self {
            data: result.data,
            errors: result.errors,
            extensions: result.extensions,
        }
    }
}

/// Messages a server may send.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent in response to an accepted `connection_init`.
    #[serde(deny_unknown_fields)]
    ConnectionAck {
        /// Optional payload echoed back to the client.
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Carries one item of an operation's result.
    Next {
        /// The id of the operation this result is for.
        id: String,

        /// The execution result.
        payload: NextPayload,
    },
    /// Reports an error that occurred before or outside of execution
    /// (parse/validation failures, or an engine exception). Terminal for
    /// `id`.
    Error {
        /// The id of the operation that failed.
        id: String,

        /// The formatted GraphQL errors.
        payload: Vec<GraphqlFormattedError>,
    },
    /// Indicates that no more messages will be sent for `id`. Terminal for
    /// `id`.
    Complete {
        /// The id of the operation that completed.
        id: String,
    },
    /// A keepalive probe.
    #[serde(deny_unknown_fields)]
    Ping {
        /// Optional, implementation-specific detail about the ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// The reply to a `ping`.
    #[serde(deny_unknown_fields)]
    Pong {
        /// Optional, implementation-specific detail about the pong.
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

/// Errors produced while decoding a raw text frame into a [`ClientMessage`]
/// or [`ServerMessage`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame was not a single, well-formed JSON object, or its shape
    /// did not match any known message `type`.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parses a raw text frame as a [`ClientMessage`].
///
/// This is the boundary the server's transport adapter calls into; rejection
/// here is reported as a [`CodecError`], which callers map to
/// [`crate::close::BAD_REQUEST`].
pub fn decode_client_message(text: &str) -> Result<ClientMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Parses a raw text frame as a [`ServerMessage`].
///
/// Used by the client connection to interpret inbound frames.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Serializes a [`ServerMessage`] to its wire form.
pub fn encode_server_message(message: &ServerMessage) -> String {
    serde_json::to_string(message).expect("ServerMessage serialization is infallible")
}

/// Serializes a [`ClientMessage`] to its wire form.
pub fn encode_client_message(message: &ClientMessage) -> String {
    serde_json::to_string(message).expect("ClientMessage serialization is infallible")
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn rejects_unknown_type() {
        let err = decode_client_message(r#"{"type": "bogus"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_id_on_connection_scoped_message() {
        let err = decode_client_message(r#"{"type": "connection_init", "id": "x", "payload": null}"#);
        assert!(err.is_err());

        let err = decode_client_message(r#"{"type": "ping", "id": "x"}"#);
        assert!(err.is_err());

        // A `subscribe` missing `id` must fail too.
        let err = decode_client_message(r#"{"type": "subscribe", "payload": {"query": "{x}"}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_id_on_server_connection_scoped_message() {
        let err = decode_server_message(r#"{"type": "connection_ack", "id": "x"}"#);
        assert!(err.is_err());

        let err = decode_server_message(r#"{"type": "pong", "id": "x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn round_trips_subscribe() {
        let raw = r#"{"type": "subscribe", "id": "foo", "payload": {
            "query": "query MyQuery { __typename }",
            "variables": {"foo": "bar"},
            "operationName": "MyQuery"
        }}"#;
        let msg = decode_client_message(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                id: "foo".into(),
                payload: SubscribePayload {
                    query: "query MyQuery { __typename }".into(),
                    variables: json!({"foo": "bar"}),
                    operation_name: Some("MyQuery".into()),
                    extensions: Value::Null,
                },
            }
        );
    }

    #[test]
    fn null_variables_become_default() {
        let raw = r#"{"type":"subscribe","id":"foo","payload":{"query":"query","variables":null}}"#;
        let msg = decode_client_message(raw).unwrap();
        match msg {
            ClientMessage::Subscribe { payload, .. } => assert_eq!(payload.variables, Value::Null),
            _ => panic!("expected Subscribe"),
        }
    }

    #[test]
    fn complete_round_trips() {
        let raw = r#"{"type": "complete", "id": "foo"}"#;
        assert_eq!(
            decode_client_message(raw).unwrap(),
            ClientMessage::Complete { id: "foo".into() }
        );
    }

    #[test]
    fn serializes_next_without_empty_errors() {
        let msg = ServerMessage::Next {
            id: "foo".into(),
            payload: NextPayload {
                data: Some(json!(null)),
                errors: vec![],
                extensions: None,
            },
        };
        assert_eq!(
            encode_server_message(&msg),
            r#"{"type":"next","id":"foo","payload":{"data":null}}"#,
        );
    }

    #[test]
    fn serializes_complete() {
        assert_eq!(
            encode_server_message(&ServerMessage::Complete { id: "foo".into() }),
            r#"{"type":"complete","id":"foo"}"#,
        );
    }
}
