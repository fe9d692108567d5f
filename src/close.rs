//! WebSocket close codes used by the `graphql-transport-ws` subprotocol.
//!
//! Values `>= 4000` are application-defined, per the protocol spec linked
//! from [`crate::server::connection`].

/// Normal closure, no operations were in flight.
pub const NORMAL: u16 = 1000;

/// Unexpected condition on the server side (engine panic, transport write
/// failure, …).
pub const INTERNAL_SERVER_ERROR: u16 = 1011;

/// A message was malformed, or a message was sent out of the order the
/// protocol allows.
pub const BAD_REQUEST: u16 = 4400;

/// An operation-scoped message was received before `connection_init` was
/// acknowledged.
pub const UNAUTHORIZED: u16 = 4401;

/// The `on_connect` hook rejected the handshake.
pub const FORBIDDEN: u16 = 4403;

/// `connection_init` was not received within the configured wait time.
pub const CONNECTION_INITIALISATION_TIMEOUT: u16 = 4408;

/// A `subscribe` was received for an `id` that already has an active
/// operation.
pub const SUBSCRIBER_ALREADY_EXISTS: u16 = 4409;

/// The WebSocket handshake did not negotiate the `graphql-transport-ws`
/// subprotocol.
pub const SUBPROTOCOL_NOT_ACCEPTABLE: u16 = 4406;

/// A second `connection_init` was received after the connection was already
/// acknowledged.
pub const TOO_MANY_INITIALISATION_REQUESTS: u16 = 4429;

/// Returns whether `code` falls in the reserved application-defined range.
#[must_use]
pub fn is_application_defined(code: u16) -> bool {
    code >= 4000
}
