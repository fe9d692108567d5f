//! The message-oriented, full-duplex transport abstraction (spec.md §4.2).
//!
//! Like [`crate::engine::Engine`], this is a boundary to an external
//! collaborator: the raw WebSocket. Connections are generic over any
//! [`Transport`] impl; a ready-made one backed by `tokio-tungstenite` is
//! provided under the `tungstenite-transport` feature (on by default),
//! grounded on the way `juniper_axum::subscriptions::handle_graphql_socket`
//! splits a socket into independent send/receive halves.

use futures::{Sink, Stream};

/// A frame received from the peer.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// A text frame, expected to decode as a protocol [`crate::message`].
    Text(String),
    /// The peer closed the connection.
    Closed(CloseEvent),
}

/// A frame to send to the peer.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundFrame {
    /// A text frame carrying an encoded protocol message.
    Text(String),
    /// Closes the connection with an application close code and reason.
    Close {
        /// The WebSocket close code.
        code: u16,
        /// A human-readable reason.
        reason: String,
    },
}

impl OutboundFrame {
    /// Convenience constructor for a text frame.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// Describes how a transport's connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseEvent {
    /// The close code the peer (or this side) sent, if known.
    pub code: u16,
    /// A human-readable reason.
    pub reason: String,
    /// Whether the close was a clean WebSocket close handshake, as opposed
    /// to the socket simply dropping.
    pub was_clean: bool,
}

impl CloseEvent {
    /// The close event synthesized when the underlying socket drops without
    /// completing a close handshake.
    #[must_use]
    pub fn abnormal() -> Self {
        Self {
            code: 1006,
            reason: String::new(),
            was_clean: false,
        }
    }
}

/// A message-oriented, full-duplex transport that can be split into an
/// independent outbound [`Sink`] and inbound [`Stream`].
///
/// Connections never hold both halves of the transport at once outside of
/// `split` — the outbound sink is owned by the writer half of a connection
/// and the inbound stream by the reader half, matching the "single
/// serialized outbound writer and a serialized inbound reader" scheduling
/// model of spec.md §5.
pub trait Transport: Send + 'static {
    /// The error type produced by the sink and stream halves.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The outbound half.
    type Sink: Sink<OutboundFrame, Error = Self::Error> + Send + Unpin + 'static;

    /// The inbound half.
    type Stream: Stream<Item = Result<InboundFrame, Self::Error>> + Send + Unpin + 'static;

    /// Splits the transport into its outbound and inbound halves.
    fn split(self) -> (Self::Sink, Self::Stream);
}

#[cfg(feature = "tungstenite-transport")]
mod tungstenite_transport {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use futures::{Sink, SinkExt, Stream, StreamExt};
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    use super::{CloseEvent, InboundFrame, OutboundFrame, Transport};

    /// Bridges a [`WebSocketStream`] — as returned by
    /// `tokio_tungstenite::connect_async` on the client, or by any server
    /// framework's WebSocket upgrade — to this crate's [`Transport`] trait.
    pub struct TungsteniteTransport<S>(WebSocketStream<S>);

    impl<S> TungsteniteTransport<S> {
        /// Wraps an already-established WebSocket stream.
        #[must_use]
        pub fn new(stream: WebSocketStream<S>) -> Self {
            Self(stream)
        }
    }

    impl<S> Transport for TungsteniteTransport<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        type Error = tokio_tungstenite::tungstenite::Error;
        type Sink = OutboundAdapter<S>;
        type Stream = InboundAdapter<S>;

        fn split(self) -> (Self::Sink, Self::Stream) {
            let (sink, stream) = self.0.split();
            (OutboundAdapter(sink), InboundAdapter(stream))
        }
    }

    /// The outbound half of a [`TungsteniteTransport`].
    pub struct OutboundAdapter<S>(futures::stream::SplitSink<WebSocketStream<S>, Message>);

    /// The inbound half of a [`TungsteniteTransport`].
    pub struct InboundAdapter<S>(futures::stream::SplitStream<WebSocketStream<S>>);

    impl<S> Sink<OutboundFrame> for OutboundAdapter<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        type Error = tokio_tungstenite::tungstenite::Error;

        fn poll_ready(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.0).poll_ready(cx)
        }

        fn start_send(mut self: Pin<&mut Self>, item: OutboundFrame) -> Result<(), Self::Error> {
            let message = match item {
                OutboundFrame::Text(text) => Message::text(text),
                OutboundFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
                    code: code.into(),
                    reason: reason.into(),
                })),
            };
            Pin::new(&mut self.0).start_send(message)
        }

        fn poll_flush(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.0).poll_flush(cx)
        }

        fn poll_close(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.0).poll_close(cx)
        }
    }

    impl<S> Stream for InboundAdapter<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        type Item = Result<InboundFrame, tokio_tungstenite::tungstenite::Error>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            loop {
                return match Pin::new(&mut self.0).poll_next(cx) {
                    Poll::Ready(Some(Ok(Message::Text(text)))) => {
                        Poll::Ready(Some(Ok(InboundFrame::Text(text.as_str().to_owned()))))
                    }
                    Poll::Ready(Some(Ok(Message::Close(frame)))) => {
                        let event = frame
                            .map(|f| CloseEvent {
                                code: f.code.into(),
                                reason: f.reason.as_str().to_owned(),
                                was_clean: true,
                            })
                            .unwrap_or_else(|| CloseEvent {
                                code: 1005,
                                reason: String::new(),
                                was_clean: true,
                            });
                        Poll::Ready(Some(Ok(InboundFrame::Closed(event))))
                    }
                    // WebSocket-level ping/pong/binary frames aren't protocol
                    // messages; tungstenite already auto-replies to pings.
                    Poll::Ready(Some(Ok(_))) => continue,
                    Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                    Poll::Ready(None) => Poll::Ready(None),
                    Poll::Pending => Poll::Pending,
                };
            }
        }
    }
}

#[cfg(feature = "tungstenite-transport")]
pub use tungstenite_transport::TungsteniteTransport;
