//! Frame-level seam between sessions and the WebSocket library.
//!
//! Sessions are written against [`FrameSink`] and a stream of [`Frame`]s so
//! the loops can be driven by in-memory channels in tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("write timed out")]
    WriteTimeout,

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    async fn ping(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    async fn pong(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Sends a close frame. The sink is unusable afterwards.
    async fn close(self) -> Result<(), TransportError>;
}

#[async_trait]
impl FrameSink for actix_ws::Session {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.text(text.to_owned())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn ping(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        actix_ws::Session::ping(self, payload)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn pong(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        actix_ws::Session::pong(self, payload)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(self) -> Result<(), TransportError> {
        actix_ws::Session::close(self, None)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Read half of an actix-ws connection as [`Frame`]s.
///
/// Continuation and no-op frames are skipped.
pub fn frames(
    stream: actix_ws::MessageStream,
) -> impl Stream<Item = Result<Frame, TransportError>> {
    stream.filter_map(|msg| async move {
        match msg {
            Ok(actix_ws::Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
            Ok(actix_ws::Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes))),
            Ok(actix_ws::Message::Ping(bytes)) => Some(Ok(Frame::Ping(bytes))),
            Ok(actix_ws::Message::Pong(bytes)) => Some(Ok(Frame::Pong(bytes))),
            Ok(actix_ws::Message::Close(reason)) => {
                tracing::debug!(?reason, "peer sent close frame");
                Some(Ok(Frame::Close))
            }
            Ok(_) => None,
            Err(e) => Some(Err(TransportError::Protocol(e.to_string()))),
        }
    })
}
