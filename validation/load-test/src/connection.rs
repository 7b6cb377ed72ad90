//! Persistent duplex connections to the chat service.
//!
//! The worker pool talks to the service only through [`Connector`] and
//! [`Connection`], so tests can substitute scripted transports.

use async_trait::async_trait;
use chat_protocol::{room_path, ChatMessage, ServerResponse};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::TransportError;

/// An open connection to one room. Requests and replies are strictly paired.
#[async_trait]
pub trait Connection: Send {
    /// Write one request frame.
    async fn send(&mut self, message: &ChatMessage) -> Result<(), TransportError>;

    /// Read the next reply frame.
    async fn receive(&mut self) -> Result<ServerResponse, TransportError>;

    /// Close the connection, ignoring errors.
    async fn close(&mut self);
}

/// Opens connections to rooms.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, room_id: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// Connects to `ws://{address}/chat/{room}`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    address: String,
}

impl WsConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn endpoint(&self, room_id: &str) -> String {
        format!("ws://{}{}", self.address, room_path(room_id))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, room_id: &str) -> Result<Box<dyn Connection>, TransportError> {
        let endpoint = self.endpoint(room_id);
        let (stream, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| TransportError::connect(endpoint.clone(), e))?;
        debug!(endpoint = %endpoint, "Connected");
        Ok(Box::new(WsConnection { stream }))
    }
}

/// A WebSocket connection carrying JSON text frames.
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, message: &ChatMessage) -> Result<(), TransportError> {
        let json = serde_json::to_string(message).map_err(|e| TransportError::Write(e.to_string()))?;
        self.stream
            .send(Message::Text(json))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn receive(&mut self) -> Result<ServerResponse, TransportError> {
        loop {
            let frame = match self.stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(TransportError::Read(e.to_string())),
                None => return Err(TransportError::Closed),
            };

            match frame {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Binary(bytes) => return Ok(serde_json::from_slice(&bytes)?),
                Message::Close(_) => return Err(TransportError::Closed),
                // Control frames are answered by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_protocol::{MessageType, ResponseStatus};
    use test_utils::{unused_address, valid_message, Behavior, StubService};

    #[test]
    fn test_endpoint_carries_room() {
        let connector = WsConnector::new("localhost:8080");
        assert_eq!(connector.endpoint("12"), "ws://localhost:8080/chat/12");
    }

    #[tokio::test]
    async fn test_round_trip_over_websocket() {
        let service = StubService::spawn(Behavior::echo_after_ms(0)).await.unwrap();
        let connector = WsConnector::new(service.address());

        let mut conn = connector.connect("1").await.unwrap();
        conn.send(&valid_message(MessageType::Text)).await.unwrap();
        let response = conn.receive().await.unwrap();
        conn.close().await;

        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(service.connections(), 1);
    }

    #[tokio::test]
    async fn test_connect_refused_is_connectivity_error() {
        let connector = WsConnector::new(unused_address().await.unwrap());
        let err = connector.connect("1").await.err().unwrap();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_hangup_surfaces_as_read_failure() {
        let service = StubService::spawn(Behavior::Hangup).await.unwrap();
        let connector = WsConnector::new(service.address());

        let mut conn = connector.connect("1").await.unwrap();
        conn.send(&valid_message(MessageType::Join)).await.unwrap();
        let err = conn.receive().await.err().unwrap();
        assert!(matches!(err, TransportError::Closed | TransportError::Read(_)));
    }
}
