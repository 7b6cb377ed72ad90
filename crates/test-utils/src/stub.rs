//! Stub chat service.
//!
//! Listens on an ephemeral loopback port and answers each text frame
//! according to a scripted [`Behavior`]. The listener stops when the
//! [`StubService`] is dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_protocol::{validate, ChatMessage, ServerResponse};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// How the stub answers each message.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Echo with `status: OK` after a fixed delay.
    Echo { delay: Duration },
    /// Validate like the real service: `OK` or `ERROR` with a reason.
    Validate,
    /// Answer every message with `status: ERROR`.
    Reject,
    /// Read messages and never answer.
    Silent,
    /// Drop the connection on the first message.
    Hangup,
}

impl Behavior {
    pub fn echo_after_ms(ms: u64) -> Self {
        Behavior::Echo {
            delay: Duration::from_millis(ms),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicUsize,
    messages: AtomicUsize,
}

/// A running stub service.
pub struct StubService {
    addr: SocketAddr,
    counters: Arc<Counters>,
    handle: JoinHandle<()>,
}

impl StubService {
    /// Bind to `127.0.0.1:0` and start accepting connections.
    pub async fn spawn(behavior: Behavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let counters = Arc::new(Counters::default());

        let accept_counters = counters.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let counters = accept_counters.clone();
                tokio::spawn(serve(stream, behavior, counters));
            }
        });

        Ok(Self {
            addr,
            counters,
            handle,
        })
    }

    /// `host:port` the service listens on.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// WebSocket handshakes completed so far.
    pub fn connections(&self) -> usize {
        self.counters.connections.load(Ordering::SeqCst)
    }

    /// Text frames received so far.
    pub fn messages(&self) -> usize {
        self.counters.messages.load(Ordering::SeqCst)
    }
}

impl Drop for StubService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, behavior: Behavior, counters: Arc<Counters>) {
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(error = %e, "Stub handshake failed");
            return;
        }
    };
    counters.connections.fetch_add(1, Ordering::SeqCst);

    while let Some(frame) = ws.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        counters.messages.fetch_add(1, Ordering::SeqCst);

        let parsed = serde_json::from_str::<ChatMessage>(&text);
        let response = match (behavior, parsed) {
            (Behavior::Silent, _) => continue,
            (Behavior::Hangup, _) => break,
            (_, Err(_)) => ServerResponse::invalid_frame("Invalid JSON format"),
            (Behavior::Echo { delay }, Ok(message)) => {
                tokio::time::sleep(delay).await;
                ServerResponse::ok(&message)
            }
            (Behavior::Validate, Ok(message)) => match validate(&message) {
                Ok(()) => ServerResponse::ok(&message),
                Err(e) => ServerResponse::rejected(&message, e.to_string()),
            },
            (Behavior::Reject, Ok(message)) => ServerResponse::rejected(&message, "rejected"),
        };

        let Ok(json) = serde_json::to_string(&response) else {
            break;
        };
        if ws.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
}

/// An address with nothing listening on it.
pub async fn unused_address() -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{invalid_message, valid_message};
    use chat_protocol::{MessageType, ResponseStatus};
    use tokio_tungstenite::connect_async;

    async fn round_trip(service: &StubService, message: &ChatMessage) -> ServerResponse {
        let url = format!("ws://{}/chat/1", service.address());
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        let json = serde_json::to_string(message).unwrap();
        ws.send(Message::Text(json)).await.unwrap();

        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_echo_replies_ok() {
        let service = StubService::spawn(Behavior::echo_after_ms(1)).await.unwrap();
        let response = round_trip(&service, &valid_message(MessageType::Join)).await;

        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.message_type, "JOIN");
        assert_eq!(service.connections(), 1);
        assert_eq!(service.messages(), 1);
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_username() {
        let service = StubService::spawn(Behavior::Validate).await.unwrap();
        let response = round_trip(&service, &invalid_message()).await;

        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.error.unwrap().contains("username"));
    }

    #[tokio::test]
    async fn test_unused_address_refuses() {
        let address = unused_address().await.unwrap();
        let url = format!("ws://{}/chat/1", address);
        assert!(connect_async(url.as_str()).await.is_err());
    }
}
