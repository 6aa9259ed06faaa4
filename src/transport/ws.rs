use std::collections::HashMap;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

use super::{EVENT_CHANNEL_CAPACITY, Transport, TransportEvent};
use crate::connection::ConnError;

struct WsSession {
    outbound_tx: mpsc::Sender<String>,
    shutdown_tx: broadcast::Sender<()>,
}

/// STOMP over WebSocket (`ws://` or `wss://`), one STOMP frame per text
/// message.
pub struct WsTransport {
    uri: String,
    headers: HashMap<String, String>,
    session: Mutex<Option<WsSession>>,
}

impl WsTransport {
    /// `headers` are added to the HTTP upgrade request.
    pub fn new(uri: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self {
            uri: uri.into(),
            headers,
            session: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, ConnError> {
        let mut request = self
            .uri
            .as_str()
            .into_client_request()
            .map_err(|e| ConnError::Transport(e.to_string()))?;
        for (k, v) in &self.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| ConnError::Protocol(format!("invalid header name '{}': {}", k, e)))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| ConnError::Protocol(format!("invalid header value for '{}': {}", k, e)))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, response) = connect_async(request)
            .await
            .map_err(|e| ConnError::Transport(e.to_string()))?;
        let metadata: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(32);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_sub = shutdown_tx.subscribe();

        {
            let mut session = self.session.lock().await;
            if let Some(old) = session.replace(WsSession {
                outbound_tx: out_tx,
                shutdown_tx,
            }) {
                let _ = old.shutdown_tx.send(());
            }
        }

        let uri = self.uri.clone();
        tokio::spawn(async move {
            let (mut write, mut read) = ws_stream.split();
            if event_tx.send(TransportEvent::Opened(metadata)).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    _ = shutdown_sub.recv() => {
                        let _ = write.close().await;
                        break;
                    }
                    maybe = out_rx.recv() => {
                        match maybe {
                            Some(text) => {
                                // shutdown wins over a write stalled on a peer that stopped reading
                                let written = tokio::select! {
                                    _ = shutdown_sub.recv() => break,
                                    written = write.send(Message::Text(text.into())) => written,
                                };
                                if let Err(e) = written {
                                    let _ = event_tx.send(TransportEvent::Failed(e.to_string())).await;
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    msg = read.next() => {
                        let text = match msg {
                            Some(Ok(Message::Text(text))) => text.to_string(),
                            Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                let _ = event_tx.send(TransportEvent::Failed(e.to_string())).await;
                                break;
                            }
                        };
                        if event_tx.send(TransportEvent::Message(text)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(%uri, "websocket transport closed");
            let _ = event_tx.send(TransportEvent::Closed).await;
        });

        Ok(event_rx)
    }

    async fn send(&self, text: &str) -> Result<(), ConnError> {
        let outbound_tx = match self.session.lock().await.as_ref() {
            Some(session) => session.outbound_tx.clone(),
            None => return Err(ConnError::NotConnected),
        };
        outbound_tx
            .send(text.to_string())
            .await
            .map_err(|_| ConnError::Transport("send channel closed".into()))
    }

    async fn close(&self) -> Result<(), ConnError> {
        if let Some(session) = self.session.lock().await.take() {
            let _ = session.shutdown_tx.send(());
        }
        Ok(())
    }
}
