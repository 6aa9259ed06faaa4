use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::{EVENT_CHANNEL_CAPACITY, Transport, TransportEvent};
use crate::connection::ConnError;

/// Splits a raw STOMP byte stream into the text messages the engine expects.
///
/// A leading LF (or CRLF) is a heartbeat and becomes its own message; anything
/// else is buffered up to and including the NUL terminator.
#[derive(Debug, Default)]
pub struct FrameSplitter;

impl Decoder for FrameSplitter {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match (src.first().copied(), src.get(1).copied()) {
            (None, _) => return Ok(None),
            (Some(b'\n'), _) => {
                src.advance(1);
                return Ok(Some("\n".to_string()));
            }
            (Some(b'\r'), Some(b'\n')) => {
                src.advance(2);
                return Ok(Some("\r\n".to_string()));
            }
            (Some(b'\r'), None) => return Ok(None),
            _ => {}
        }

        let Some(nul) = src.iter().position(|&b| b == 0) else {
            return Ok(None);
        };
        let raw = src.split_to(nul + 1);
        String::from_utf8(raw.to_vec())
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid utf8 in frame: {}", e)))
    }
}

impl Encoder<String> for FrameSplitter {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}

struct TcpSession {
    outbound_tx: mpsc::Sender<String>,
    shutdown_tx: broadcast::Sender<()>,
}

/// STOMP over a plain TCP socket (the broker's native STOMP port).
pub struct TcpTransport {
    addr: String,
    session: Mutex<Option<TcpSession>>,
}

impl TcpTransport {
    /// `addr` is `host:port`; a leading `tcp://` or `stomp://` is accepted.
    pub fn new(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        let addr = addr
            .strip_prefix("tcp://")
            .or_else(|| addr.strip_prefix("stomp://"))
            .map(str::to_string)
            .unwrap_or(addr);
        Self {
            addr,
            session: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, ConnError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let mut metadata = HashMap::new();
        if let Ok(peer) = stream.peer_addr() {
            metadata.insert("peer-addr".to_string(), peer.to_string());
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(32);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_sub = shutdown_tx.subscribe();

        {
            let mut session = self.session.lock().await;
            if let Some(old) = session.replace(TcpSession {
                outbound_tx: out_tx,
                shutdown_tx,
            }) {
                let _ = old.shutdown_tx.send(());
            }
        }

        let framed = Framed::new(stream, FrameSplitter);
        let addr = self.addr.clone();
        tokio::spawn(async move {
            let (mut sink, mut stream) = framed.split();
            if event_tx.send(TransportEvent::Opened(metadata)).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    _ = shutdown_sub.recv() => {
                        let _ = sink.close().await;
                        break;
                    }
                    maybe = out_rx.recv() => {
                        match maybe {
                            Some(text) => {
                                // shutdown wins over a write stalled on a peer that stopped reading
                                let written = tokio::select! {
                                    _ = shutdown_sub.recv() => break,
                                    written = sink.send(text) => written,
                                };
                                if let Err(e) = written {
                                    let _ = event_tx.send(TransportEvent::Failed(e.to_string())).await;
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    item = stream.next() => {
                        match item {
                            Some(Ok(text)) => {
                                if event_tx.send(TransportEvent::Message(text)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                let _ = event_tx.send(TransportEvent::Failed(e.to_string())).await;
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            tracing::debug!(%addr, "tcp transport closed");
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
