use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::lock;
use super::transport::{ConnectTarget, Connection, Connector, TransportError};
use crate::config::DeliveryConfig;

type Writer = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket connector: `{endpoint}?sessionId=..&clientId=..[&token=..]`.
pub struct WsConnector {
    endpoint: String,
    capacity: usize,
}

impl WsConnector {
    pub fn new(cfg: &DeliveryConfig) -> Self {
        Self { endpoint: cfg.endpoint.clone(), capacity: cfg.channel_capacity.max(1) }
    }
}

pub fn connect_url(endpoint: &str, target: &ConnectTarget) -> String {
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{endpoint}{sep}sessionId={}&clientId={}",
        urlencoding::encode(&target.session_id),
        urlencoding::encode(&target.client_id)
    );
    if let Some(token) = &target.credential {
        url.push_str("&token=");
        url.push_str(&urlencoding::encode(token));
    }
    url
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn Connection>, TransportError> {
        let url = connect_url(&self.endpoint, target);
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::Io("endpoint must start with ws:// or wss://".into()));
        }
        let (ws, _resp) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Io(format!("ws connect: {e}")))?;
        let (writer, mut reader) = ws.split();

        let (tx, rx) = mpsc::channel::<String>(self.capacity);
        tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if tx.send(text).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => debug!("ws: dropping non-utf8 binary frame"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
        });

        Ok(Arc::new(WsConnection {
            writer: tokio::sync::Mutex::new(writer),
            rx_once: Mutex::new(Some(rx)),
        }))
    }
}

struct WsConnection {
    writer: tokio::sync::Mutex<Writer>,
    rx_once: Mutex<Option<mpsc::Receiver<String>>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.writer
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Io(format!("ws send: {e}")))
    }

    fn recv(&self) -> mpsc::Receiver<String> {
        lock(&self.rx_once).take().unwrap_or_else(|| mpsc::channel(1).1)
    }

    async fn close(&self) {
        let _ = self.writer.lock().await.send(Message::Close(None)).await;
    }
}
