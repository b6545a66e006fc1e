use crate::error::SignalingError;
use crate::signaling::channel::{LinkEvent, SignalingConnector, SignalingLink};
use crate::signaling::message::SignalMessage;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{error::ProtocolError, Error as WsError, Message},
};
use tracing::{debug, trace, warn};
use url::Url;

/// Production connector: one WebSocket per signaling connection.
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub fn new(signaling_url: &str) -> Result<Self, SignalingError> {
        Ok(Self {
            url: derive_websocket_url(signaling_url)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

pub(crate) fn derive_websocket_url(raw: &str) -> Result<Url, SignalingError> {
    let mut url = Url::parse(raw).map_err(|err| SignalingError::Url(format!("{raw}: {err}")))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(SignalingError::Url(format!(
                "unsupported scheme `{other}` in {raw}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SignalingError::Url(format!("cannot use scheme {scheme} for {raw}")))?;
    Ok(url)
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn open(&self, session_id: &str) -> Result<SignalingLink, SignalingError> {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("sessionId", session_id);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SignalingError::Connect(err.to_string()))?;
        debug!(url = %self.url, %session_id, "signaling websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (outbound, mut send_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let (recv_tx, inbound) = mpsc::unbounded_channel::<LinkEvent>();

        tokio::spawn(async move {
            while let Some(message) = send_rx.recv().await {
                match message.encode() {
                    Ok(text) => {
                        if ws_write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(kind = %message.kind, error = %err, "failed to encode signaling message"),
                }
            }
            let _ = ws_write.close().await;
        });

        tokio::spawn(async move {
            let reason = loop {
                match ws_read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        trace!(event = "ws_in", kind = "text", len = text.len());
                        if recv_tx.send(LinkEvent::Text(text)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        trace!(event = "ws_in", kind = "binary", len = data.len());
                        match String::from_utf8(data) {
                            Ok(text) => {
                                if recv_tx.send(LinkEvent::Text(text)).is_err() {
                                    return;
                                }
                            }
                            Err(_) => warn!("dropping non utf-8 signaling frame"),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| format!("closed by server ({}): {}", f.code, f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                debug!("signaling websocket closed: {err}");
                            }
                            _ => warn!("signaling websocket error: {err}"),
                        }
                        break err.to_string();
                    }
                    None => break "signaling websocket ended".to_string(),
                }
            };
            let _ = recv_tx.send(LinkEvent::Closed(reason));
        });

        Ok(SignalingLink { outbound, inbound })
    }
}
