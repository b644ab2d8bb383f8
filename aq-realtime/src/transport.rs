//! Transport seam between the channel manager and the network.
//!
//! The manager only sees a [`Connection`]: an outbound frame sender and an
//! inbound event receiver. [`WsConnector`] provides them over
//! `tokio-tungstenite`; tests plug in a scripted connector instead.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use aq_core::config::EndpointConfig;
use aq_core::constants::{close_codes, TOKEN_QUERY_PARAM};
use aq_core::error::{AqError, AqResult};

use crate::channel::Channel;

/// Frame handed to a connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A JSON text frame.
    Text(String),
    /// Close the connection with the given code.
    Close { code: u16 },
}

/// Event surfaced by a connection's reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Frame(String),
    /// The underlying socket reported an error. A `Closed` event follows.
    Error(String),
    /// The connection closed with the given code.
    Closed { code: u16 },
}

/// An open connection.
///
/// Dropping `outbound` asks the writer to close the socket cleanly.
/// `inbound` ends after a final `Closed` event.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens connections to channel endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`. Resolves once the connection is usable.
    async fn open(&self, url: &str) -> AqResult<Connection>;
}

/// Resolve the URL for `channel`, appending the bearer token when present.
pub fn endpoint_url(
    endpoints: &EndpointConfig,
    channel: Channel,
    token: Option<&str>,
) -> AqResult<String> {
    let mut url = Url::parse(&endpoints.url_for(channel.as_str()))?;
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
    }
    Ok(url.into())
}

/// Connector backed by `tokio-tungstenite`.
///
/// Each open connection gets a writer task draining [`OutboundFrame`]s into
/// the socket sink and a reader task forwarding frames as
/// [`TransportEvent`]s. Protocol-level pings are answered by tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> AqResult<Connection> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| AqError::Socket(format!("connect failed: {e}")))?;
        debug!(status = response.status().as_u16(), "websocket handshake complete");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            loop {
                let (message, closing) = match out_rx.recv().await {
                    Some(OutboundFrame::Text(text)) => (Message::Text(text.into()), false),
                    Some(OutboundFrame::Close { code }) => (close_message(code), true),
                    None => (close_message(close_codes::NORMAL), true),
                };
                if let Err(e) = sink.send(message).await {
                    warn!("websocket write failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            let mut code = close_codes::ABNORMAL;
            while let Some(message) = source.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text.to_string()),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => TransportEvent::Error("non-utf8 binary frame".into()),
                    },
                    Ok(Message::Close(frame)) => {
                        code = frame.map_or(close_codes::NO_STATUS, |f| u16::from(f.code));
                        info!(code, "websocket closed by peer");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                };
                if in_tx.send(event).is_err() {
                    // Manager dropped this connection.
                    return;
                }
            }
            let _ = in_tx.send(TransportEvent::Closed { code });
        });

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

fn close_message(code: u16) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_without_token() {
        let endpoints = EndpointConfig::with_base_url("wss://api.example.com/ws");
        let url = endpoint_url(&endpoints, Channel::Market, None).unwrap();
        assert_eq!(url, "wss://api.example.com/ws/market");

        let url = endpoint_url(&endpoints, Channel::Market, Some("")).unwrap();
        assert_eq!(url, "wss://api.example.com/ws/market");
    }

    #[test]
    fn test_endpoint_url_appends_token() {
        let endpoints = EndpointConfig::with_base_url("ws://localhost:8000/ws");
        let url = endpoint_url(&endpoints, Channel::Crisis, Some("abc.def+ghi")).unwrap();
        assert_eq!(url, "ws://localhost:8000/ws/crisis?token=abc.def%2Bghi");
    }

    #[test]
    fn test_endpoint_url_keeps_existing_query() {
        let mut endpoints = EndpointConfig::default();
        endpoints
            .channels
            .insert("agents".into(), "wss://agents.example.com/stream?v=2".into());
        let url = endpoint_url(&endpoints, Channel::Agents, Some("t")).unwrap();
        assert_eq!(url, "wss://agents.example.com/stream?v=2&token=t");
    }

    #[test]
    fn test_endpoint_url_rejects_garbage() {
        let endpoints = EndpointConfig::with_base_url("::not a url::");
        assert!(endpoint_url(&endpoints, Channel::Market, None)
            .unwrap_err()
            .is_config_error());
    }

    #[tokio::test]
    async fn test_ws_connector_reports_refused_connection() {
        // Port 9 (discard) is closed on test machines; the open must fail, not hang.
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            WsConnector::new().open("ws://127.0.0.1:9/ws/market"),
        )
        .await;
        if let Ok(result) = result {
            assert!(matches!(result, Err(AqError::Socket(_))));
        }
    }
}
