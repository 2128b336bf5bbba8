//! WebSocket channel transport
//!
//! Endpoint and bearer token come from the descriptor on every connect,
//! so a reconnect presents the same credentials.

use contracts::{ChannelConnector, ChannelDescriptor, ChannelLink, StreamError};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, trace};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket links
#[derive(Debug, Clone, Copy, Default)]
pub struct WsChannelConnector;

impl WsChannelConnector {
    pub fn new() -> Self {
        Self
    }
}

impl ChannelConnector for WsChannelConnector {
    type Link = WsChannelLink;

    #[instrument(
        name = "ws_connect",
        skip(self, descriptor),
        fields(channel = %descriptor.channel_name)
    )]
    async fn connect(&self, descriptor: &ChannelDescriptor) -> Result<WsChannelLink, StreamError> {
        let name = &descriptor.channel_name;
        let mut request = descriptor
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::transport(name, format!("invalid endpoint: {e}")))?;

        if let Some(token) = &descriptor.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StreamError::transport(name, format!("invalid auth token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, response) = connect_async(request)
            .await
            .map_err(|e| StreamError::transport(name, e.to_string()))?;
        debug!(status = %response.status(), "WebSocket opened");

        Ok(WsChannelLink {
            channel_name: name.clone(),
            socket,
        })
    }
}

/// An open WebSocket
pub struct WsChannelLink {
    channel_name: String,
    socket: Socket,
}

impl ChannelLink for WsChannelLink {
    async fn send(&mut self, frame: String) -> Result<(), StreamError> {
        self.socket
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| StreamError::transport(&self.channel_name, e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, StreamError>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => {
                    return Some(String::from_utf8(data.to_vec()).map_err(|_| {
                        StreamError::protocol(&self.channel_name, "binary frame is not UTF-8")
                    }))
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Peer sent close frame");
                    return None;
                }
                // control frames are answered by tungstenite
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                    trace!("control frame");
                }
                Err(e) => {
                    return Some(Err(StreamError::transport(
                        &self.channel_name,
                        e.to_string(),
                    )))
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}
