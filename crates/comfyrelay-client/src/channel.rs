//! Event channel: the engine's WebSocket progress stream

use comfyrelay_core::{Error, Frame, Result, SessionId};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMsg, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

/// A stream of frames from the engine.
#[async_trait::async_trait]
pub trait EventChannel: Send {
    /// Next text or binary frame. `Ok(None)` once the peer has closed.
    async fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Opens event channels for a session id.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, session: &SessionId) -> Result<Box<dyn EventChannel>>;
}

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// `url` is the bare endpoint, e.g. `ws://127.0.0.1:8188/ws`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_address(address: &str) -> Self {
        Self::new(format!("ws://{}/ws", address))
    }

    pub fn session_url(&self, session: &SessionId) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| Error::ChannelUnavailable(format!("bad channel url {}: {}", self.url, e)))?;
        url.query_pairs_mut().append_pair("clientId", session.as_str());
        Ok(url)
    }
}

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, session: &SessionId) -> Result<Box<dyn EventChannel>> {
        let url = self.session_url(session)?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::ChannelUnavailable(format!("{}: {}", self.url, e)))?;
        info!("Event channel connected: {}", url);
        Ok(Box::new(WsChannel { stream }))
    }
}

pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl EventChannel for WsChannel {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMsg::Text(text))) => return Ok(Some(Frame::Text(text))),
                Some(Ok(WsMsg::Binary(bytes))) => return Ok(Some(Frame::Binary(bytes))),
                Some(Ok(WsMsg::Close(frame))) => {
                    debug!("Event channel closed by peer: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(_)) => continue, // Ping, Pong, raw frames
                Some(Err(e)) => return Err(Error::ChannelClosed(e.to_string())),
                None => return Ok(None),
            }
        }
    }
}
