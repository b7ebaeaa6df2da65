//! WebSocket transport for the session's connection manager.

use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use glooo_session::{ConnectError, Connector, Link, LinkCommand, LinkEvent};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::api::cookie_header;

/// Close code reported when the peer sent a close frame without a status.
const NO_STATUS_RECEIVED: u16 = 1005;
const ABNORMAL_CLOSURE: u16 = 1006;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn from_tungstenite(err: tungstenite::Error) -> ConnectError {
    let is_connect = match &err {
        tungstenite::Error::Io(io_err) => matches!(
            io_err.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
        ),
        _ => false,
    };
    if is_connect {
        ConnectError::Unavailable
    } else {
        ConnectError::Handshake(err.to_string())
    }
}

/// Dials the chat server's `/chat` endpoint, presenting the session cookie.
#[derive(Clone)]
pub struct WsConnector {
    url: String,
    token: Option<String>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Link, ConnectError>> {
        let url = self.url.clone();
        let token = self.token.clone();
        async move {
            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(|e| ConnectError::Handshake(e.to_string()))?;
            if let Some(token) = token {
                let value = HeaderValue::from_str(&cookie_header(&token))
                    .map_err(|e| ConnectError::Handshake(e.to_string()))?;
                request.headers_mut().insert(COOKIE, value);
            }

            debug!(%url, "dialing");
            let (ws_stream, _) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(from_tungstenite)?;

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(ws_stream, out_rx, in_tx));

            Ok(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
        .boxed()
    }
}

/// Move frames between the socket and the link channels until either side
/// goes away. Exactly one `Closed` is reported unless we hung up ourselves.
async fn pump(
    ws_stream: WsStream,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(LinkCommand::Text(frame)) => {
                        if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                            warn!(error = %e, "write failed");
                            let _ = events.send(LinkEvent::Closed {
                                code: ABNORMAL_CLOSURE,
                                reason: e.to_string(),
                            });
                            break;
                        }
                    }
                    Some(LinkCommand::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: code.into(),
                            reason: reason.into(),
                        };
                        let _ = ws_write.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    None => {
                        // Link dropped by the manager.
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }

            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(LinkEvent::Text(text.to_string())).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                        debug!(code, %reason, "server closed the connection");
                        let _ = events.send(LinkEvent::Closed { code, reason });
                        // Flush the queued close reply.
                        let _ = ws_write.close().await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = events.send(LinkEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: e.to_string(),
                        });
                        break;
                    }
                    None => {
                        let _ = events.send(LinkEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "stream ended".to_string(),
                        });
                        break;
                    }
                }
            }
        }
    }
}
