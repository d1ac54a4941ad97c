//! OCPP 1.6 WebSocket transport
//!
//! Accepts device connections at `ws://<host>:<port>/ocpp/{deviceId}`
//! (also `/{deviceId}` or `/?charger={deviceId}`). Each connection gets a
//! writer task draining the session's outbound channel and a reader that
//! feeds frames to the dispatcher. Whichever side ends first ends both.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::application::handlers::SharedMessageDispatcher;
use crate::application::protocol::SharedProtocolManager;
use crate::application::session::{
    EvictionReason, Outbound, OutboundReceiver, RegistryError, Session, SharedSessionRegistry,
};
use crate::domain::ProtocolType;
use crate::support::shutdown::ShutdownSignal;

/// OCPP 1.6 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Time the writer gets to flush a close frame after the reader ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<TcpStream>;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionEnd {
    PeerClosed,
    TransportError(String),
    WriterClosed,
    Shutdown,
}

pub struct OcppServer {
    registry: SharedSessionRegistry,
    dispatcher: SharedMessageDispatcher,
    manager: SharedProtocolManager,
    /// Heartbeat interval assumed until the device boots.
    default_heartbeat_interval: u32,
}

impl OcppServer {
    pub fn new(
        registry: SharedSessionRegistry,
        dispatcher: SharedMessageDispatcher,
        manager: SharedProtocolManager,
        default_heartbeat_interval: u32,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            manager,
            default_heartbeat_interval,
        }
    }

    /// Accept connections on `listener` until `shutdown` fires.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: ShutdownSignal) {
        match listener.local_addr() {
            Ok(addr) => {
                info!(%addr, "OCPP 1.6 Central System listening");
                info!("Devices should connect to: ws://{addr}/ocpp/{{deviceId}}");
            }
            Err(e) => warn!(error = %e, "OCPP listener has no local address"),
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = Arc::clone(&self);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, addr, shutdown).await;
                        });
                    }
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                _ = shutdown.wait() => {
                    info!("WebSocket server received shutdown signal");
                    break;
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, shutdown: ShutdownSignal) {
        debug!(%addr, "New TCP connection");

        let mut device_id: Option<String> = None;
        let handshake = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let Some(id) = extract_device_id(req.uri().path(), req.uri().query()) else {
                    warn!(%addr, path = req.uri().path(), "Handshake without device id");
                    return Err(reject(StatusCode::BAD_REQUEST, "Missing device id"));
                };
                device_id = Some(id);
                Ok(negotiate_subprotocol(req, response))
            },
        )
        .await;

        let mut ws = match handshake {
            Ok(ws) => ws,
            Err(e) => {
                warn!(%addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };
        let Some(device_id) = device_id else {
            return;
        };

        let (session, rx) =
            Session::channel(device_id.as_str(), ProtocolType::Ocpp, self.default_heartbeat_interval);
        let session = Arc::new(session);

        if let Err(e) = self.registry.admit(Arc::clone(&session)) {
            warn!(device_id = %device_id, error = %e, "Connection refused");
            let code = match e {
                RegistryError::CapacityExceeded { .. } => CloseCode::Policy,
                _ => CloseCode::Protocol,
            };
            let frame = CloseFrame {
                code,
                reason: e.to_string().into(),
            };
            if let Err(e) = ws.close(Some(frame)).await {
                debug!(device_id = %device_id, error = %e, "Close after refusal failed");
            }
            return;
        }

        self.manager.record_connected(&device_id, ProtocolType::Ocpp);
        info!(device_id = %device_id, %addr, "Device connected");

        let (sink, mut stream) = ws.split();
        let mut writer = tokio::spawn(write_loop(sink, rx, device_id.clone()));

        let end = tokio::select! {
            end = self.read_loop(&session, &mut stream) => end,
            _ = &mut writer => ConnectionEnd::WriterClosed,
            _ = shutdown.wait() => ConnectionEnd::Shutdown,
        };

        let reason = match &end {
            ConnectionEnd::TransportError(e) => {
                warn!(device_id = %device_id, error = %e, "Transport error");
                session.fail();
                EvictionReason::TransportClosed
            }
            ConnectionEnd::Shutdown => EvictionReason::Shutdown,
            ConnectionEnd::PeerClosed | ConnectionEnd::WriterClosed => {
                EvictionReason::TransportClosed
            }
        };

        // Only this session: a replacement may already own the device id.
        self.registry.evict_session(&session, reason);
        if !self.registry.is_live(&device_id) {
            self.manager.record_disconnected(&device_id);
        }

        if !writer.is_finished()
            && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
                .await
                .is_err()
        {
            writer.abort();
        }

        info!(device_id = %device_id, ?end, "Device disconnected");
    }

    async fn read_loop(
        &self,
        session: &Session,
        stream: &mut SplitStream<WsStream>,
    ) -> ConnectionEnd {
        let device_id = session.device_code();
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    debug!(device_id, frame = %text, "<-");
                    if let Some(reply) = self.dispatcher.handle_text(session, &text) {
                        if let Err(e) = session.send(reply.serialize()) {
                            debug!(device_id, error = %e, "Reply not sent");
                            return ConnectionEnd::WriterClosed;
                        }
                    }
                }
                Ok(Message::Binary(data)) => {
                    warn!(device_id, len = data.len(), "Binary message ignored");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    debug!(device_id, ?frame, "Close frame received");
                    return ConnectionEnd::PeerClosed;
                }
                Err(e) => return ConnectionEnd::TransportError(e.to_string()),
            }
        }
        ConnectionEnd::PeerClosed
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: OutboundReceiver,
    device_id: String,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(text) => {
                debug!(device_id = %device_id, frame = %text, "->");
                if let Err(e) = sink.send(Message::Text(text)).await {
                    error!(device_id = %device_id, error = %e, "Send error");
                    return;
                }
            }
            Outbound::Close(reason) => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: reason.unwrap_or_default().into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(device_id = %device_id, error = %e, "Close frame not sent");
                }
                return;
            }
        }
    }
}

/// Echo `ocpp1.6` when the client offers it.
fn negotiate_subprotocol(req: &Request, mut response: Response) -> Response {
    let offered = req
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if offered
        .split(',')
        .map(str::trim)
        .any(|p| p == OCPP_SUBPROTOCOL)
    {
        response.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(OCPP_SUBPROTOCOL),
        );
    } else if !offered.is_empty() {
        warn!(offered, "Client did not offer ocpp1.6");
    }
    response
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Device id from `/ocpp/{id}`, `/{id}` or the `charger` query parameter.
fn extract_device_id(path: &str, query: Option<&str>) -> Option<String> {
    let path = path.trim_matches('/');

    if let Some(id) = path.strip_prefix("ocpp/") {
        let id = id.trim_matches('/');
        if !id.is_empty() && !id.contains('/') {
            return Some(id.to_string());
        }
    } else if !path.is_empty() && path != "ocpp" && !path.contains('/') {
        return Some(path.to_string());
    }

    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "charger")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_from_path() {
        assert_eq!(extract_device_id("/ocpp/CP-1", None).as_deref(), Some("CP-1"));
        assert_eq!(extract_device_id("/ocpp/CP-1/", None).as_deref(), Some("CP-1"));
        assert_eq!(extract_device_id("/CP-2", None).as_deref(), Some("CP-2"));
    }

    #[test]
    fn device_id_from_query() {
        assert_eq!(
            extract_device_id("/ocpp", Some("charger=CP-3")).as_deref(),
            Some("CP-3")
        );
        assert_eq!(
            extract_device_id("/", Some("a=1&charger=CP-4")).as_deref(),
            Some("CP-4")
        );
    }

    #[test]
    fn missing_device_id() {
        assert_eq!(extract_device_id("/", None), None);
        assert_eq!(extract_device_id("/ocpp/", None), None);
        assert_eq!(extract_device_id("/ocpp", Some("charger=")), None);
        assert_eq!(extract_device_id("/a/b", None), None);
    }

    #[test]
    fn rejection_carries_status() {
        let resp = reject(StatusCode::BAD_REQUEST, "Missing device id");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.body().as_deref(), Some("Missing device id"));
    }
}
