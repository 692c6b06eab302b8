//! WebSocket Session (C4): blocking `tungstenite` connection to Kraken's v2
//! endpoint, run entirely on the owning (background I/O) thread. Grounded
//! in the community `krakenrs` client's connect-subscribe-loop shape for
//! this exact exchange (see DESIGN.md) — a deliberate departure from this
//! crate's `tokio`-based ancestor, because §5 of the governing design rules
//! out an async runtime for this pipeline.

use crate::error::{IngestError, Result};
use std::net::TcpStream;
use std::time::Duration;
use tracing::{debug, info, warn};
use tungstenite::{stream::MaybeTlsStream, Message, WebSocket};

pub const KRAKEN_WS_V2_URL: &str = "wss://ws.kraken.com/v2";

/// Read-loop poll interval: short enough that `stop()` (observed only via
/// `should_stop` between reads) is noticed promptly even on a quiet feed.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

type WsStream = WebSocket<MaybeTlsStream<TcpStream>>;

/// A single blocking WebSocket connection. Not `Send`-shared; created,
/// driven, and torn down by one thread.
pub struct WsSession {
    socket: WsStream,
}

fn set_read_timeout(stream: &MaybeTlsStream<TcpStream>, dur: Option<Duration>) -> std::io::Result<()> {
    match stream {
        MaybeTlsStream::Plain(s) => s.set_read_timeout(dur),
        MaybeTlsStream::NativeTls(s) => s.get_ref().set_read_timeout(dur),
        _ => Ok(()),
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}

impl WsSession {
    /// Connect to `url` and send `subscription` once the socket is open.
    /// The underlying socket gets a short read timeout so the blocking
    /// read loop in [`Self::run`] can observe `should_stop` promptly
    /// instead of blocking indefinitely on a quiet feed.
    pub fn connect(url: &str, subscription: &str) -> Result<Self> {
        let (mut socket, _response) =
            tungstenite::connect(url).map_err(|e| IngestError::TransportMsg(format!("connect to {url} failed: {e}")))?;
        info!(url, "websocket connected");

        if let Err(e) = set_read_timeout(socket.get_ref(), Some(READ_POLL_INTERVAL)) {
            warn!(error = %e, "could not set read timeout; stop() may be slow to take effect");
        }

        socket
            .send(Message::Text(subscription.to_string()))
            .map_err(|e| IngestError::TransportMsg(format!("subscription send failed: {e}")))?;
        debug!(payload = subscription, "subscription sent");

        Ok(Self { socket })
    }

    /// Run the blocking read loop, dispatching each text frame to
    /// `on_message`, until the socket closes or `stop` is requested via
    /// `should_stop`. Ping/pong are handled transparently; a `Close` frame
    /// or a fatal read error ends the loop and reports through
    /// `on_lifecycle`.
    pub fn run(
        &mut self,
        should_stop: &dyn Fn() -> bool,
        mut on_message: impl FnMut(&str),
        mut on_lifecycle: impl FnMut(SessionEvent),
    ) {
        loop {
            if should_stop() {
                let _ = self.socket.close(None);
                on_lifecycle(SessionEvent::Closed);
                return;
            }

            match self.socket.read() {
                Ok(Message::Text(text)) => on_message(&text),
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = self.socket.send(Message::Pong(payload)) {
                        warn!(error = %e, "pong send failed");
                    }
                }
                Ok(Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    info!(?frame, "websocket closed by peer");
                    on_lifecycle(SessionEvent::Closed);
                    return;
                }
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    on_lifecycle(SessionEvent::Closed);
                    return;
                }
                Err(tungstenite::Error::Io(ref e)) if is_timeout(e) => {
                    // Read poll interval elapsed with nothing to read; loop
                    // back around to re-check should_stop.
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "transport error");
                    on_lifecycle(SessionEvent::Error(e.to_string()));
                    return;
                }
            }
        }
    }

    pub fn stop(&mut self) -> Result<()> {
        self.socket
            .close(None)
            .map_err(|e| IngestError::TransportMsg(format!("close failed: {e}")))
    }
}

/// Lifecycle events reported to the ingestion client's connection callback.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Closed,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_to_unroutable_address_reports_transport_error() {
        let result = WsSession::connect("ws://127.0.0.1:1/", "{}");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), IngestError::TransportMsg(_)));
    }
}
