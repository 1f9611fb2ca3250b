//! WebSocket transport: exactly one long-lived connection per browser
//! process.
//!
//! The transport moves text frames and nothing else -- all JSON lives in the
//! codec. The read half is handed to the single reader task owned by the
//! client; the write half lives here behind a mutex so any task can submit
//! frames.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use periscope_types::CdpError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of the connection, consumed by the client's reader task.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Maximum connection attempts before giving up.
const CONNECT_ATTEMPTS: u32 = 5;
/// Initial backoff delay; doubles per attempt.
const CONNECT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Outbound half of the CDP WebSocket connection.
pub struct Transport {
    writer: Mutex<WsSink>,
}

impl Transport {
    /// Connect to a DevTools WebSocket endpoint with bounded exponential
    /// backoff. Returns the transport and the read half for the reader task.
    pub async fn connect(ws_url: &str) -> Result<(Self, WsReader), CdpError> {
        let mut last_err = String::new();

        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                let delay = CONNECT_BACKOFF_BASE * 2u32.pow(attempt - 1);
                tracing::debug!(url = ws_url, attempt, ?delay, "retrying CDP connection");
                tokio::time::sleep(delay).await;
            }

            match tokio_tungstenite::connect_async(ws_url).await {
                Ok((stream, _)) => {
                    tracing::info!(url = ws_url, "CDP WebSocket connection established");
                    let (writer, reader) = stream.split();
                    return Ok((
                        Self {
                            writer: Mutex::new(writer),
                        },
                        reader,
                    ));
                }
                Err(e) => {
                    last_err = e.to_string();
                    tracing::warn!(url = ws_url, attempt, error = %e, "CDP connection failed");
                }
            }
        }

        Err(CdpError::connection(format!(
            "failed to connect to {ws_url} after {CONNECT_ATTEMPTS} attempts: {last_err}"
        )))
    }

    /// Ship one outbound text frame.
    pub async fn send_text(&self, frame: String) -> Result<(), CdpError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| CdpError::connection(format!("failed to send WebSocket frame: {e}")))
    }

    /// Send a close frame. Errors are ignored -- the peer may already be gone.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
        let _ = writer.flush().await;
    }
}

/// Pull the next text payload off the read half.
///
/// Returns `None` when the connection is finished (close frame, EOF, or a
/// read error, which are all terminal for a CDP stream). Non-text frames
/// other than close are skipped.
pub async fn next_text_frame(reader: &mut WsReader) -> Option<String> {
    loop {
        let msg = match reader.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "WebSocket read error, stopping reader");
                return None;
            }
            None => return None,
        };

        match msg {
            Message::Text(t) => return Some(t.to_string()),
            Message::Binary(b) => match String::from_utf8(b.to_vec()) {
                Ok(s) => return Some(s),
                Err(_) => continue,
            },
            Message::Close(_) => {
                tracing::info!("WebSocket closed by remote");
                return None;
            }
            _ => continue,
        }
    }
}
