//! Realtime push channel: negotiation, upgrade, framed send/receive.
//!
//! A channel is opened in two phases. An HTTP negotiation call allocates a
//! connection id, then a websocket is opened at a URL derived from that id and
//! the server must answer with a connect frame before anything else is sent.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use frames::{CodecError, FrameType};
use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use traces::TraceLog;

use crate::HarnessError;
use crate::http::{HttpClient, Session};

/// Path of the negotiation endpoint under the service host.
pub const NEGOTIATION_PATH: &str = "/socket.io/1/";

const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Stand-in deadline when `now + deadline` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Result of the negotiation call: `id:heartbeat:close:transports`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Negotiation {
    pub id: String,
    pub heartbeat_timeout: Option<u64>,
    pub close_timeout: Option<u64>,
    pub transports: Vec<String>,
}

/// Parse a plain-text negotiation body. Only the id is required.
///
/// # Errors
///
/// Returns [`HarnessError::NegotiationFailed`] when the id field is empty.
pub fn parse_negotiation(body: &str) -> Result<Negotiation, HarnessError> {
    let mut fields = body.trim().split(':');
    let id = fields.next().unwrap_or_default().trim();
    if id.is_empty() {
        return Err(HarnessError::NegotiationFailed(format!(
            "no connection id in response {body:?}"
        )));
    }

    let heartbeat_timeout = fields.next().and_then(|s| s.trim().parse().ok());
    let close_timeout = fields.next().and_then(|s| s.trim().parse().ok());
    let transports = fields
        .next()
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Ok(Negotiation {
        id: id.to_owned(),
        heartbeat_timeout,
        close_timeout,
        transports,
    })
}

/// Allocate a connection id via the negotiation endpoint on `host`. The
/// exchange, body included, lands in `trace`.
///
/// # Errors
///
/// Returns [`HarnessError::NegotiationFailed`] on any HTTP failure or an
/// unusable body.
pub async fn negotiate(
    http: &HttpClient,
    session: &mut Session,
    host: &str,
    trace: &mut TraceLog,
) -> Result<Negotiation, HarnessError> {
    let url = format!("http://{host}{NEGOTIATION_PATH}");
    let stamp = cache_buster();
    let response = http
        .get(session, &url, &[("t", stamp.as_str())], None, true, trace)
        .await
        .map_err(|e| HarnessError::NegotiationFailed(e.to_string()))?;

    let negotiation = parse_negotiation(&response.body)?;
    tracing::info!(%host, id = %negotiation.id, "negotiated");
    Ok(negotiation)
}

/// What a reader waiting for one frame type does with an arriving frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The awaited type: hand the payload to the caller.
    Deliver,
    /// A control frame: drop it and keep reading.
    Discard,
    /// Any other type: protocol mismatch.
    Reject,
}

#[must_use]
pub fn classify(actual: FrameType, expected: FrameType) -> Disposition {
    if actual == expected {
        Disposition::Deliver
    } else if actual.is_control() {
        Disposition::Discard
    } else {
        Disposition::Reject
    }
}

/// websocket URL for a negotiated connection id.
#[must_use]
pub fn channel_url(host: &str, negotiation_id: &str) -> String {
    format!("ws://{host}/socket.io/1/websocket/{negotiation_id}")
}

/// An open realtime connection.
///
/// Closing consumes the handle, so a connection is released at most once;
/// dropping an unclosed handle drops the socket.
pub struct RealtimeChannel {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    negotiation_id: String,
}

impl RealtimeChannel {
    /// Upgrade to the websocket for `negotiation_id` and wait for the connect
    /// acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::HandshakeFailed`] if the upgrade fails or no
    /// connect frame arrives within `deadline`.
    pub async fn open(
        host: &str,
        negotiation_id: &str,
        deadline: Duration,
        trace: &mut TraceLog,
    ) -> Result<Self, HarnessError> {
        let url = channel_url(host, negotiation_id);
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| HarnessError::HandshakeFailed(format!("upgrade to {url} failed: {e}")))?;

        let mut channel = Self {
            stream,
            negotiation_id: negotiation_id.to_owned(),
        };
        if let Err(e) = channel.receive(FrameType::Connect, deadline, trace).await {
            channel.close().await;
            return Err(HarnessError::HandshakeFailed(format!(
                "no connect acknowledgement: {e}"
            )));
        }

        tracing::info!(%host, id = %negotiation_id, "channel open");
        Ok(channel)
    }

    #[must_use]
    pub fn negotiation_id(&self) -> &str {
        &self.negotiation_id
    }

    /// Write one wire frame. No retry.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the socket write fails.
    pub async fn send(&mut self, wire: &str) -> Result<(), HarnessError> {
        tracing::info!(frame = %wire, "frame sent");
        self.stream.send(Message::text(wire.to_owned())).await?;
        Ok(())
    }

    /// Read frames until one of type `expected` arrives and return its
    /// space-stripped payload.
    ///
    /// Control frames of other types are discarded. Any other type aborts with
    /// [`HarnessError::UnexpectedFrameType`]. The deadline bounds every socket
    /// read, so the call returns [`HarnessError::ReceiveTimeout`] no later than
    /// `deadline` after it started.
    ///
    /// Every decoded frame, discarded or not, is recorded in `trace`; text that
    /// fails to decode is recorded as a note.
    ///
    /// # Errors
    ///
    /// Returns timeout, frame-type, decode, or transport errors.
    pub async fn receive(
        &mut self,
        expected: FrameType,
        deadline: Duration,
        trace: &mut TraceLog,
    ) -> Result<String, HarnessError> {
        let until = deadline_from_now(deadline);
        loop {
            let next = tokio::time::timeout_at(until, self.stream.next())
                .await
                .map_err(|_| HarnessError::ReceiveTimeout(deadline))?;
            let Some(message) = next else {
                return Err(HarnessError::WsClosed);
            };
            let text = match message? {
                Message::Text(text) => text,
                Message::Close(_) => return Err(HarnessError::WsClosed),
                _ => continue,
            };
            tracing::info!(frame = %text.as_str(), "frame received");

            let frame = match frames::decode(text.as_str()) {
                Ok(frame) => frame,
                Err(e) => {
                    trace.note(&format!("undecodable frame {:?}: {e}", text.as_str()));
                    return Err(decode_error(e, expected));
                }
            };
            trace.frame_received(frame.kind, &frame.payload);

            match classify(frame.kind, expected) {
                Disposition::Deliver => return Ok(frame.payload),
                Disposition::Discard => {
                    tracing::debug!(kind = ?frame.kind, "control frame discarded");
                }
                Disposition::Reject => {
                    return Err(HarnessError::UnexpectedFrameType {
                        expected: expected.code(),
                        actual: frame.kind.code(),
                    });
                }
            }
        }
    }

    /// Release the connection. Never fails; a close that cannot complete is
    /// logged and the socket is dropped.
    pub async fn close(mut self) {
        match tokio::time::timeout(CLOSE_GRACE, self.stream.close(None)).await {
            Ok(Ok(())) => tracing::info!(id = %self.negotiation_id, "channel closed"),
            Ok(Err(e)) => tracing::warn!(id = %self.negotiation_id, error = %e, "channel close failed"),
            Err(_) => tracing::warn!(id = %self.negotiation_id, "channel close timed out"),
        }
    }
}

/// An unrecognised type code is a frame-type mismatch rather than a
/// malformed frame.
fn decode_error(error: CodecError, expected: FrameType) -> HarnessError {
    match error {
        CodecError::UnknownType(actual) => HarnessError::UnexpectedFrameType {
            expected: expected.code(),
            actual,
        },
        other => other.into(),
    }
}

fn deadline_from_now(deadline: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(deadline)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Millisecond timestamp used to defeat caching of the negotiation call.
fn cache_buster() -> String {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return "0".to_owned();
    };
    duration.as_millis().to_string()
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
