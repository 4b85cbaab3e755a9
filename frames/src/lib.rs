//! Text frame model and codec for the realtime push channel.
//!
//! Every message on the channel is a single text line of four colon-delimited
//! fields: `<type>:<seq>:<channel>:<payload>`. The sequence and channel fields
//! may be empty; the payload is everything after the third colon and may
//! itself contain colons.

use serde::Serialize;

/// Error returned by [`decode`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// The raw text does not have the four-field `type:seq:channel:payload` shape.
    #[error("malformed frame {raw:?}: {reason}")]
    Malformed { raw: String, reason: &'static str },
    /// The type field is a digit, but not one of the recognised frame types.
    #[error("unrecognised frame type code: {0}")]
    UnknownType(u8),
}

/// Frame type code carried in the first wire field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    /// Server or client is tearing the channel down.
    Disconnect,
    /// Connection acknowledgement sent once after the upgrade.
    Connect,
    /// Keep-alive.
    Heartbeat,
    /// Application event carrying a JSON payload.
    Event,
}

impl FrameType {
    /// Wire digit for this frame type.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Disconnect => 0,
            Self::Connect => 1,
            Self::Heartbeat => 2,
            Self::Event => 5,
        }
    }

    /// Parse a wire digit into a frame type.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownType`] for digits outside the recognised set.
    pub fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            0 => Ok(Self::Disconnect),
            1 => Ok(Self::Connect),
            2 => Ok(Self::Heartbeat),
            5 => Ok(Self::Event),
            other => Err(CodecError::UnknownType(other)),
        }
    }

    /// Control frames carry no application data and are skipped by readers
    /// waiting for some other type.
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Disconnect | Self::Connect | Self::Heartbeat)
    }
}

/// A single message on the realtime wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub kind: FrameType,
    /// Packet sequence number; empty on the wire when `None`.
    pub seq: Option<u64>,
    /// Channel (endpoint) tag; empty on the wire when `None`.
    pub channel: Option<u64>,
    pub payload: String,
}

impl Frame {
    /// Event frame with empty sequence and channel fields.
    #[must_use]
    pub fn event(payload: impl Into<String>) -> Self {
        Self {
            kind: FrameType::Event,
            seq: None,
            channel: None,
            payload: payload.into(),
        }
    }

    /// Render this frame in wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        encode(self.kind, self.seq, self.channel, &self.payload)
    }
}

/// Encode frame fields as `<type>:<seq>:<channel>:<payload>`.
#[must_use]
pub fn encode(kind: FrameType, seq: Option<u64>, channel: Option<u64>, payload: &str) -> String {
    let seq = seq.map(|v| v.to_string()).unwrap_or_default();
    let channel = channel.map(|v| v.to_string()).unwrap_or_default();
    format!("{}:{seq}:{channel}:{payload}", kind.code())
}

/// Decode one wire frame.
///
/// Spaces are stripped from the payload; downstream comparisons are
/// space-insensitive.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] when a field is missing or a numeric
/// field is not numeric, and [`CodecError::UnknownType`] when the type digit
/// is not a recognised frame type.
pub fn decode(raw: &str) -> Result<Frame, CodecError> {
    let malformed = |reason| CodecError::Malformed {
        raw: raw.to_owned(),
        reason,
    };

    let mut fields = raw.splitn(4, ':');
    let (Some(kind), Some(seq), Some(channel), Some(payload)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(malformed("expected four colon-delimited fields"));
    };

    let code = match kind.as_bytes() {
        [digit] if digit.is_ascii_digit() => digit - b'0',
        _ => return Err(malformed("type must be a single digit")),
    };
    let seq = parse_optional_number(seq).ok_or_else(|| malformed("sequence is not numeric"))?;
    let channel =
        parse_optional_number(channel).ok_or_else(|| malformed("channel is not numeric"))?;

    Ok(Frame {
        kind: FrameType::from_code(code)?,
        seq,
        channel,
        payload: payload.replace(' ', ""),
    })
}

/// `Some(None)` for an empty field, `Some(Some(n))` for digits, `None` otherwise.
fn parse_optional_number(field: &str) -> Option<Option<u64>> {
    if field.is_empty() {
        return Some(None);
    }
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse::<u64>().ok().map(Some)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
