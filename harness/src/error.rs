use std::time::Duration;

/// Error type for harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A received frame did not match the four-field wire shape.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] frames::CodecError),
    /// The negotiation request failed or returned no connection id.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),
    /// The channel upgrade failed or no connect acknowledgement arrived.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    /// A frame of a non-control type other than the awaited one arrived.
    #[error("unexpected frame type {actual} while waiting for type {expected}")]
    UnexpectedFrameType { expected: u8, actual: u8 },
    /// No qualifying frame arrived before the deadline.
    #[error("no frame received within {0:?}")]
    ReceiveTimeout(Duration),
    /// An HTTP call returned a status outside the accepted set.
    #[error("problem during {request}: status {status}, expected one of {expected:?}")]
    UnexpectedStatus {
        request: String,
        status: u16,
        expected: Vec<u16>,
    },
    #[error("login verification failed: {0}")]
    LoginVerificationFailed(String),
    #[error("error on setting state to '{status}:{status_code}': actual is {actual:?}, expected is {expected:?}")]
    StateVerificationFailed {
        status: String,
        status_code: String,
        actual: String,
        expected: String,
    },
    #[error("logout verification failed: {0}")]
    LogoutVerificationFailed(String),
    /// A command payload could not be serialised.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    /// An HTTP request failed below the status level.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    /// The websocket transport failed.
    #[error("websocket transport failed: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    /// The websocket connection was closed by the peer.
    #[error("websocket closed")]
    WsClosed,
    /// An operation was called from a state that does not allow it.
    #[error("{operation} is not valid in state {state}")]
    InvalidTransition {
        operation: &'static str,
        state: String,
    },
}

/// Coarse classification of a [`HarnessError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedFrame,
    NegotiationFailed,
    HandshakeFailed,
    UnexpectedFrameType,
    ReceiveTimeout,
    UnexpectedStatus,
    LoginVerificationFailed,
    StateVerificationFailed,
    LogoutVerificationFailed,
    Transport,
    InvalidTransition,
}

impl HarnessError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedFrame(_) | Self::Encode(_) => ErrorKind::MalformedFrame,
            Self::NegotiationFailed(_) => ErrorKind::NegotiationFailed,
            Self::HandshakeFailed(_) => ErrorKind::HandshakeFailed,
            Self::UnexpectedFrameType { .. } => ErrorKind::UnexpectedFrameType,
            Self::ReceiveTimeout(_) => ErrorKind::ReceiveTimeout,
            Self::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatus,
            Self::LoginVerificationFailed(_) => ErrorKind::LoginVerificationFailed,
            Self::StateVerificationFailed { .. } => ErrorKind::StateVerificationFailed,
            Self::LogoutVerificationFailed(_) => ErrorKind::LogoutVerificationFailed,
            Self::Http(_) | Self::InvalidHeader(_) | Self::Ws(_) | Self::WsClosed => {
                ErrorKind::Transport
            }
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HarnessError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Ws(Box::new(error))
    }
}
