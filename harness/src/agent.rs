//! Session orchestrator: login, state changes over the channel, logout.
//!
//! STATE MACHINE
//! =============
//! `Anonymous → Authenticating → Authenticated → ChannelOpen → Closing → Closed`,
//! with `Failed(kind)` reachable from any of them. `ChannelOpen` loops on
//! itself for each state change. Nothing is retried; the first error moves the
//! session to `Failed` and releases the channel before it is returned.

use std::fmt;

use frames::{Frame, FrameType};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime};
use traces::TraceLog;

use crate::channel::{self, RealtimeChannel};
use crate::config::{Credentials, HarnessConfig};
use crate::http::{HttpClient, HttpResponse, Session};
use crate::{ErrorKind, HarnessError};

pub const STATUS_SET_EVENT: &str = "agent:status:set";
pub const STATUS_UPDATED_EVENT: &str = "agent:status:updated";

/// Status code the service echoes in every acknowledgement, whichever code
/// was requested.
// NOTE: the service has been observed echoing this for `break` too; it may be
// a service defect rather than a contract. Compared literally until confirmed.
pub const ACKNOWLEDGED_STATUS_CODE: &str = "ready-call";

/// Status codes the service accepts.
pub const KNOWN_STATUS_CODES: [&str; 11] = [
    "ready-call-vm",
    "ready-call",
    "ready-vm",
    "break",
    "email",
    "fax",
    "follow-up-work",
    "meal",
    "meeting",
    "team-meeting",
    "training",
];

const USER_ID_COOKIE: &str = "userId";
const SESSION_TOKEN_COOKIE: &str = "sessionToken";

/// A status label paired with its status code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentStatus {
    pub label: String,
    pub code: String,
}

impl AgentStatus {
    #[must_use]
    pub fn new(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            code: code.into(),
        }
    }

    #[must_use]
    pub fn available() -> Self {
        Self::new("Available", "ready-call")
    }

    #[must_use]
    pub fn unavailable() -> Self {
        Self::new("Unavailable", "break")
    }

    /// Parse `Label:code`, rejecting codes the service does not know.
    ///
    /// # Errors
    ///
    /// Returns a message describing the problem.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let Some((label, code)) = raw.split_once(':') else {
            return Err(format!("expected Label:code, got {raw:?}"));
        };
        let (label, code) = (label.trim(), code.trim());
        if label.is_empty() {
            return Err(format!("missing status label in {raw:?}"));
        }
        if !KNOWN_STATUS_CODES.contains(&code) {
            return Err(format!(
                "unknown status code {code:?}; expected one of {}",
                KNOWN_STATUS_CODES.join(", ")
            ));
        }
        Ok(Self::new(label, code))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
    ChannelOpen,
    Closing,
    Closed,
    Failed(ErrorKind),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "Failed({kind:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    first_name: String,
    last_name: String,
    login_date: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusArgs<'a> {
    agent_id: &'a str,
    status: &'a str,
    status_code: &'a str,
}

#[derive(Serialize)]
struct StatusCommand<'a> {
    name: &'a str,
    args: [StatusArgs<'a>; 1],
}

#[derive(Serialize)]
struct StatusUpdate<'a> {
    name: &'a str,
    args: StatusArgs<'a>,
}

/// JSON payload of a state-change event.
///
/// # Errors
///
/// Returns a serde error if the payload cannot be serialised.
pub fn status_command(
    user_id: &str,
    status: &str,
    status_code: &str,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&StatusCommand {
        name: STATUS_SET_EVENT,
        args: [StatusArgs {
            agent_id: user_id,
            status,
            status_code,
        }],
    })
}

/// Check a login response body against the configured identity.
///
/// # Errors
///
/// Returns [`HarnessError::LoginVerificationFailed`] naming the first field
/// that does not match.
pub fn verify_login(
    response: &HttpResponse,
    config: &HarnessConfig,
) -> Result<OffsetDateTime, HarnessError> {
    let body = response.json::<LoginResponse>().map_err(|e| {
        HarnessError::LoginVerificationFailed(format!("unreadable login response: {e}"))
    })?;
    expect_field("firstName", &body.first_name, &config.expected_first_name)?;
    expect_field("lastName", &body.last_name, &config.expected_last_name)?;
    parse_login_date(&body.login_date)
}

/// Parse a `YYYY-MM-DDTHH:MM:SSZ` login timestamp as UTC.
///
/// # Errors
///
/// Returns [`HarnessError::LoginVerificationFailed`] for any other shape.
pub fn parse_login_date(raw: &str) -> Result<OffsetDateTime, HarnessError> {
    let format = time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    PrimitiveDateTime::parse(raw, format)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| {
            HarnessError::LoginVerificationFailed(format!(
                "loginDate {raw:?} is not YYYY-MM-DDTHH:MM:SSZ: {e}"
            ))
        })
}

/// Compare an acknowledgement payload with the expected echo, ignoring case
/// and spaces.
///
/// # Errors
///
/// Returns [`HarnessError::StateVerificationFailed`] on mismatch.
pub fn verify_acknowledgement(
    payload: &str,
    user_id: &str,
    status: &str,
    status_code: &str,
) -> Result<(), HarnessError> {
    let expected = serde_json::to_string(&StatusUpdate {
        name: STATUS_UPDATED_EVENT,
        args: StatusArgs {
            agent_id: user_id,
            status,
            status_code: ACKNOWLEDGED_STATUS_CODE,
        },
    })?;
    let expected = expected.replace(' ', "").to_lowercase();
    let actual = payload.replace(' ', "").to_lowercase();
    if actual == expected {
        return Ok(());
    }
    Err(HarnessError::StateVerificationFailed {
        status: status.to_owned(),
        status_code: status_code.to_owned(),
        actual,
        expected,
    })
}

/// A logout must answer without content.
///
/// # Errors
///
/// Returns [`HarnessError::LogoutVerificationFailed`] when the body is not empty.
pub fn verify_logout(response: &HttpResponse) -> Result<(), HarnessError> {
    if response.body.is_empty() {
        return Ok(());
    }
    Err(HarnessError::LogoutVerificationFailed(format!(
        "logout response should have no content, but got {:?}",
        response.body
    )))
}

fn expect_field(field: &str, actual: &str, expected: &str) -> Result<(), HarnessError> {
    if actual == expected {
        return Ok(());
    }
    Err(HarnessError::LoginVerificationFailed(format!(
        "error on checking '{field}': actual is {actual:?}, expected is {expected:?}"
    )))
}

/// Drives one agent through the whole session lifecycle.
pub struct AgentSession {
    config: HarnessConfig,
    credentials: Credentials,
    http: HttpClient,
    session: Session,
    channel: Option<RealtimeChannel>,
    channels_released: usize,
    state: SessionState,
    trace: TraceLog,
}

impl AgentSession {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: HarnessConfig, credentials: Credentials) -> Result<Self, HarnessError> {
        let http = HttpClient::new(config.http_timeout)?;
        let session = Session::new(config.base_url());
        Ok(Self {
            config,
            credentials,
            http,
            session,
            channel: None,
            channels_released: 0,
            state: SessionState::Anonymous,
            trace: TraceLog::new(),
        })
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.session.user_id.as_deref()
    }

    #[must_use]
    pub fn channel_open(&self) -> bool {
        self.channel.is_some()
    }

    /// How many channel connections this session has closed.
    #[must_use]
    pub fn channels_released(&self) -> usize {
        self.channels_released
    }

    #[must_use]
    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    /// Give up the trace; an open channel is dropped with the session.
    #[must_use]
    pub fn into_trace(self) -> TraceLog {
        self.trace
    }

    /// Authenticate, then negotiate and open the realtime channel.
    ///
    /// # Errors
    ///
    /// [`HarnessError::LoginVerificationFailed`] for a rejected or mismatching
    /// login, negotiation/handshake errors for the channel phase.
    pub async fn login(&mut self) -> Result<(), HarnessError> {
        self.expect_state(SessionState::Anonymous, "login")?;
        self.trace.begin_step("Login");
        self.state = SessionState::Authenticating;

        if let Err(e) = self.authenticate().await {
            return Err(self.fail(e).await);
        }
        self.state = SessionState::Authenticated;

        match self.connect_channel().await {
            Ok(channel) => {
                self.channel = Some(channel);
                self.state = SessionState::ChannelOpen;
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Request a status change and verify the acknowledgement.
    ///
    /// # Errors
    ///
    /// [`HarnessError::StateVerificationFailed`] on a mismatching
    /// acknowledgement, or the receive error that prevented one.
    pub async fn set_state(&mut self, status: &str, status_code: &str) -> Result<(), HarnessError> {
        self.expect_state(SessionState::ChannelOpen, "set_state")?;
        self.trace
            .begin_step(&format!("Set Agent State({status}, {status_code})"));

        match self.exchange_status(status, status_code).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// End the HTTP session and close the channel. The channel is closed even
    /// when the logout call fails.
    ///
    /// # Errors
    ///
    /// [`HarnessError::LogoutVerificationFailed`] for any logout failure.
    pub async fn logout(&mut self) -> Result<(), HarnessError> {
        self.expect_state(SessionState::ChannelOpen, "logout")?;
        self.trace.begin_step("Logout");
        self.state = SessionState::Closing;

        let result = self.end_http_session().await;
        self.release_channel().await;

        match result {
            Ok(()) => {
                self.state = SessionState::Closed;
                tracing::info!(user_id = ?self.session.user_id, "session closed");
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Login, apply each status in order, logout. `progress` receives a line
    /// describing each step before it runs.
    ///
    /// # Errors
    ///
    /// Returns the first step error; later steps are skipped.
    pub async fn run_lifecycle(
        &mut self,
        statuses: &[AgentStatus],
        mut progress: impl FnMut(&str),
    ) -> Result<(), HarnessError> {
        progress(&format!(
            "Login({}, {}, {})",
            self.credentials.username, self.config.connection_type, self.config.station
        ));
        self.login().await?;

        for status in statuses {
            progress(&format!("Set Agent State({}, {})", status.label, status.code));
            self.set_state(&status.label, &status.code).await?;
        }

        progress("Logout()");
        self.logout().await
    }

    async fn authenticate(&mut self) -> Result<(), HarnessError> {
        let form = [
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("extension", self.config.station.as_str()),
            ("connectionType", self.config.connection_type.as_str()),
        ];
        let response = self
            .http
            .post(&mut self.session, "/login", &form, &[200], &mut self.trace)
            .await
            .map_err(|e| match e {
                HarnessError::UnexpectedStatus { .. } => {
                    HarnessError::LoginVerificationFailed(e.to_string())
                }
                other => other,
            })?;

        let logged_in_at = verify_login(&response, &self.config)?;
        let user_id = required_cookie(&self.session, USER_ID_COOKIE)?;
        let token = required_cookie(&self.session, SESSION_TOKEN_COOKIE)?;

        tracing::info!(%user_id, ?logged_in_at, "login verified");
        self.session.user_id = Some(user_id);
        self.session.session_token = Some(token);
        self.session.logged_in_at = Some(logged_in_at);
        Ok(())
    }

    async fn connect_channel(&mut self) -> Result<RealtimeChannel, HarnessError> {
        self.trace.begin_step("Handshake");
        let host = self.config.server.as_str();
        let negotiation =
            channel::negotiate(&self.http, &mut self.session, host, &mut self.trace).await?;
        self.trace
            .note(&format!("negotiated connection id {}", negotiation.id));

        RealtimeChannel::open(
            host,
            &negotiation.id,
            self.config.handshake_timeout,
            &mut self.trace,
        )
        .await
    }

    async fn exchange_status(&mut self, status: &str, status_code: &str) -> Result<(), HarnessError> {
        let Some(user_id) = self.session.user_id.as_deref() else {
            return Err(HarnessError::LoginVerificationFailed(
                "no verified user id in the session".to_owned(),
            ));
        };
        let Some(channel) = self.channel.as_mut() else {
            return Err(HarnessError::WsClosed);
        };

        let frame = Frame::event(status_command(user_id, status, status_code)?);
        self.trace.frame_sent(&frame);
        channel.send(&frame.encode()).await?;

        let ack = channel
            .receive(FrameType::Event, self.config.ack_timeout, &mut self.trace)
            .await?;

        verify_acknowledgement(&ack, user_id, status, status_code)
    }

    async fn end_http_session(&mut self) -> Result<(), HarnessError> {
        let response = self
            .http
            .post(&mut self.session, "/logout", &[], &[200, 204], &mut self.trace)
            .await
            .map_err(|e| HarnessError::LogoutVerificationFailed(e.to_string()))?;

        verify_logout(&response)
    }

    async fn release_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close().await;
            self.channels_released += 1;
            self.trace.note("channel released");
        }
    }

    async fn fail(&mut self, error: HarnessError) -> HarnessError {
        let kind = error.kind();
        tracing::error!(?kind, error = %error, state = %self.state, "session failed");
        self.trace.failure(&format!("{kind:?}"), &error.to_string());
        self.release_channel().await;
        self.state = SessionState::Failed(kind);
        error
    }

    fn expect_state(
        &self,
        expected: SessionState,
        operation: &'static str,
    ) -> Result<(), HarnessError> {
        if self.state == expected {
            return Ok(());
        }
        Err(HarnessError::InvalidTransition {
            operation,
            state: self.state.to_string(),
        })
    }
}

fn required_cookie(session: &Session, name: &str) -> Result<String, HarnessError> {
    session
        .cookies()
        .get(name)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            HarnessError::LoginVerificationFailed(format!("login response did not set cookie `{name}`"))
        })
}

#[cfg(test)]
#[path = "agent_test.rs"]
mod tests;
