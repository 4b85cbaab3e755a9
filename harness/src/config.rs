//! Runtime configuration for a harness session.

use std::time::Duration;

const DEFAULT_STATION: &str = "3005000000";
const DEFAULT_CONNECTION_TYPE: &str = "PSTN";
const DEFAULT_FIRST_NAME: &str = "John";
const DEFAULT_LAST_NAME: &str = "Doe";
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_ACK_TIMEOUT_SECS: u64 = 5;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Agent credentials submitted at login.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Target service address as `host:port`.
    pub server: String,
    /// Extension submitted with the login form.
    pub station: String,
    /// Connection type submitted with the login form (e.g. `"PSTN"`).
    pub connection_type: String,
    pub expected_first_name: String,
    pub expected_last_name: String,
    /// Deadline for the connect acknowledgement after the channel upgrade.
    pub handshake_timeout: Duration,
    /// Deadline for a state-change acknowledgement.
    pub ack_timeout: Duration,
    pub http_timeout: Duration,
}

impl HarnessConfig {
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            station: DEFAULT_STATION.to_owned(),
            connection_type: DEFAULT_CONNECTION_TYPE.to_owned(),
            expected_first_name: DEFAULT_FIRST_NAME.to_owned(),
            expected_last_name: DEFAULT_LAST_NAME.to_owned(),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            ack_timeout: Duration::from_secs(DEFAULT_ACK_TIMEOUT_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    /// Defaults overlaid with `SMOKE_*` environment variables.
    #[must_use]
    pub fn from_env(server: impl Into<String>) -> Self {
        let defaults = Self::new(server);
        Self {
            station: env_string("SMOKE_STATION").unwrap_or(defaults.station),
            connection_type: env_string("SMOKE_CONNECTION_TYPE")
                .unwrap_or(defaults.connection_type),
            expected_first_name: env_string("SMOKE_EXPECTED_FIRST_NAME")
                .unwrap_or(defaults.expected_first_name),
            expected_last_name: env_string("SMOKE_EXPECTED_LAST_NAME")
                .unwrap_or(defaults.expected_last_name),
            handshake_timeout: secs_or(
                env_string("SMOKE_HANDSHAKE_TIMEOUT_SECS"),
                defaults.handshake_timeout,
            ),
            ack_timeout: secs_or(env_string("SMOKE_ACK_TIMEOUT_SECS"), defaults.ack_timeout),
            http_timeout: secs_or(env_string("SMOKE_HTTP_TIMEOUT_SECS"), defaults.http_timeout),
            server: defaults.server,
        }
    }

    /// `http://host:port`
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.server)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn secs_or(raw: Option<String>, default: Duration) -> Duration {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
