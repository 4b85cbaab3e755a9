//! Verification harness for an agent session against a remote service.
//!
//! Drives one session end to end: credentialed HTTP login, negotiation and
//! upgrade of the realtime push channel, state-change commands with verified
//! acknowledgements, and logout. Every step is checked strictly and the first
//! mismatch fails the session.

pub mod agent;
pub mod channel;
pub mod config;
mod error;
pub mod http;

pub use agent::{AgentSession, AgentStatus, SessionState};
pub use config::{Credentials, HarnessConfig};
pub use error::{ErrorKind, HarnessError};

#[cfg(test)]
mod test_helpers;
