//! Structured trace of one harness session.
//!
//! Every HTTP exchange and channel frame is appended as a [`TraceEntry`]
//! tagged with the scenario step that produced it. The log is exported as
//! JSON lines for post-mortem inspection after a failed run.

use std::time::{SystemTime, UNIX_EPOCH};

use frames::{Frame, FrameType};
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Step,
    HttpRequest,
    HttpResponse,
    FrameSent,
    FrameReceived,
    Note,
    Failure,
    Verdict,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceEntry {
    pub seq: u64,
    /// Milliseconds since the Unix epoch.
    pub ts_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub kind: TraceKind,
    pub detail: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TraceSummary {
    pub steps: usize,
    pub http_exchanges: usize,
    pub frames_sent: usize,
    pub frames_received: usize,
    pub failures: usize,
    pub failed_step: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct TraceLog {
    entries: Vec<TraceEntry>,
    step: Option<String>,
}

impl TraceLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn kinds(&self) -> impl Iterator<Item = TraceKind> + '_ {
        self.entries.iter().map(|e| e.kind)
    }

    /// Start a new step; later entries carry its label.
    pub fn begin_step(&mut self, label: &str) {
        self.step = Some(label.to_owned());
        self.push(TraceKind::Step, json!({ "label": label }));
    }

    pub fn http_request(&mut self, method: &str, url: &str) {
        self.push(
            TraceKind::HttpRequest,
            json!({ "method": method, "url": url }),
        );
    }

    pub fn http_response(&mut self, url: &str, status: u16, body: &str) {
        self.push(
            TraceKind::HttpResponse,
            json!({ "url": url, "status": status, "body": body }),
        );
    }

    pub fn frame_sent(&mut self, frame: &Frame) {
        self.push(
            TraceKind::FrameSent,
            json!({ "type": frame.kind, "wire": frame.encode() }),
        );
    }

    pub fn frame_received(&mut self, kind: FrameType, payload: &str) {
        self.push(
            TraceKind::FrameReceived,
            json!({ "type": kind, "payload": payload }),
        );
    }

    pub fn note(&mut self, message: &str) {
        self.push(TraceKind::Note, json!({ "message": message }));
    }

    pub fn failure(&mut self, kind: &str, message: &str) {
        self.push(
            TraceKind::Failure,
            json!({ "kind": kind, "message": message }),
        );
    }

    pub fn verdict(&mut self, passed: bool) {
        self.push(TraceKind::Verdict, json!({ "passed": passed }));
    }

    /// Serialise one entry per line.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry fails to serialise.
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    #[must_use]
    pub fn summary(&self) -> TraceSummary {
        let mut summary = TraceSummary::default();
        for entry in &self.entries {
            match entry.kind {
                TraceKind::Step => summary.steps += 1,
                TraceKind::HttpResponse => summary.http_exchanges += 1,
                TraceKind::FrameSent => summary.frames_sent += 1,
                TraceKind::FrameReceived => summary.frames_received += 1,
                TraceKind::Failure => {
                    summary.failures += 1;
                    if summary.failed_step.is_none() {
                        summary.failed_step.clone_from(&entry.step);
                    }
                }
                TraceKind::HttpRequest | TraceKind::Note | TraceKind::Verdict => {}
            }
        }
        summary
    }

    fn push(&mut self, kind: TraceKind, detail: Value) {
        let seq = self.entries.len() as u64;
        self.entries.push(TraceEntry {
            seq,
            ts_ms: now_ms(),
            step: self.step.clone(),
            kind,
            detail,
        });
    }
}

fn now_ms() -> i64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(duration.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
