//! Diagnostic event emission
//!
//! Every lifecycle step is recorded with a sequence number and timestamp, kept in a bounded
//! history, and forwarded to the placement's optional `on_event` sink. The sink is best-effort:
//! a panicking sink is caught and ignored and never reaches the state machine.

use crate::best_effort::panic_message;
use crate::types::SessionId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Sink receiving `(name, payload)` for each diagnostic event
pub type OnEvent = Arc<dyn Fn(&str, &serde_json::Value) + Send + Sync>;

/// What initiated a break start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartTrigger {
    /// Auto start on ads-ready
    Auto,
    /// `start_ad()` after ads-ready
    Manual,
    /// `start_ad()` issued earlier, performed on ads-ready
    Deferred,
}

/// Diagnostic event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// SDK capability available
    SdkLoaded,
    /// Engine built and plugin attached
    EngineReady,
    /// Ad request issued
    RequestAds,
    /// Ads-manager created
    AdsManager,
    /// Creative loaded
    AdLoaded,
    /// Ad playback started
    AdStarted,
    /// Ad or break completed
    AdDone,
    /// Ad-level error
    AdError { message: Option<String> },
    /// Break can be started
    AdsReady,
    /// Break start attempted
    PlayAdBreak { trigger: StartTrigger },
    /// `start_ad()` arrived before ads were ready
    StartDeferred,
    /// `start_ad()` ignored
    StartIgnored { reason: String },
    /// Manual-start control offered
    NeedsGesture,
    /// Setup failed before any ad could show
    InitFailed { code: String, message: String },
    /// A best-effort SDK call failed
    BestEffortFailed { operation: String, reason: String },
    /// Session released
    Teardown,
}

impl DiagnosticEvent {
    /// Event name passed to the sink
    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticEvent::SdkLoaded => "sdk_loaded",
            DiagnosticEvent::EngineReady => "engine_ready",
            DiagnosticEvent::RequestAds => "request_ads",
            DiagnosticEvent::AdsManager => "ads_manager",
            DiagnosticEvent::AdLoaded => "ad_loaded",
            DiagnosticEvent::AdStarted => "ad_started",
            DiagnosticEvent::AdDone => "ad_done",
            DiagnosticEvent::AdError { .. } => "ad_error",
            DiagnosticEvent::AdsReady => "ads_ready",
            DiagnosticEvent::PlayAdBreak { .. } => "play_ad_break",
            DiagnosticEvent::StartDeferred => "start_deferred",
            DiagnosticEvent::StartIgnored { .. } => "start_ignored",
            DiagnosticEvent::NeedsGesture => "needs_gesture",
            DiagnosticEvent::InitFailed { .. } => "init_failed",
            DiagnosticEvent::BestEffortFailed { .. } => "best_effort_failed",
            DiagnosticEvent::Teardown => "teardown",
        }
    }

    /// Event payload without the tag; `Null` when the event carries nothing
    pub fn payload(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut fields)) => {
                fields.remove("event");
                if fields.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::Value::Object(fields)
                }
            }
            _ => serde_json::Value::Null,
        }
    }
}

/// Diagnostic event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// Unique event ID
    pub id: Uuid,
    /// Session ID
    pub session_id: SessionId,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Sequence number
    pub sequence: u64,
    /// The event
    #[serde(flatten)]
    pub event: DiagnosticEvent,
}

struct Inner {
    sequence: u64,
    history: VecDeque<DiagnosticRecord>,
}

/// Per-session diagnostics emitter
pub struct Diagnostics {
    session_id: SessionId,
    inner: Mutex<Inner>,
    max_history: usize,
    sink: Option<OnEvent>,
}

impl Diagnostics {
    /// Default number of records kept
    pub const DEFAULT_HISTORY: usize = 256;

    pub fn new(session_id: SessionId, sink: Option<OnEvent>) -> Self {
        Self {
            session_id,
            inner: Mutex::new(Inner {
                sequence: 0,
                history: VecDeque::new(),
            }),
            max_history: Self::DEFAULT_HISTORY,
            sink,
        }
    }

    /// Record an event and forward it to the sink
    pub fn emit(&self, event: DiagnosticEvent) {
        let record = {
            let mut inner = self.inner.lock();
            inner.sequence += 1;
            let record = DiagnosticRecord {
                id: Uuid::new_v4(),
                session_id: self.session_id,
                timestamp: Utc::now(),
                sequence: inner.sequence,
                event,
            };
            if inner.history.len() >= self.max_history {
                inner.history.pop_front();
            }
            inner.history.push_back(record.clone());
            record
        };

        debug!(
            session_id = %self.session_id,
            sequence = record.sequence,
            event = record.event.name(),
            "Placement event"
        );

        if let Some(sink) = &self.sink {
            let name = record.event.name();
            let payload = record.event.payload();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| sink(name, &payload))) {
                warn!(
                    event = name,
                    reason = %panic_message(panic.as_ref()),
                    "on_event sink panicked; ignored"
                );
            }
        }
    }

    /// Recorded events, oldest first
    pub fn history(&self) -> Vec<DiagnosticRecord> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Names of recorded events, oldest first
    pub fn names(&self) -> Vec<&'static str> {
        self.inner.lock().history.iter().map(|r| r.event.name()).collect()
    }
}
