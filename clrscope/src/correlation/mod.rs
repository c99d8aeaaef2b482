//! # Event Correlation
//!
//! Turns independent start/stop/detail events into closed intervals.
//!
//! ## Correlation Keys
//!
//! | Component   | Key                         | Opens                | Closes                          |
//! |-------------|-----------------------------|----------------------|---------------------------------|
//! | contention  | (process, thread)           | contention start     | contention stop                 |
//! | gc          | background / ephemeral slot | GC start             | heap stats, restart end, global history |
//! | network     | activity path of the request| request start        | request stop / failed           |
//!
//! Every component is fed synchronously, in trace order, by the
//! [`ProcessEngine`](crate::profiling::ProcessEngine) that owns it. Misses
//! (stops without starts, details for unknown keys) are dropped and counted in
//! [`CorrelationStats`], never reported as errors.

pub mod contention;
pub mod gc;
pub mod network;
pub mod sink;

pub use contention::{ContentionSpan, ContentionTracker, WaitKind};
pub use gc::{GcCloseRule, GcCycle, GcReason, GcReconstructor, GcType, GENERATION_COUNT};
pub use network::{
    build_url, NetworkCorrelator, PhaseTiming, RedirectTiming, RequestOutcome, RequestPhases,
    RequestTimeline,
};
pub use sink::Subscribers;

use serde::Serialize;
use std::ops::AddAssign;

use crate::domain::{Duration, Pid, Timestamp};

/// Correlation misses, per component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationStats {
    /// Closing events with nothing open to close
    pub orphan_stops: u64,
    /// Detail events for an unknown key or an unstarted phase
    pub orphan_details: u64,
    /// Starts that replaced or collided with an open entry
    pub duplicate_starts: u64,
    /// Binary payloads that did not decode
    pub undecodable_payloads: u64,
}

impl CorrelationStats {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.orphan_stops + self.orphan_details + self.duplicate_starts + self.undecodable_payloads
    }
}

impl AddAssign for CorrelationStats {
    fn add_assign(&mut self, other: Self) {
        self.orphan_stops += other.orphan_stops;
        self.orphan_details += other.orphan_details;
        self.duplicate_starts += other.duplicate_starts;
        self.undecodable_payloads += other.undecodable_payloads;
    }
}

/// Any completed record, for consumers that want a single stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletedRecord {
    Gc(GcCycle),
    Request(RequestTimeline),
    Contention(ContentionSpan),
}

impl CompletedRecord {
    #[must_use]
    pub fn process_id(&self) -> Pid {
        match self {
            Self::Gc(cycle) => cycle.process_id,
            Self::Request(request) => request.process_id,
            Self::Contention(span) => span.process_id,
        }
    }

    #[must_use]
    pub fn start(&self) -> Timestamp {
        match self {
            Self::Gc(cycle) => cycle.start,
            Self::Request(request) => request.start,
            Self::Contention(span) => span.start,
        }
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        match self {
            Self::Gc(cycle) => cycle.duration(),
            Self::Request(request) => request.duration,
            Self::Contention(span) => span.duration,
        }
    }
}
