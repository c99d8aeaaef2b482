//! Lock and wait-handle contention spans
//!
//! One two-state machine per (process, thread):
//!
//! ```text
//!            start (overwrites)
//!          ┌────────┐
//!          ▼        │
//!  Idle ──start──► Waiting ──stop──► Idle + ContentionSpan
//!   │
//!   └──stop──► ignored (started before monitoring, or duplicate stop)
//! ```
//!
//! Monitor and wait-handle events share the state machine. Wait handles are
//! always managed; monitor managed-ness comes from the stop event's flags.

use log::debug;
use serde::Serialize;
use std::collections::HashMap;

use super::CorrelationStats;
use crate::domain::{Duration, Pid, Tid, Timestamp};
use crate::symbolization::{AddressStack, MethodStore};
use crate::trace_data::{ContentionEvent, EventHeader};
use clrscope_common::CONTENTION_FLAGS_MANAGED;

/// Which event family produced a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    Monitor,
    WaitHandle,
}

/// A closed wait
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentionSpan {
    pub process_id: Pid,
    pub thread_id: Tid,
    pub start: Timestamp,
    pub duration: Duration,
    pub kind: WaitKind,
    pub is_managed: bool,
    /// Resolved frames, innermost first; empty when no stack was captured
    pub call_stack: Vec<String>,
}

#[derive(Debug)]
struct PendingWait {
    start: Timestamp,
    kind: WaitKind,
    stack: Option<AddressStack>,
}

#[derive(Debug, Default)]
pub struct ContentionTracker {
    pending: HashMap<(Pid, Tid), PendingWait>,
    min_wait: Duration,
    filtered: u64,
    stats: CorrelationStats,
}

impl ContentionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans shorter than `min_wait` are closed but not returned
    #[must_use]
    pub fn with_min_wait(min_wait: Duration) -> Self {
        Self { min_wait, ..Self::default() }
    }

    /// Feed one contention event; returns the span it closed, if any
    pub fn on_event(
        &mut self,
        header: &EventHeader,
        event: &ContentionEvent,
        methods: &MethodStore,
    ) -> Option<ContentionSpan> {
        let (pid, tid, now) = (header.process_id, header.thread_id, header.timestamp);
        match event {
            ContentionEvent::Start { .. } => {
                let stack = header.stack.clone().map(AddressStack::from);
                self.on_wait_start(pid, tid, now, WaitKind::Monitor, stack);
                None
            }
            ContentionEvent::WaitHandleStart { .. } => {
                let stack = header.stack.clone().map(AddressStack::from);
                self.on_wait_start(pid, tid, now, WaitKind::WaitHandle, stack);
                None
            }
            ContentionEvent::Stop { flags, .. } => {
                self.on_wait_stop(pid, tid, now, *flags == CONTENTION_FLAGS_MANAGED, methods)
            }
            ContentionEvent::WaitHandleStop => self.on_wait_stop(pid, tid, now, true, methods),
        }
    }

    /// A thread started waiting. A wait already pending on the thread is abandoned.
    pub fn on_wait_start(
        &mut self,
        pid: Pid,
        tid: Tid,
        timestamp: Timestamp,
        kind: WaitKind,
        stack: Option<AddressStack>,
    ) {
        let wait = PendingWait { start: timestamp, kind, stack };
        let previous = self.pending.insert((pid, tid), wait);
        if let Some(previous) = previous {
            self.stats.duplicate_starts += 1;
            debug!("{pid} {tid}: wait started at {} abandoned by a new start", previous.start);
        }
    }

    /// A thread stopped waiting. `managed` only applies to monitor waits.
    pub fn on_wait_stop(
        &mut self,
        pid: Pid,
        tid: Tid,
        timestamp: Timestamp,
        managed: bool,
        methods: &MethodStore,
    ) -> Option<ContentionSpan> {
        let Some(wait) = self.pending.remove(&(pid, tid)) else {
            self.stats.orphan_stops += 1;
            debug!("{pid} {tid}: contention stop without start");
            return None;
        };

        let duration = timestamp.saturating_duration_since(wait.start);
        if duration < self.min_wait {
            self.filtered += 1;
            return None;
        }

        let call_stack = wait
            .stack
            .map(|stack| {
                stack.symbolize(methods).into_iter().map(|frame| frame.display_name()).collect()
            })
            .unwrap_or_default();

        Some(ContentionSpan {
            process_id: pid,
            thread_id: tid,
            start: wait.start,
            duration,
            kind: wait.kind,
            is_managed: wait.kind == WaitKind::WaitHandle || managed,
            call_stack,
        })
    }

    /// Threads currently waiting
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Spans dropped by the minimum-wait threshold
    #[must_use]
    pub fn filtered_count(&self) -> u64 {
        self.filtered
    }

    #[must_use]
    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: ContentionEvent = ContentionEvent::Start { flags: 0 };
    const STOP: ContentionEvent = ContentionEvent::Stop { flags: 0, duration_ns: 0.0 };

    fn header(tid: u32, ts: u64, stack: Option<Vec<u64>>) -> EventHeader {
        EventHeader {
            timestamp: Timestamp(ts),
            process_id: Pid(1),
            thread_id: Tid(tid),
            stack,
            ..EventHeader::default()
        }
    }

    fn methods() -> MethodStore {
        let mut methods = MethodStore::new();
        methods.add_method(0x1000, 0x100, "App.Cache", "Lookup", "bool  (string)");
        methods.add_method(0x2000, 0x100, "App.Program", "Main", "void  ()");
        methods
    }

    #[test]
    fn test_stop_before_start_is_ignored() {
        let mut tracker = ContentionTracker::new();
        let span = tracker.on_event(&header(5, 100, None), &STOP, &methods());
        assert!(span.is_none());
        assert_eq!(tracker.stats().orphan_stops, 1);
    }

    #[test]
    fn test_start_start_stop_uses_second_start() {
        let methods = methods();
        let mut tracker = ContentionTracker::new();
        tracker.on_event(&header(5, 100, Some(vec![0x2010])), &START, &methods);
        tracker.on_event(&header(5, 400, Some(vec![0x1010, 0x2010])), &START, &methods);
        let span = tracker.on_event(&header(5, 1_000, None), &STOP, &methods).unwrap();

        assert_eq!(span.start, Timestamp(400));
        assert_eq!(span.duration, Duration(600));
        assert_eq!(span.call_stack, vec!["App.Cache.Lookup(string)", "App.Program.Main()"]);
        assert_eq!(tracker.stats().duplicate_starts, 1);

        let again = tracker.on_event(&header(5, 1_100, None), &STOP, &methods);
        assert!(again.is_none());
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_threads_are_independent() {
        let methods = MethodStore::new();
        let mut tracker = ContentionTracker::new();
        tracker.on_event(&header(1, 10, None), &START, &methods);
        tracker.on_event(&header(2, 20, None), &START, &methods);
        let span = tracker.on_event(&header(2, 50, None), &STOP, &methods).unwrap();
        assert_eq!(span.thread_id, Tid(2));
        assert_eq!(span.duration, Duration(30));
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn test_managed_flag_from_monitor_stop() {
        let methods = MethodStore::new();
        let mut tracker = ContentionTracker::new();
        tracker.on_event(&header(1, 0, None), &ContentionEvent::Start { flags: 1 }, &methods);
        let native_stop = ContentionEvent::Stop { flags: 1, duration_ns: 5.0 };
        let span = tracker.on_event(&header(1, 5, None), &native_stop, &methods).unwrap();
        assert!(!span.is_managed);
        assert_eq!(span.kind, WaitKind::Monitor);
        assert!(span.call_stack.is_empty());
    }

    #[test]
    fn test_wait_handle_is_always_managed() {
        let methods = MethodStore::new();
        let mut tracker = ContentionTracker::new();
        let start = ContentionEvent::WaitHandleStart { source: 0 };
        tracker.on_event(&header(1, 0, None), &start, &methods);
        let stop = ContentionEvent::WaitHandleStop;
        let span = tracker.on_event(&header(1, 9, None), &stop, &methods).unwrap();
        assert!(span.is_managed);
        assert_eq!(span.kind, WaitKind::WaitHandle);
    }

    #[test]
    fn test_min_wait_filters_short_spans() {
        let methods = MethodStore::new();
        let mut tracker = ContentionTracker::with_min_wait(Duration(1_000));
        tracker.on_event(&header(1, 0, None), &START, &methods);
        assert!(tracker.on_event(&header(1, 999, None), &STOP, &methods).is_none());
        assert_eq!(tracker.filtered_count(), 1);
        assert_eq!(tracker.pending_count(), 0);

        tracker.on_event(&header(1, 2_000, None), &START, &methods);
        assert!(tracker.on_event(&header(1, 3_000, None), &STOP, &methods).is_some());
    }
}
