// Time conversions intentionally lose precision for display purposes
#![allow(clippy::cast_precision_loss)]

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use crate::correlation::{
    CompletedRecord, ContentionSpan, GcCycle, PhaseTiming, RequestOutcome, RequestTimeline,
};
use crate::domain::{Duration, ExportError, Timestamp};

/// Lane (thread id) that GC cycles are drawn on
const GC_LANE: u32 = 0;
/// Lane that HTTP requests are drawn on
const HTTP_LANE: u32 = 1;

/// Chrome Trace Event format
/// Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize)]
struct ChromeTraceEvent {
    name: String,
    /// Category for filtering/coloring
    cat: String,
    /// Phase: "X" = complete, "M" = metadata
    ph: String,
    /// Timestamp in microseconds, relative to the earliest exported record
    ts: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    pid: u32,
    tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

/// Chrome Trace Format container
#[derive(Debug, Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: String,
}

/// A complete event before timestamps are made relative
#[derive(Debug, Clone)]
struct Span {
    name: String,
    cat: &'static str,
    start: Timestamp,
    duration: Duration,
    pid: u32,
    tid: u32,
    args: HashMap<String, JsonValue>,
}

/// Chrome trace exporter for completed records
///
/// Records arrive in completion order, so timestamps are only made relative
/// (to the earliest start) when the trace is written.
#[derive(Debug, Default)]
pub struct ChromeTraceExporter {
    spans: Vec<Span>,
}

impl ChromeTraceExporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, record: &CompletedRecord) {
        match record {
            CompletedRecord::Gc(cycle) => self.add_gc(cycle),
            CompletedRecord::Request(request) => self.add_request(request),
            CompletedRecord::Contention(span) => self.add_contention(span),
        }
    }

    fn add_gc(&mut self, cycle: &GcCycle) {
        let mut args = HashMap::new();
        args.insert("reason".to_string(), json!(format!("{:?}", cycle.reason)));
        args.insert("type".to_string(), json!(format!("{:?}", cycle.gc_type)));
        args.insert("compacting".to_string(), json!(cycle.is_compacting));
        args.insert("pause_ms".to_string(), json!(cycle.pause_duration.as_millis()));
        args.insert("heap_sizes".to_string(), json!(cycle.heap_sizes));
        if cycle.size_before.iter().any(|&size| size != 0) {
            args.insert("size_before".to_string(), json!(cycle.size_before));
            args.insert("size_after".to_string(), json!(cycle.size_after));
        }

        self.spans.push(Span {
            name: format!("GC #{} gen{}", cycle.number, cycle.generation),
            cat: "gc",
            start: cycle.start,
            duration: cycle.duration(),
            pid: cycle.process_id.0,
            tid: GC_LANE,
            args,
        });
    }

    fn add_request(&mut self, request: &RequestTimeline) {
        let pid = request.process_id.0;
        let mut args = HashMap::new();
        args.insert("activity".to_string(), json!(request.activity));
        match &request.outcome {
            RequestOutcome::Completed { status_code } => {
                args.insert("status".to_string(), json!(status_code));
            }
            RequestOutcome::Failed { message } => {
                args.insert("error".to_string(), json!(message));
            }
        }
        if let Some(redirect) = &request.redirect {
            args.insert("redirect".to_string(), json!(redirect.url));
        }
        if let Some(protocol) = &request.tls_protocol {
            args.insert("tls".to_string(), json!(protocol));
        }

        let name =
            if request.url.is_empty() { request.activity.clone() } else { request.url.clone() };
        self.spans.push(Span {
            name,
            cat: "http",
            start: request.start,
            duration: request.duration,
            pid,
            tid: HTTP_LANE,
            args,
        });

        let mut phases = vec![
            ("dns", request.phases.dns),
            ("socket", request.phases.socket),
            ("tls", request.phases.tls),
            ("request/response", request.phases.request_response),
        ];
        if let Some(redirect) = &request.redirect {
            phases.extend([
                ("redirect dns", redirect.phases.dns),
                ("redirect socket", redirect.phases.socket),
                ("redirect tls", redirect.phases.tls),
                ("redirect request/response", redirect.phases.request_response),
            ]);
        }
        for (name, timing) in phases {
            if let Some(timing) = timing {
                self.add_phase(name, pid, timing);
            }
        }
    }

    fn add_phase(&mut self, name: &str, pid: u32, timing: PhaseTiming) {
        let mut args = HashMap::new();
        args.insert("wait_ms".to_string(), json!(timing.wait.as_millis()));
        self.spans.push(Span {
            name: name.to_string(),
            cat: "http",
            start: timing.start,
            duration: timing.duration,
            pid,
            tid: HTTP_LANE,
            args,
        });
    }

    fn add_contention(&mut self, span: &ContentionSpan) {
        let mut args = HashMap::new();
        args.insert("managed".to_string(), json!(span.is_managed));
        args.insert("kind".to_string(), json!(span.kind));
        if !span.call_stack.is_empty() {
            args.insert("stack".to_string(), json!(span.call_stack));
        }

        self.spans.push(Span {
            name: span.call_stack.first().cloned().unwrap_or_else(|| "contention".to_string()),
            cat: "contention",
            start: span.start,
            duration: span.duration,
            pid: span.process_id.0,
            tid: span.thread_id.0,
            args,
        });
    }

    /// Export the trace to any writer (file, stdout, buffer, etc.)
    ///
    /// # Errors
    /// Returns an error if serialization or the underlying write fails
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let origin = self.spans.iter().map(|span| span.start).min().unwrap_or_default();

        let mut events: Vec<ChromeTraceEvent> = self
            .spans
            .iter()
            .map(|span| ChromeTraceEvent {
                name: span.name.clone(),
                cat: span.cat.to_string(),
                ph: "X".to_string(),
                ts: span.start.saturating_duration_since(origin).as_micros(),
                dur: Some(span.duration.as_micros()),
                pid: span.pid,
                tid: span.tid,
                args: Some(span.args.clone()),
            })
            .collect();

        // Name the synthetic lanes so the viewer does not show bare numbers
        let mut lanes: BTreeMap<(u32, u32), &str> = BTreeMap::new();
        for span in &self.spans {
            match span.cat {
                "gc" => lanes.insert((span.pid, span.tid), "GC"),
                "http" => lanes.insert((span.pid, span.tid), "HTTP"),
                _ => None,
            };
        }
        for ((pid, tid), lane) in lanes {
            let mut args = HashMap::new();
            args.insert("name".to_string(), json!(lane));
            events.push(ChromeTraceEvent {
                name: "thread_name".to_string(),
                cat: String::new(),
                ph: "M".to_string(),
                ts: 0.0,
                dur: None,
                pid,
                tid,
                args: Some(args),
            });
        }

        let trace = ChromeTrace { trace_events: events, display_time_unit: "ms".to_string() };
        serde_json::to_writer_pretty(writer, &trace)?;
        Ok(())
    }

    /// Write the trace to a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written
    pub fn export_to_file(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let file = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        self.export(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Number of complete events collected, phases included
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.spans.len()
    }
}
