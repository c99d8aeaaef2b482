// Time conversions intentionally lose precision for display purposes
#![allow(clippy::cast_precision_loss)]

use crate::analysis::{AllocationStats, RuntimeEventStats};
use crate::correlation::{
    CompletedRecord, ContentionSpan, CorrelationStats, GcCycle, PhaseTiming, RequestOutcome,
    RequestTimeline,
};

/// Print a completed record in headless mode
pub fn display_record(record: &CompletedRecord) {
    println!("{}", format_record(record));
}

#[must_use]
pub fn format_record(record: &CompletedRecord) -> String {
    match record {
        CompletedRecord::Gc(cycle) => format_gc_cycle(cycle),
        CompletedRecord::Request(request) => format_request(request),
        CompletedRecord::Contention(span) => format_contention(span),
    }
}

#[must_use]
pub fn format_gc_cycle(cycle: &GcCycle) -> String {
    let compacting = if cycle.is_compacting { " compacting" } else { "" };
    let mut line = format!(
        "[GC] #{} gen{} {:?} {:?}{compacting} pause={} duration={}",
        cycle.number,
        cycle.generation,
        cycle.gc_type,
        cycle.reason,
        cycle.pause_duration,
        cycle.duration()
    );
    let [gen0, gen1, gen2, loh] = cycle.heap_sizes;
    line.push_str(&format!("\n  heap: gen0={gen0} gen1={gen1} gen2={gen2} loh={loh}"));
    line
}

fn format_phase(label: &str, timing: Option<PhaseTiming>) -> Option<String> {
    timing.map(|t| format!("{label} {} (+{} wait)", t.duration, t.wait))
}

#[must_use]
pub fn format_request(request: &RequestTimeline) -> String {
    let status = match &request.outcome {
        RequestOutcome::Completed { status_code } => status_code.to_string(),
        RequestOutcome::Failed { .. } => "ERR".to_string(),
    };
    let url = if request.url.is_empty() { &request.activity } else { &request.url };
    let mut line = format!("[HTTP] {status:>3} {} {url}", request.duration);
    if let Some(redirect) = &request.redirect {
        line.push_str(&format!(" -> {}", redirect.url));
    }

    let mut phases: Vec<String> = [
        format_phase("dns", request.phases.dns),
        format_phase("socket", request.phases.socket),
        format_phase("tls", request.phases.tls),
        format_phase("req/resp", request.phases.request_response),
    ]
    .into_iter()
    .flatten()
    .collect();
    if let Some(redirect) = &request.redirect {
        phases.extend(
            [
                format_phase("redirect dns", redirect.phases.dns),
                format_phase("redirect socket", redirect.phases.socket),
                format_phase("redirect tls", redirect.phases.tls),
                format_phase("redirect req/resp", redirect.phases.request_response),
            ]
            .into_iter()
            .flatten(),
        );
    }
    if !phases.is_empty() {
        line.push_str(&format!("\n  {}", phases.join(" | ")));
    }

    if let RequestOutcome::Failed { message } = &request.outcome {
        line.push_str(&format!("\n  ~ {message}"));
    }
    if let Some(error) = &request.handshake_error {
        line.push_str(&format!("\n  ~ tls: {error}"));
    }
    line
}

#[must_use]
pub fn format_contention(span: &ContentionSpan) -> String {
    let managed = if span.is_managed { "managed" } else { "native" };
    let mut line = format!(
        "[WAIT] {} {} {:?} {managed} {}",
        span.process_id, span.thread_id, span.kind, span.duration
    );
    // innermost frame first, as the runtime reports it
    for frame in &span.call_stack {
        line.push_str(&format!("\n    {frame}"));
    }
    line
}

/// Record counters kept by the event processor
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStats {
    pub records: u64,
    pub gc_cycles: u64,
    pub requests: u64,
    pub contention_spans: u64,
    /// Records for processes other than the selected one
    pub skipped_processes: u64,
}

/// Display processing statistics
pub fn display_statistics(stats: &ProcessingStats, correlation: &CorrelationStats) {
    eprintln!(
        "stats: records={} gc_cycles={} requests={} contention_spans={} skipped={}",
        stats.records,
        stats.gc_cycles,
        stats.requests,
        stats.contention_spans,
        stats.skipped_processes
    );
    eprintln!(
        "misses: orphan_stops={} orphan_details={} duplicate_starts={} undecodable={}",
        correlation.orphan_stops,
        correlation.orphan_details,
        correlation.duplicate_starts,
        correlation.undecodable_payloads
    );
}

/// Print the allocation summary, largest types first
pub fn display_allocations(allocations: &AllocationStats, top: usize) {
    if allocations.is_empty() {
        return;
    }
    println!(
        "\nAllocations: {} samples, {:.1} MB",
        allocations.total_count(),
        allocations.total_size() as f64 / (1024.0 * 1024.0)
    );
    for entry in allocations.by_size().into_iter().take(top) {
        println!(
            "  {:>12} bytes {:>6} samples  {}",
            entry.size, entry.count, entry.type_name
        );
    }
}

/// Exception, finalizer and starvation summary; empty when nothing was seen
#[must_use]
pub fn format_runtime_events(events: &RuntimeEventStats, top: usize) -> String {
    let mut text = String::new();
    let exceptions = events.exceptions();
    if !exceptions.is_empty() {
        let total: u64 = exceptions.iter().map(|e| e.count).sum();
        text.push_str(&format!("\nExceptions: {total}"));
        for entry in exceptions.into_iter().take(top) {
            text.push_str(&format!("\n  {:>6}  {}", entry.count, entry.type_name));
            if !entry.last_message.is_empty() {
                text.push_str(&format!(": {}", entry.last_message));
            }
        }
    }
    let finalized = events.finalized();
    if !finalized.is_empty() {
        let total: u64 = finalized.iter().map(|(_, count)| count).sum();
        text.push_str(&format!("\nFinalized objects: {total}"));
        for (type_name, count) in finalized.into_iter().take(top) {
            text.push_str(&format!("\n  {count:>6}  {type_name}"));
        }
    }
    if let Some(last) = events.starvations().last() {
        text.push_str(&format!(
            "\nThread pool starvation: {} times, {} workers at {:.3}s",
            events.starvations().len(),
            last.worker_threads,
            last.timestamp.as_seconds()
        ));
    }
    text
}

pub fn display_runtime_events(events: &RuntimeEventStats, top: usize) {
    let text = format_runtime_events(events, top);
    if !text.is_empty() {
        println!("{text}");
    }
}
