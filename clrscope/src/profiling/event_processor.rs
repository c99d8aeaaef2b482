//! # Event Processing
//!
//! Consumes decoded trace records and routes them to the engine of the process
//! that emitted them.
//!
//! ## Record Routing
//!
//! - one [`ProcessEngine`] per process id, created on first sight
//! - with `--pid`, records of every other process are counted and dropped
//!
//! ## Output Modes
//!
//! - **Headless**: Print completed records to stdout
//! - **Channel**: Send completed records to the display thread
//! - **Export**: Add completed records to the Chrome trace exporter

use crossbeam_channel::{Sender, TrySendError};
use log::{debug, warn};
use std::collections::HashMap;

use super::{display_record, EngineConfig, ProcessEngine, ProcessingStats};
use crate::correlation::{CompletedRecord, CorrelationStats};
use crate::domain::Pid;
use crate::export::ChromeTraceExporter;
use crate::trace_data::TraceRecord;

/// Encapsulates record processing logic and state
pub struct EventProcessor {
    // Configuration
    headless: bool,
    config: EngineConfig,
    target_pid: Option<Pid>,

    // Mutable state
    pub stats: ProcessingStats,
    /// Completed records dropped because the display channel was full
    pub channel_dropped: usize,
    engines: HashMap<Pid, ProcessEngine>,

    // Optional outputs
    trace_exporter: Option<ChromeTraceExporter>,
    record_tx: Option<Sender<CompletedRecord>>,
}

impl EventProcessor {
    /// Create a new event processor
    #[must_use]
    pub fn new(
        headless: bool,
        config: EngineConfig,
        target_pid: Option<Pid>,
        trace_exporter: Option<ChromeTraceExporter>,
        record_tx: Option<Sender<CompletedRecord>>,
    ) -> Self {
        Self {
            headless,
            config,
            target_pid,
            stats: ProcessingStats::default(),
            channel_dropped: 0,
            engines: HashMap::new(),
            trace_exporter,
            record_tx,
        }
    }

    /// Process a single record
    pub fn process_record(&mut self, record: &TraceRecord) {
        self.stats.records += 1;

        let pid = record.header.process_id;
        if self.target_pid.is_some_and(|target| target != pid) {
            self.stats.skipped_processes += 1;
            return;
        }

        let config = self.config;
        let engine = self.engines.entry(pid).or_insert_with(|| {
            debug!("new engine for {pid}");
            ProcessEngine::new(pid, config)
        });
        let Some(completed) = engine.process(record) else {
            return;
        };

        match &completed {
            CompletedRecord::Gc(_) => self.stats.gc_cycles += 1,
            CompletedRecord::Request(_) => self.stats.requests += 1,
            CompletedRecord::Contention(_) => self.stats.contention_spans += 1,
        }
        self.emit(completed);
    }

    /// Process every record of a replayed trace
    pub fn process_all<'r>(&mut self, records: impl IntoIterator<Item = &'r TraceRecord>) {
        for record in records {
            self.process_record(record);
        }
    }

    /// Take the trace exporter (for final export)
    pub fn take_exporter(&mut self) -> Option<ChromeTraceExporter> {
        self.trace_exporter.take()
    }

    /// Drop the display channel so the receiving thread can finish
    pub fn close_channel(&mut self) {
        self.record_tx = None;
    }

    #[must_use]
    pub fn engine(&self, pid: Pid) -> Option<&ProcessEngine> {
        self.engines.get(&pid)
    }

    pub fn engine_mut(&mut self, pid: Pid) -> Option<&mut ProcessEngine> {
        self.engines.get_mut(&pid)
    }

    /// Engines ordered by process id
    #[must_use]
    pub fn engines(&self) -> Vec<&ProcessEngine> {
        let mut engines: Vec<&ProcessEngine> = self.engines.values().collect();
        engines.sort_by_key(|engine| engine.process_id());
        engines
    }

    /// Correlation misses summed over every engine
    #[must_use]
    pub fn correlation_stats(&self) -> CorrelationStats {
        let mut total = CorrelationStats::default();
        for engine in self.engines.values() {
            total += engine.correlation_stats();
        }
        total
    }

    // Private output handling

    fn emit(&mut self, completed: CompletedRecord) {
        if self.headless {
            display_record(&completed);
        }

        if let Some(ref mut exporter) = self.trace_exporter {
            exporter.add_record(&completed);
        }

        if let Some(ref tx) = self.record_tx {
            match tx.try_send(completed) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.channel_dropped += 1;
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!("display channel disconnected, no longer forwarding records");
                    self.record_tx = None;
                }
            }
        }
    }
}
