//! First-chance exceptions, finalized objects and thread pool starvation
//!
//! These families carry no start/stop pairs; each event is counted as it
//! arrives. Finalizer events name the type by id only, so type names come from
//! the runtime's type description events seen earlier in the trace.

use std::collections::HashMap;

use crate::domain::Timestamp;

/// Occurrences of one exception type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionCount {
    pub type_name: String,
    pub count: u64,
    pub last_message: String,
}

/// Thread pool injected workers because queued work was not progressing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Starvation {
    pub timestamp: Timestamp,
    pub worker_threads: u32,
}

#[derive(Debug, Default)]
pub struct RuntimeEventStats {
    exceptions: HashMap<String, ExceptionCount>,
    type_names: HashMap<u64, String>,
    finalized: HashMap<String, u64>,
    starvations: Vec<Starvation>,
}

impl RuntimeEventStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_exception(&mut self, type_name: &str, message: &str) {
        let entry = self.exceptions.entry(type_name.to_string()).or_insert_with(|| {
            ExceptionCount { type_name: type_name.to_string(), ..ExceptionCount::default() }
        });
        entry.count += 1;
        message.clone_into(&mut entry.last_message);
    }

    /// Remember the name of a type id for later finalizer events
    pub fn register_type(&mut self, type_id: u64, type_name: &str) {
        self.type_names.insert(type_id, type_name.to_string());
    }

    /// Count one finalized object. Unknown ids are kept as `0x{id:x}`.
    pub fn record_finalize(&mut self, type_id: u64) {
        let name = match self.type_names.get(&type_id) {
            Some(name) => name.clone(),
            None => format!("0x{type_id:x}"),
        };
        *self.finalized.entry(name).or_default() += 1;
    }

    pub fn record_starvation(&mut self, timestamp: Timestamp, worker_threads: u32) {
        self.starvations.push(Starvation { timestamp, worker_threads });
    }

    /// Exception types ordered by descending count, then name
    #[must_use]
    pub fn exceptions(&self) -> Vec<&ExceptionCount> {
        let mut exceptions: Vec<&ExceptionCount> = self.exceptions.values().collect();
        exceptions
            .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.type_name.cmp(&b.type_name)));
        exceptions
    }

    /// Finalized types ordered by descending count, then name
    #[must_use]
    pub fn finalized(&self) -> Vec<(&str, u64)> {
        let mut finalized: Vec<(&str, u64)> =
            self.finalized.iter().map(|(name, count)| (name.as_str(), *count)).collect();
        finalized.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        finalized
    }

    /// Starvation events in trace order
    #[must_use]
    pub fn starvations(&self) -> &[Starvation] {
        &self.starvations
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exceptions.is_empty() && self.finalized.is_empty() && self.starvations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exceptions_counted_per_type() {
        let mut stats = RuntimeEventStats::new();
        stats.record_exception("System.IO.IOException", "disk full");
        stats.record_exception("System.TimeoutException", "slow");
        stats.record_exception("System.IO.IOException", "pipe closed");

        let exceptions = stats.exceptions();
        assert_eq!(exceptions[0].type_name, "System.IO.IOException");
        assert_eq!(exceptions[0].count, 2);
        assert_eq!(exceptions[0].last_message, "pipe closed");
        assert_eq!(exceptions[1].count, 1);
    }

    #[test]
    fn test_finalizer_names_from_registered_types() {
        let mut stats = RuntimeEventStats::new();
        stats.register_type(0x7f00, "App.Handle");
        stats.record_finalize(0x7f00);
        stats.record_finalize(0x7f00);
        stats.record_finalize(0xbeef);
        assert_eq!(stats.finalized(), vec![("App.Handle", 2), ("0xbeef", 1)]);
    }

    #[test]
    fn test_starvations_keep_order() {
        let mut stats = RuntimeEventStats::new();
        assert!(stats.is_empty());
        stats.record_starvation(Timestamp(10), 9);
        stats.record_starvation(Timestamp(20), 10);
        let workers: Vec<u32> = stats.starvations().iter().map(|s| s.worker_threads).collect();
        assert_eq!(workers, vec![9, 10]);
        assert!(!stats.is_empty());
    }
}
