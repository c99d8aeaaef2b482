//! Engine configuration
//!
//! Built by the CLI from its arguments, or directly by library callers.

use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

use crate::correlation::GcCloseRule;
use crate::domain::Duration;

bitflags! {
    /// Event families the engine processes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventFilter: u32 {
        const EXCEPTION = 1 << 0;
        const FINALIZER = 1 << 2;
        const CONTENTION = 1 << 3;
        const THREAD_STARVATION = 1 << 4;
        const GC = 1 << 5;
        const ALLOCATION_TICK = 1 << 6;
        const NETWORK = 1 << 7;
        const CPU_SAMPLING = 1 << 8;
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Unknown family name in an event filter list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventFilterError(pub String);

impl fmt::Display for ParseEventFilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown event family '{}' (expected all, exception, finalizer, contention, \
             thread-starvation, gc, allocation-tick, network, cpu-sampling)",
            self.0
        )
    }
}

impl std::error::Error for ParseEventFilterError {}

impl FromStr for EventFilter {
    type Err = ParseEventFilterError;

    /// Comma-separated family names, e.g. `gc,network`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut filter = Self::empty();
        for name in s.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            if name.eq_ignore_ascii_case("all") {
                filter = Self::all();
                continue;
            }
            let flag_name = name.to_ascii_uppercase().replace('-', "_");
            let flag = Self::from_name(&flag_name)
                .ok_or_else(|| ParseEventFilterError(name.to_string()))?;
            filter |= flag;
        }
        Ok(filter)
    }
}

/// Per-process engine settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineConfig {
    pub gc_close_rule: GcCloseRule,
    pub filter: EventFilter,
    /// Contention spans shorter than this are not published
    pub min_wait: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_enables_everything() {
        let config = EngineConfig::default();
        assert!(config.filter.contains(EventFilter::GC | EventFilter::NETWORK));
        assert_eq!(config.gc_close_rule, GcCloseRule::HeapStats);
        assert!(config.min_wait.is_zero());
    }

    #[test]
    fn test_parse_filter_list() {
        let filter: EventFilter = "gc, network,allocation-tick".parse().unwrap();
        assert_eq!(filter, EventFilter::GC | EventFilter::NETWORK | EventFilter::ALLOCATION_TICK);
        assert_eq!("ALL".parse::<EventFilter>().unwrap(), EventFilter::all());
    }

    #[test]
    fn test_parse_filter_rejects_unknown() {
        let err = "gc,threads".parse::<EventFilter>().unwrap_err();
        assert_eq!(err, ParseEventFilterError("threads".to_string()));
    }

    #[test]
    fn test_filter_bits_match_runtime_values() {
        assert_eq!(EventFilter::CONTENTION.bits(), 8);
        assert_eq!(EventFilter::NETWORK.bits(), 128);
        assert_eq!(EventFilter::CPU_SAMPLING.bits(), 256);
    }
}
