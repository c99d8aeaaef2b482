//! Profiling core modules
//!
//! - Engine configuration and event family selection
//! - The per-process correlation engine
//! - Record routing across processes
//! - Headless display formatting

pub mod config;
pub mod engine;
pub mod event_display;
pub mod event_processor;

// Re-export common types
pub use config::{EngineConfig, EventFilter, ParseEventFilterError};
pub use engine::ProcessEngine;
pub use event_display::{
    display_allocations, display_record, display_runtime_events, display_statistics,
    format_record, format_runtime_events, ProcessingStats,
};
pub use event_processor::EventProcessor;
