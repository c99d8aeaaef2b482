//! Trace export functionality
//!
//! Completed records can be written in the Chrome Trace Event Format for
//! visualization in chrome://tracing or Perfetto.

pub mod chrome_trace;

pub use chrome_trace::ChromeTraceExporter;
