//! # clrscope - .NET Runtime Event Correlation
//!
//! clrscope turns the flat stream of events a .NET runtime emits (GC lifecycle,
//! lock contention, HTTP/DNS/socket/TLS activity, method loads, samples) into
//! completed, self-contained records: GC cycles, HTTP request timelines and
//! contention spans. It also decodes the hierarchical activity ids the runtime
//! stamps on async work, which is what ties the network events of one request
//! together.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Trace source (JSON lines)                      │
//! │        one TraceRecord per event: header + typed payload        │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ records, in trace order
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   EventProcessor (routing)                      │
//! │            one ProcessEngine per process id                     │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Contention  │   │      GC      │   │   Network    │         │
//! │  │   tracker    │   │reconstructor │   │  correlator  │         │
//! │  └──────┬───────┘   └──────┬───────┘   └──────┬───────┘         │
//! │         │    MethodStore   │  activity paths  │                 │
//! │         ▼                  ▼                  ▼                 │
//! │  ┌─────────────────────────────────────────────────────┐        │
//! │  │      Subscribers (closures, crossbeam senders)      │        │
//! │  └─────────────────────────────────────────────────────┘        │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ CompletedRecord
//!                         ▼
//!         headless print · display thread · trace.json export
//! ```
//!
//! ## Module Structure
//!
//! ### Core Pipeline Modules
//!
//! - [`profiling`]: engine configuration, the per-process engine and record routing
//!   - `engine`: feeds every record of one process to its correlators
//!   - `event_processor`: creates engines on demand and fans out results
//!
//! - [`correlation`]: start/stop matching
//!   - `contention`: lock and wait-handle waits per thread
//!   - `gc`: background and ephemeral collection slots
//!   - `network`: request timelines keyed by activity path
//!
//! - [`symbolization`]: JIT method ranges to display names, with caching
//!
//! - [`analysis`]: call-stack trie for CPU samples and allocation statistics
//!
//! - [`payload`]: binary payload reader for network events
//!
//! - [`export`]: Chrome Trace Event Format JSON for visualization
//!
//! ### Data Modules
//!
//! - [`trace_data`]: trace records and the JSON-lines replay format
//! - [`domain`]: core domain types (Pid, Tid, Timestamp, Duration) and errors
//! - [`cli`]: command-line argument parsing and configuration
//!
//! The activity path codec lives in the `clrscope-common` crate so that trace
//! producers can use it without pulling in this one.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Summarize a recorded trace
//! clrscope --input trace.jsonl
//!
//! # Print records as they complete and keep a Chrome trace
//! clrscope --input trace.jsonl --headless --export trace.json
//! ```
//!
//! ## Key Concepts
//!
//! - **Activity path**: sequence of integers packed into a 16-byte activity id;
//!   a request's sub-events carry the request's path plus one segment
//! - **Ephemeral collection**: generation 0/1 GC, may run during a background one
//! - **Correlation miss**: a stop or detail event with nothing open to attach to;
//!   counted, never an error

// Expose modules for testing
pub mod analysis;
pub mod cli;
pub mod correlation;
pub mod domain;
pub mod export;
pub mod payload;
pub mod profiling;
pub mod symbolization;
pub mod trace_data;
