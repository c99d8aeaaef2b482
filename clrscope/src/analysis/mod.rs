//! Aggregation of sampled stacks
//!
//! Pure data structures fed by the engine: the merged call-stack trie used for
//! CPU profiles, per-type allocation sampling built on top of it, and counters
//! for the runtime's one-shot events.

pub mod allocations;
pub mod merged_stacks;
pub mod runtime_events;

pub use allocations::{AllocationStats, TypeAllocations};
pub use merged_stacks::{MergedStacks, StackRenderer, TextRenderer};
pub use runtime_events::{ExceptionCount, RuntimeEventStats, Starvation};
