//! Allocation sampling aggregation
//!
//! The runtime samples roughly one allocation per 100 KB and reports the type
//! and the amount allocated since the previous sample. Totals are kept per type
//! name together with a merged trie of the allocating stacks.

use std::collections::HashMap;

use super::MergedStacks;
use crate::symbolization::SymbolicFrame;

/// Sampled allocations of one type
#[derive(Debug, Clone, Default)]
pub struct TypeAllocations {
    pub type_name: String,
    /// Sum of reported allocation amounts, in bytes
    pub size: u64,
    pub count: u64,
    /// Samples taken on the large object heap
    pub large_count: u64,
    pub stacks: MergedStacks,
}

#[derive(Debug, Default)]
pub struct AllocationStats {
    types: HashMap<String, TypeAllocations>,
    total_size: u64,
    total_count: u64,
}

impl AllocationStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one allocation sample; `frames` are outermost first
    pub fn record(
        &mut self,
        type_name: &str,
        amount: u64,
        is_large: bool,
        frames: Option<&[SymbolicFrame]>,
    ) {
        let entry = self.types.entry(type_name.to_string()).or_insert_with(|| TypeAllocations {
            type_name: type_name.to_string(),
            ..TypeAllocations::default()
        });
        entry.size = entry.size.saturating_add(amount);
        entry.count += 1;
        if is_large {
            entry.large_count += 1;
        }
        if let Some(frames) = frames {
            entry.stacks.add_stack(frames);
        }

        self.total_size = self.total_size.saturating_add(amount);
        self.total_count += 1;
    }

    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<&TypeAllocations> {
        self.types.get(type_name)
    }

    /// Types ordered by descending sampled size, then name
    #[must_use]
    pub fn by_size(&self) -> Vec<&TypeAllocations> {
        let mut types: Vec<&TypeAllocations> = self.types.values().collect();
        types.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.type_name.cmp(&b.type_name)));
        types
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregates_per_type() {
        let mut stats = AllocationStats::new();
        stats.record("System.String", 100_000, false, None);
        stats.record("System.Byte[]", 250_000, true, None);
        stats.record("System.String", 120_000, false, None);

        let string = stats.get("System.String").unwrap();
        assert_eq!(string.size, 220_000);
        assert_eq!(string.count, 2);
        assert_eq!(stats.get("System.Byte[]").unwrap().large_count, 1);
        assert_eq!(stats.total_size(), 470_000);
        assert_eq!(stats.total_count(), 3);
    }

    #[test]
    fn test_by_size_ordering() {
        let mut stats = AllocationStats::new();
        stats.record("B", 10, false, None);
        stats.record("A", 10, false, None);
        stats.record("C", 50, false, None);
        let names: Vec<&str> = stats.by_size().iter().map(|t| t.type_name.as_str()).collect();
        assert_eq!(names, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_stacks_merge_per_type() {
        let mut stats = AllocationStats::new();
        let frames = vec![SymbolicFrame::new(1, "Main"), SymbolicFrame::new(2, "Alloc")];
        stats.record("T", 1, false, Some(&frames));
        stats.record("T", 1, false, Some(&frames));
        let stacks = &stats.get("T").unwrap().stacks;
        assert_eq!(stacks.stack_count(), 2);
        assert_eq!(stacks.child("Main").unwrap().child("Alloc").unwrap().count_as_leaf(), 2);
    }
}
