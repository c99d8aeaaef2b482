//! Garbage-collection cycle reconstruction
//!
//! At most two collections are open per process: a background generation-2
//! collection and one ephemeral (or non-concurrent) collection, which may run
//! to completion while the background one is still going.
//!
//! ```text
//! Start(gen 2, Background) ──────────────────────────────► GlobalHeapHistory(2)
//!      Start(gen 0) ─► HeapStats     Start(gen 1) ─► HeapStats
//!      └── emitted ──┘               └── emitted ──┘           └── emitted
//! ```
//!
//! Two producer families close ephemeral collections differently, see
//! [`GcCloseRule`]. Exactly one rule is active per reconstructor so a cycle is
//! never closed twice.
//!
//! Under the `HeapStats` rule the runtime still restarts threads after the
//! collection ends:
//!
//! ```text
//! SuspendBegin ─► Start ─► HeapStats ─► RestartEnd
//!                          (end)        (emitted with its pause)
//! ```

use log::debug;
use serde::{Deserialize, Serialize};

use super::CorrelationStats;
use crate::domain::{Duration, Pid, Timestamp};
use crate::trace_data::{EventHeader, GcEvent, GenerationData};
use clrscope_common::GC_GLOBAL_MECHANISM_COMPACTION;

/// Number of tracked generations: 0, 1, 2 and the large object heap
pub const GENERATION_COUNT: usize = 4;

const BACKGROUND_GENERATION: u32 = 2;

/// Why a collection was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GcReason {
    AllocSmall,
    Induced,
    LowMemory,
    Empty,
    AllocLarge,
    OutOfSpaceSoh,
    OutOfSpaceLoh,
    InducedNotForced,
    Internal,
    InducedLowMemory,
    InducedCompacting,
    LowMemoryHost,
    PmFullGc,
    LowMemoryHostBlocking,
    Unknown(u32),
}

impl From<u32> for GcReason {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::AllocSmall,
            1 => Self::Induced,
            2 => Self::LowMemory,
            3 => Self::Empty,
            4 => Self::AllocLarge,
            5 => Self::OutOfSpaceSoh,
            6 => Self::OutOfSpaceLoh,
            7 => Self::InducedNotForced,
            8 => Self::Internal,
            9 => Self::InducedLowMemory,
            10 => Self::InducedCompacting,
            11 => Self::LowMemoryHost,
            12 => Self::PmFullGc,
            13 => Self::LowMemoryHostBlocking,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GcType {
    NonConcurrent,
    Background,
    /// Ephemeral collection run while a background one is in progress
    Foreground,
    Unknown(u32),
}

impl From<u32> for GcType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::NonConcurrent,
            1 => Self::Background,
            2 => Self::Foreground,
            other => Self::Unknown(other),
        }
    }
}

/// Event that closes ephemeral and non-concurrent collections
///
/// Background generation-2 collections always close on
/// `GlobalHeapHistory` with condemned generation 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum GcCloseRule {
    /// `HeapStats` is the last event of the collection
    #[default]
    HeapStats,
    /// `RestartEnd` is the last event; `HeapStats` only contributes sizes
    RestartEnd,
}

/// A completed collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GcCycle {
    pub process_id: Pid,
    pub number: u32,
    pub generation: u32,
    pub reason: GcReason,
    pub gc_type: GcType,
    pub is_compacting: bool,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Generation sizes after the collection, from `HeapStats`
    pub heap_sizes: [u64; GENERATION_COUNT],
    /// Summed over heaps; zero when the producer does not report them
    pub size_before: [u64; GENERATION_COUNT],
    pub size_after: [u64; GENERATION_COUNT],
    /// First suspension attributed to the collection
    pub suspension_duration: Duration,
    /// Every suspension attributed to the collection
    pub pause_duration: Duration,
}

impl GcCycle {
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }
}

#[derive(Debug)]
struct Collection {
    cycle: GcCycle,
    suspension_start: Option<Timestamp>,
    suspended_once: bool,
}

impl Collection {
    fn finish(mut self, end: Timestamp) -> GcCycle {
        self.cycle.end = end;
        self.cycle
    }

    fn apply_restart(&mut self, now: Timestamp, pending: Option<Timestamp>) {
        match self.suspension_start.take().or(pending) {
            Some(suspended_at) => self.add_pause(now.saturating_duration_since(suspended_at)),
            None => debug!("RestartEnd without a matching SuspendBegin"),
        }
    }

    fn add_pause(&mut self, pause: Duration) {
        if !self.suspended_once {
            self.cycle.suspension_duration = pause;
            self.suspended_once = true;
        }
        self.cycle.pause_duration += pause;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Ephemeral,
    Background,
}

#[derive(Debug, Default)]
pub struct GcReconstructor {
    close_rule: GcCloseRule,
    background: Option<Collection>,
    ephemeral: Option<Collection>,
    /// Ended by `HeapStats`, emitted once its threads restart
    awaiting_restart: Option<Collection>,
    pending_suspension: Option<Timestamp>,
    stats: CorrelationStats,
}

impl GcReconstructor {
    #[must_use]
    pub fn new(close_rule: GcCloseRule) -> Self {
        Self { close_rule, ..Self::default() }
    }

    #[must_use]
    pub fn close_rule(&self) -> GcCloseRule {
        self.close_rule
    }

    /// Feed one GC event; returns the collection it closed, if any
    pub fn on_event(&mut self, header: &EventHeader, event: &GcEvent) -> Option<GcCycle> {
        let now = header.timestamp;
        match event {
            GcEvent::Triggered { .. } => {
                let flushed = self.flush_awaiting_restart();
                self.reset();
                flushed
            }
            GcEvent::Start { count, depth, reason, gc_type } => {
                let flushed = self.flush_awaiting_restart();
                self.on_start(header.process_id, now, *count, *depth, *reason, *gc_type);
                flushed
            }
            GcEvent::SuspendBegin { .. } => {
                let flushed = self.flush_awaiting_restart();
                self.pending_suspension = Some(now);
                flushed
            }
            GcEvent::HeapStats { generation_sizes } => self.on_heap_stats(now, *generation_sizes),
            GcEvent::PerHeapHistory { generations } => {
                self.on_per_heap_history(generations);
                None
            }
            GcEvent::GlobalHeapHistory { condemned_generation, global_mechanisms } => {
                self.on_global_heap_history(now, *condemned_generation, *global_mechanisms)
            }
            GcEvent::RestartEnd => self.on_restart_end(now),
        }
    }

    /// Drop every half-built collection and the pending suspension
    pub fn reset(&mut self) {
        if self.background.is_some() || self.ephemeral.is_some() {
            debug!("GC triggered with collections still open, discarding them");
        }
        self.background = None;
        self.ephemeral = None;
        self.awaiting_restart = None;
        self.pending_suspension = None;
    }

    /// True while a background collection is open
    #[must_use]
    pub fn background_in_progress(&self) -> bool {
        self.background.is_some()
    }

    /// True while an ephemeral or non-concurrent collection is open
    #[must_use]
    pub fn ephemeral_in_progress(&self) -> bool {
        self.ephemeral.is_some()
    }

    /// True while an ended collection waits for its `RestartEnd`
    #[must_use]
    pub fn awaiting_restart(&self) -> bool {
        self.awaiting_restart.is_some()
    }

    #[must_use]
    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }

    fn on_start(
        &mut self,
        pid: Pid,
        now: Timestamp,
        count: u32,
        depth: u32,
        reason: u32,
        gc_type: u32,
    ) {
        let gc_type = GcType::from(gc_type);
        let collection = Collection {
            cycle: GcCycle {
                process_id: pid,
                number: count,
                generation: depth,
                reason: GcReason::from(reason),
                gc_type,
                is_compacting: false,
                start: now,
                end: now,
                heap_sizes: [0; GENERATION_COUNT],
                size_before: [0; GENERATION_COUNT],
                size_after: [0; GENERATION_COUNT],
                suspension_duration: Duration::ZERO,
                pause_duration: Duration::ZERO,
            },
            suspension_start: self.pending_suspension.take(),
            suspended_once: false,
        };

        let slot = if depth == BACKGROUND_GENERATION && gc_type == GcType::Background {
            &mut self.background
        } else {
            &mut self.ephemeral
        };
        if slot.replace(collection).is_some() {
            self.stats.duplicate_starts += 1;
            debug!("GC #{count} started while the previous collection in its slot was still open");
        }
    }

    /// The collection later events apply to: the ephemeral one if open
    fn current_slot(&self) -> Option<Slot> {
        if self.ephemeral.is_some() {
            Some(Slot::Ephemeral)
        } else if self.background.is_some() {
            Some(Slot::Background)
        } else {
            None
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<Collection> {
        match slot {
            Slot::Ephemeral => &mut self.ephemeral,
            Slot::Background => &mut self.background,
        }
    }

    fn current_mut(&mut self) -> Option<&mut Collection> {
        let slot = self.current_slot()?;
        self.slot_mut(slot).as_mut()
    }

    fn on_heap_stats(&mut self, now: Timestamp, sizes: [u64; GENERATION_COUNT]) -> Option<GcCycle> {
        let Some(collection) = self.current_mut() else {
            self.stats.orphan_details += 1;
            debug!("HeapStats without an open collection");
            return None;
        };
        collection.cycle.heap_sizes = sizes;

        if self.close_rule != GcCloseRule::HeapStats {
            return None;
        }
        let mut collection = self.ephemeral.take()?;
        if collection.suspension_start.is_none() && self.pending_suspension.is_none() {
            return Some(collection.finish(now));
        }
        collection.cycle.end = now;
        let flushed = self.flush_awaiting_restart();
        self.awaiting_restart = Some(collection);
        flushed
    }

    /// Emit a held collection whose `RestartEnd` never arrived
    fn flush_awaiting_restart(&mut self) -> Option<GcCycle> {
        let collection = self.awaiting_restart.take()?;
        debug!("GC #{} emitted without its RestartEnd", collection.cycle.number);
        Some(collection.cycle)
    }

    fn on_per_heap_history(&mut self, generations: &[GenerationData]) {
        let Some(collection) = self.current_mut() else {
            self.stats.orphan_details += 1;
            return;
        };
        for (generation, data) in generations.iter().take(GENERATION_COUNT).enumerate() {
            collection.cycle.size_before[generation] += data.size_before;
            collection.cycle.size_after[generation] += data.size_after;
        }
    }

    fn on_global_heap_history(
        &mut self,
        now: Timestamp,
        condemned: u32,
        mechanisms: u32,
    ) -> Option<GcCycle> {
        let Some(slot) = self.current_slot() else {
            self.stats.orphan_details += 1;
            debug!("GlobalHeapHistory without an open collection");
            return None;
        };
        let collection = self.slot_mut(slot).as_mut()?;
        collection.cycle.is_compacting = mechanisms & GC_GLOBAL_MECHANISM_COMPACTION != 0;

        if condemned != BACKGROUND_GENERATION || slot != Slot::Background {
            return None;
        }
        if collection.cycle.generation != condemned {
            debug!("GlobalHeapHistory generation mismatch for GC #{}", collection.cycle.number);
            return None;
        }
        self.background.take().map(|collection| collection.finish(now))
    }

    fn on_restart_end(&mut self, now: Timestamp) -> Option<GcCycle> {
        let pending = self.pending_suspension.take();
        if let Some(mut collection) = self.awaiting_restart.take() {
            collection.apply_restart(now, pending);
            return Some(collection.cycle);
        }
        let Some(slot) = self.current_slot() else {
            self.stats.orphan_stops += 1;
            debug!("RestartEnd without an open collection");
            return None;
        };
        let collection = self.slot_mut(slot).as_mut()?;
        collection.apply_restart(now, pending);

        if self.close_rule == GcCloseRule::RestartEnd && slot == Slot::Ephemeral {
            return self.ephemeral.take().map(|collection| collection.finish(now));
        }
        None
    }
}
