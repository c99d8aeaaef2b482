//! Per-process correlation engine
//!
//! Owns every piece of state for one monitored process. Records must be fed in
//! trace order from a single thread; engines for different processes are
//! independent and may live on different threads.

use log::{debug, warn};

use super::{EngineConfig, EventFilter};
use crate::analysis::{AllocationStats, MergedStacks, RuntimeEventStats};
use crate::correlation::{
    CompletedRecord, ContentionSpan, ContentionTracker, CorrelationStats, GcCycle, GcReconstructor,
    NetworkCorrelator, RequestTimeline, Subscribers,
};
use crate::domain::Pid;
use crate::payload::decode_network_event;
use crate::symbolization::{AddressStack, MethodStore, NativeResolver};
use crate::trace_data::{
    EventHeader, MethodEvent, NetworkEvent, RuntimeEvent, SampleEvent, TracePayload, TraceRecord,
};

pub struct ProcessEngine {
    process_id: Pid,
    config: EngineConfig,

    methods: MethodStore,
    contention: ContentionTracker,
    gc: GcReconstructor,
    network: NetworkCorrelator,
    cpu_stacks: MergedStacks,
    allocations: AllocationStats,
    runtime_events: RuntimeEventStats,

    gc_subscribers: Subscribers<GcCycle>,
    request_subscribers: Subscribers<RequestTimeline>,
    contention_subscribers: Subscribers<ContentionSpan>,

    /// Records skipped by the event filter
    pub filtered_records: u64,
    pub cpu_samples: u64,
}

impl ProcessEngine {
    #[must_use]
    pub fn new(process_id: Pid, config: EngineConfig) -> Self {
        Self {
            process_id,
            config,
            methods: MethodStore::new(),
            contention: ContentionTracker::with_min_wait(config.min_wait),
            gc: GcReconstructor::new(config.gc_close_rule),
            network: NetworkCorrelator::new(),
            cpu_stacks: MergedStacks::new(),
            allocations: AllocationStats::new(),
            runtime_events: RuntimeEventStats::new(),
            gc_subscribers: Subscribers::new(),
            request_subscribers: Subscribers::new(),
            contention_subscribers: Subscribers::new(),
            filtered_records: 0,
            cpu_samples: 0,
        }
    }

    /// Feed one record; returns the record it completed, if any
    ///
    /// Typed subscribers have already been notified when this returns.
    pub fn process(&mut self, record: &TraceRecord) -> Option<CompletedRecord> {
        let header = &record.header;
        match &record.payload {
            TracePayload::Gc(event) => {
                if !self.accepts(EventFilter::GC) {
                    return None;
                }
                let cycle = self.gc.on_event(header, event)?;
                self.gc_subscribers.publish(&cycle);
                Some(CompletedRecord::Gc(cycle))
            }
            TracePayload::Contention(event) => {
                if !self.accepts(EventFilter::CONTENTION) {
                    return None;
                }
                let span = self.contention.on_event(header, event, &self.methods)?;
                self.contention_subscribers.publish(&span);
                Some(CompletedRecord::Contention(span))
            }
            TracePayload::Network(event) => self.process_network(header, event),
            TracePayload::NetworkRaw { provider, event_id, data } => {
                if !self.accepts(EventFilter::NETWORK) {
                    return None;
                }
                if let Some(event) = decode_network_event(*provider, *event_id, data) {
                    self.process_network(header, &event)
                } else {
                    self.network.record_undecodable();
                    warn!(
                        "{}: undecodable {} event {event_id} ({} bytes)",
                        self.process_id,
                        provider.source_name(),
                        data.len()
                    );
                    None
                }
            }
            TracePayload::Method(MethodEvent::LoadVerbose {
                method_start_address,
                method_size,
                method_namespace,
                method_name,
                method_signature,
            }) => {
                self.methods.add_method(
                    *method_start_address,
                    *method_size,
                    method_namespace,
                    method_name,
                    method_signature,
                );
                None
            }
            TracePayload::Sample(SampleEvent::CpuSample) => {
                if self.accepts(EventFilter::CPU_SAMPLING) {
                    self.cpu_samples += 1;
                    if let Some(stack) = &header.stack {
                        let stack = AddressStack::new(stack.clone());
                        self.cpu_stacks.add_address_stack(&stack, &self.methods);
                    }
                }
                None
            }
            TracePayload::Sample(SampleEvent::AllocationTick {
                type_name,
                allocation_amount,
                is_large,
            }) => {
                if self.accepts(EventFilter::ALLOCATION_TICK) {
                    let frames = header.stack.as_ref().map(|stack| {
                        let mut frames = AddressStack::new(stack.clone()).symbolize(&self.methods);
                        frames.reverse();
                        frames
                    });
                    self.allocations.record(
                        type_name,
                        *allocation_amount,
                        *is_large,
                        frames.as_deref(),
                    );
                }
                None
            }
            TracePayload::Runtime(event) => {
                self.process_runtime(header, event);
                None
            }
            TracePayload::Unknown { provider, event_id } => {
                debug!("{}: ignoring {provider} event {event_id}", self.process_id);
                None
            }
        }
    }

    fn process_network(
        &mut self,
        header: &EventHeader,
        event: &NetworkEvent,
    ) -> Option<CompletedRecord> {
        if !self.accepts(EventFilter::NETWORK) {
            return None;
        }
        let timeline = self.network.on_event(header, event)?;
        self.request_subscribers.publish(&timeline);
        Some(CompletedRecord::Request(timeline))
    }

    fn process_runtime(&mut self, header: &EventHeader, event: &RuntimeEvent) {
        match event {
            RuntimeEvent::ExceptionStart { exception_type, exception_message } => {
                if self.accepts(EventFilter::EXCEPTION) {
                    self.runtime_events.record_exception(exception_type, exception_message);
                }
            }
            RuntimeEvent::BulkType { type_id, type_name } => {
                self.runtime_events.register_type(*type_id, type_name);
            }
            RuntimeEvent::FinalizeObject { type_id } => {
                if self.accepts(EventFilter::FINALIZER) {
                    self.runtime_events.record_finalize(*type_id);
                }
            }
            RuntimeEvent::ThreadPoolStarvation { new_worker_thread_count: workers } => {
                if self.accepts(EventFilter::THREAD_STARVATION) {
                    debug!("{}: thread pool starving, {workers} workers", self.process_id);
                    self.runtime_events.record_starvation(header.timestamp, *workers);
                }
            }
        }
    }

    fn accepts(&mut self, family: EventFilter) -> bool {
        let accepted = self.config.filter.contains(family);
        if !accepted {
            self.filtered_records += 1;
        }
        accepted
    }

    // Subscriptions

    pub fn on_gc_cycle(&mut self, callback: impl FnMut(&GcCycle) + Send + 'static) {
        self.gc_subscribers.subscribe(callback);
    }

    pub fn on_request(&mut self, callback: impl FnMut(&RequestTimeline) + Send + 'static) {
        self.request_subscribers.subscribe(callback);
    }

    pub fn on_contention(&mut self, callback: impl FnMut(&ContentionSpan) + Send + 'static) {
        self.contention_subscribers.subscribe(callback);
    }

    pub fn gc_subscribers(&mut self) -> &mut Subscribers<GcCycle> {
        &mut self.gc_subscribers
    }

    pub fn request_subscribers(&mut self) -> &mut Subscribers<RequestTimeline> {
        &mut self.request_subscribers
    }

    pub fn contention_subscribers(&mut self) -> &mut Subscribers<ContentionSpan> {
        &mut self.contention_subscribers
    }

    pub fn set_native_resolver(&mut self, resolver: Box<dyn NativeResolver>) {
        self.methods.set_native_resolver(resolver);
    }

    // Accessors

    #[must_use]
    pub fn process_id(&self) -> Pid {
        self.process_id
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn methods(&self) -> &MethodStore {
        &self.methods
    }

    #[must_use]
    pub fn cpu_stacks(&self) -> &MergedStacks {
        &self.cpu_stacks
    }

    #[must_use]
    pub fn allocations(&self) -> &AllocationStats {
        &self.allocations
    }

    /// Exceptions, finalized objects and starvation events
    #[must_use]
    pub fn runtime_events(&self) -> &RuntimeEventStats {
        &self.runtime_events
    }

    #[must_use]
    pub fn contention(&self) -> &ContentionTracker {
        &self.contention
    }

    #[must_use]
    pub fn gc(&self) -> &GcReconstructor {
        &self.gc
    }

    #[must_use]
    pub fn network(&self) -> &NetworkCorrelator {
        &self.network
    }

    /// Correlation misses summed over all components
    #[must_use]
    pub fn correlation_stats(&self) -> CorrelationStats {
        let mut stats = *self.contention.stats();
        stats += *self.gc.stats();
        stats += *self.network.stats();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::GcCloseRule;
    use crate::domain::{Duration, Tid, Timestamp};
    use crate::payload::reader::tests::PayloadBuilder;
    use crate::trace_data::{ContentionEvent, GcEvent};
    use clrscope_common::{encode, NetProvider};
    use std::sync::{Arc, Mutex};

    fn record(ts: u64, payload: TracePayload) -> TraceRecord {
        TraceRecord {
            header: EventHeader {
                timestamp: Timestamp(ts),
                process_id: Pid(10),
                thread_id: Tid(1),
                ..EventHeader::default()
            },
            payload,
        }
    }

    fn with_stack(mut record: TraceRecord, stack: Vec<u64>) -> TraceRecord {
        record.header.stack = Some(stack);
        record
    }

    fn load(address: u64, name: &str) -> TraceRecord {
        record(
            0,
            TracePayload::Method(MethodEvent::LoadVerbose {
                method_start_address: address,
                method_size: 0x100,
                method_namespace: "App".into(),
                method_name: name.into(),
                method_signature: "void  ()".into(),
            }),
        )
    }

    #[test]
    fn test_gc_cycle_reaches_subscribers() {
        let mut engine = ProcessEngine::new(Pid(10), EngineConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.on_gc_cycle(move |cycle| sink.lock().unwrap().push(cycle.number));

        let start = GcEvent::Start { count: 5, depth: 0, reason: 0, gc_type: 0 };
        assert!(engine.process(&record(1, TracePayload::Gc(start))).is_none());
        let stats = GcEvent::HeapStats { generation_sizes: [1, 2, 3, 4] };
        let completed = engine.process(&record(2, TracePayload::Gc(stats))).unwrap();

        assert!(matches!(completed, CompletedRecord::Gc(ref cycle) if cycle.number == 5));
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn test_filtered_family_is_skipped() {
        let config = EngineConfig { filter: EventFilter::NETWORK, ..EngineConfig::default() };
        let mut engine = ProcessEngine::new(Pid(10), config);
        let start = GcEvent::Start { count: 1, depth: 0, reason: 0, gc_type: 0 };
        engine.process(&record(1, TracePayload::Gc(start)));
        assert!(!engine.gc().ephemeral_in_progress());
        assert_eq!(engine.filtered_records, 1);
    }

    #[test]
    fn test_contention_stack_uses_loaded_methods() {
        let mut engine = ProcessEngine::new(Pid(10), EngineConfig::default());
        engine.process(&load(0x1000, "Worker"));
        let start = TracePayload::Contention(ContentionEvent::Start { flags: 0 });
        engine.process(&with_stack(record(100, start), vec![0x1010]));
        let stop = TracePayload::Contention(ContentionEvent::Stop { flags: 0, duration_ns: 0.0 });
        let completed = engine.process(&record(300, stop)).unwrap();

        let CompletedRecord::Contention(span) = completed else {
            panic!("expected a contention span");
        };
        assert_eq!(span.duration, Duration(200));
        assert_eq!(span.call_stack, vec!["App.Worker()"]);
    }

    #[test]
    fn test_min_wait_from_config() {
        let config = EngineConfig { min_wait: Duration(1_000), ..EngineConfig::default() };
        let mut engine = ProcessEngine::new(Pid(10), config);
        engine.process(&record(0, TracePayload::Contention(ContentionEvent::Start { flags: 0 })));
        let stop = TracePayload::Contention(ContentionEvent::Stop { flags: 0, duration_ns: 0.0 });
        assert!(engine.process(&record(10, stop)).is_none());
        assert_eq!(engine.contention().filtered_count(), 1);
    }

    #[test]
    fn test_raw_network_payloads_are_decoded() {
        let mut engine = ProcessEngine::new(Pid(10), EngineConfig::default());
        let start = PayloadBuilder::default().str("https").str("example.com").u32(443).str("/");
        let start = start.u8(1).u8(1).0;
        let stop = PayloadBuilder::default().u32(200).0;

        let id = encode(&[1, 3]).unwrap();
        let raw = |event_id, data: Vec<u8>| TracePayload::NetworkRaw {
            provider: NetProvider::Http,
            event_id,
            data,
        };
        let mut first = record(0, raw(1, start));
        first.header.activity_id = id;
        let mut last = record(50, raw(2, stop));
        last.header.activity_id = id;

        assert!(engine.process(&first).is_none());
        let Some(CompletedRecord::Request(timeline)) = engine.process(&last) else {
            panic!("expected a request timeline");
        };
        assert_eq!(timeline.url, "https://example.com:443/");
        assert_eq!(timeline.status_code(), Some(200));
    }

    #[test]
    fn test_undecodable_payload_is_counted() {
        let mut engine = ProcessEngine::new(Pid(10), EngineConfig::default());
        let payload =
            TracePayload::NetworkRaw { provider: NetProvider::Http, event_id: 99, data: vec![] };
        assert!(engine.process(&record(0, payload)).is_none());
        assert_eq!(engine.correlation_stats().undecodable_payloads, 1);
    }

    #[test]
    fn test_samples_feed_tries() {
        let mut engine = ProcessEngine::new(Pid(10), EngineConfig::default());
        engine.process(&load(0x1000, "Leaf"));
        engine.process(&load(0x2000, "Main"));
        let sample = record(1, TracePayload::Sample(SampleEvent::CpuSample));
        let cpu = with_stack(sample, vec![0x1001, 0x2001]);
        engine.process(&cpu);
        engine.process(&cpu);
        let alloc = TracePayload::Sample(SampleEvent::AllocationTick {
            type_name: "System.String".into(),
            allocation_amount: 100_000,
            is_large: false,
        });
        engine.process(&with_stack(record(2, alloc), vec![0x1001, 0x2001]));

        assert_eq!(engine.cpu_samples, 2);
        let main = engine.cpu_stacks().child("App.Main()").unwrap();
        assert_eq!(main.child("App.Leaf()").unwrap().count_as_leaf(), 2);
        let strings = engine.allocations().get("System.String").unwrap();
        assert_eq!(strings.size, 100_000);
        assert!(strings.stacks.child("App.Main()").is_some());
    }

    #[test]
    fn test_runtime_event_families() {
        let config = EngineConfig {
            filter: EventFilter::all() - EventFilter::THREAD_STARVATION,
            ..EngineConfig::default()
        };
        let mut engine = ProcessEngine::new(Pid(10), config);
        let runtime = |ts, event| record(ts, TracePayload::Runtime(event));
        engine.process(&runtime(
            1,
            RuntimeEvent::ExceptionStart {
                exception_type: "System.FormatException".into(),
                exception_message: "bad digit".into(),
            },
        ));
        engine.process(&runtime(
            2,
            RuntimeEvent::BulkType { type_id: 0x40, type_name: "App.Connection".into() },
        ));
        engine.process(&runtime(3, RuntimeEvent::FinalizeObject { type_id: 0x40 }));
        engine.process(&runtime(
            4,
            RuntimeEvent::ThreadPoolStarvation { new_worker_thread_count: 17 },
        ));

        let events = engine.runtime_events();
        assert_eq!(events.exceptions()[0].type_name, "System.FormatException");
        assert_eq!(events.exceptions()[0].last_message, "bad digit");
        assert_eq!(events.finalized(), vec![("App.Connection", 1)]);
        assert!(events.starvations().is_empty());
        assert_eq!(engine.filtered_records, 1);
    }

    #[test]
    fn test_close_rule_from_config() {
        let config =
            EngineConfig { gc_close_rule: GcCloseRule::RestartEnd, ..EngineConfig::default() };
        let engine = ProcessEngine::new(Pid(10), config);
        assert_eq!(engine.gc().close_rule(), GcCloseRule::RestartEnd);
    }
}
