//! Decoded trace records
//!
//! The trace source hands the engine one [`TraceRecord`] per runtime event: a
//! common [`EventHeader`] plus a payload tagged by event family. Records are
//! exchanged as JSON lines, which is also the replay format read by the CLI.
//!
//! ```text
//! {"timestamp":1000,"process_id":42,"thread_id":7,
//!  "activity_id":"00001012-0000-0000-0000-0000bfa99d59",
//!  "payload":{"gc":{"event":"start","count":3,"depth":0,"reason":0,"gc_type":0}}}
//! ```

use clrscope_common::{ActivityId, NetProvider};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;

use crate::domain::{Pid, ReplayError, Tid, Timestamp};

/// Fields shared by every event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    pub timestamp: Timestamp,
    pub process_id: Pid,
    pub thread_id: Tid,
    #[serde(default)]
    pub activity_id: ActivityId,
    #[serde(default)]
    pub related_activity_id: ActivityId,
    #[serde(default)]
    pub keywords: u64,
    /// Instruction addresses, innermost frame first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<u64>>,
}

/// One decoded runtime event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    #[serde(flatten)]
    pub header: EventHeader,
    pub payload: TracePayload,
}

/// Event payload, tagged by family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePayload {
    Gc(GcEvent),
    Contention(ContentionEvent),
    Network(NetworkEvent),
    /// Network event still in its binary form; see [`crate::payload`]
    NetworkRaw {
        provider: NetProvider,
        event_id: u16,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
    Method(MethodEvent),
    Sample(SampleEvent),
    Runtime(RuntimeEvent),
    /// Event the source could not classify
    Unknown {
        provider: String,
        event_id: u16,
    },
}

// ============================================================================
// GC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenerationData {
    pub size_before: u64,
    pub size_after: u64,
}

/// GC lifecycle events. Enumerated fields carry the raw runtime values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GcEvent {
    Triggered {
        reason: u32,
    },
    Start {
        count: u32,
        depth: u32,
        reason: u32,
        gc_type: u32,
    },
    /// Generation 0, 1, 2 and LOH sizes after the collection
    HeapStats {
        generation_sizes: [u64; 4],
    },
    /// One entry per generation, already summed over heaps by the source
    PerHeapHistory {
        generations: Vec<GenerationData>,
    },
    GlobalHeapHistory {
        condemned_generation: u32,
        global_mechanisms: u32,
    },
    SuspendBegin {
        #[serde(default)]
        reason: u32,
    },
    RestartEnd,
}

// ============================================================================
// Contention
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ContentionEvent {
    /// Monitor (lock) contention began
    Start {
        #[serde(default)]
        flags: u8,
    },
    Stop {
        #[serde(default)]
        flags: u8,
        /// Newer runtimes report their own measurement
        #[serde(default)]
        duration_ns: f64,
    },
    /// Blocking wait on a wait handle began
    WaitHandleStart {
        #[serde(default)]
        source: u8,
    },
    WaitHandleStop,
}

// ============================================================================
// Network
// ============================================================================

/// Network sub-protocol events (HTTP, name resolution, sockets, TLS)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NetworkEvent {
    RequestStart {
        scheme: String,
        host: String,
        port: u32,
        path: String,
        #[serde(default)]
        version_major: u8,
        #[serde(default)]
        version_minor: u8,
    },
    RequestStop {
        status_code: i32,
    },
    RequestFailed {
        message: String,
    },
    RequestFailedDetailed {
        message: String,
    },
    ConnectionEstablished {
        version_major: u8,
        version_minor: u8,
        connection_id: Option<i64>,
        #[serde(default)]
        scheme: String,
        #[serde(default)]
        host: String,
        #[serde(default)]
        port: u32,
        #[serde(default)]
        remote_address: String,
    },
    ConnectionClosed {
        version_major: u8,
        version_minor: u8,
        connection_id: Option<i64>,
    },
    RequestLeftQueue {
        time_on_queue_ms: f64,
        #[serde(default)]
        version_major: u8,
        #[serde(default)]
        version_minor: u8,
    },
    RequestHeadersStart {
        connection_id: Option<i64>,
    },
    RequestHeadersStop,
    RequestContentStart,
    RequestContentStop {
        #[serde(default)]
        content_length: i64,
    },
    ResponseHeadersStart,
    ResponseHeadersStop {
        status_code: i32,
    },
    ResponseContentStart,
    ResponseContentStop,
    Redirect {
        redirect_url: String,
    },
    DnsStart {
        host: String,
    },
    DnsStop,
    DnsFailed,
    ConnectStart {
        address: String,
    },
    ConnectStop,
    ConnectFailed {
        message: String,
    },
    AcceptStart {
        address: String,
    },
    AcceptStop,
    AcceptFailed {
        message: String,
    },
    HandshakeStart {
        is_server: bool,
        target_host: String,
    },
    HandshakeStop {
        protocol: u32,
    },
    HandshakeFailed {
        is_server: bool,
        elapsed_ms: f64,
        message: String,
    },
}

// ============================================================================
// Methods and samples
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MethodEvent {
    /// JIT load or rundown of a method body
    LoadVerbose {
        method_start_address: u64,
        method_size: u32,
        method_namespace: String,
        method_name: String,
        method_signature: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SampleEvent {
    /// CPU sample; the stack is in the header
    CpuSample,
    AllocationTick {
        type_name: String,
        allocation_amount: u64,
        #[serde(default)]
        is_large: bool,
    },
}

// ============================================================================
// Exceptions, finalizers and the thread pool
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// First-chance exception thrown
    ExceptionStart {
        exception_type: String,
        #[serde(default)]
        exception_message: String,
    },
    /// Type description; finalizer events refer to types by id
    BulkType { type_id: u64, type_name: String },
    FinalizeObject { type_id: u64 },
    /// The thread pool added workers to get out of starvation
    ThreadPoolStarvation { new_worker_thread_count: u32 },
}

// ============================================================================
// JSON lines
// ============================================================================

impl TraceRecord {
    /// Parse one JSON line. Blank lines and `#` comments yield `Ok(None)`.
    ///
    /// # Errors
    /// Returns [`ReplayError::InvalidRecord`] when the line is not a valid record
    pub fn parse_line(line: &str, line_number: usize) -> Result<Option<Self>, ReplayError> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }
        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|source| ReplayError::InvalidRecord { line: line_number, source })
    }

    /// Read every record from a JSON-lines reader
    ///
    /// # Errors
    /// Fails on the first unreadable or malformed line
    pub fn read_all<R: BufRead>(reader: R) -> Result<Vec<Self>, ReplayError> {
        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            if let Some(record) = Self::parse_line(&line?, index + 1)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Read every record from a JSON-lines file
    ///
    /// # Errors
    /// Fails if the file cannot be opened or contains a malformed line
    pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<Self>, ReplayError> {
        let file = std::fs::File::open(path)?;
        Self::read_all(std::io::BufReader::new(file))
    }
}

/// Byte buffers travel as lowercase hex strings
mod hex_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::fmt::Write as _;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let mut text = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(text, "{b:02x}");
        }
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        let clean: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        if clean.len() % 2 != 0 {
            return Err(D::Error::custom("hex payload has an odd number of digits"));
        }
        clean
            .chunks(2)
            .map(|pair| {
                let s = std::str::from_utf8(pair).map_err(D::Error::custom)?;
                u8::from_str_radix(s, 16).map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gc_start_line() {
        let line = r#"{"timestamp":1000,"process_id":42,"thread_id":7,"payload":{"gc":{"event":"start","count":3,"depth":0,"reason":1,"gc_type":0}}}"#;
        let record = TraceRecord::parse_line(line, 1).unwrap().unwrap();
        assert_eq!(record.header.timestamp, Timestamp(1000));
        assert_eq!(record.header.process_id, Pid(42));
        assert!(record.header.activity_id.is_nil());
        assert_eq!(
            record.payload,
            TracePayload::Gc(GcEvent::Start { count: 3, depth: 0, reason: 1, gc_type: 0 })
        );
    }

    #[test]
    fn test_parse_raw_network_payload() {
        let line = r#"{"timestamp":5,"process_id":1,"thread_id":1,"activity_id":"00000011-0000-0000-0000-0000bd9d99ad","payload":{"network_raw":{"provider":"dns","event_id":2,"data":"0a0B"}}}"#;
        let record = TraceRecord::parse_line(line, 1).unwrap().unwrap();
        match record.payload {
            TracePayload::NetworkRaw { provider, event_id, data } => {
                assert_eq!(provider, NetProvider::Dns);
                assert_eq!(event_id, 2);
                assert_eq!(data, vec![0x0a, 0x0b]);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_parse_runtime_events() {
        let line = r#"{"timestamp":9,"process_id":1,"thread_id":2,"payload":{"runtime":{"event":"exception_start","exception_type":"System.InvalidOperationException"}}}"#;
        let record = TraceRecord::parse_line(line, 1).unwrap().unwrap();
        assert_eq!(
            record.payload,
            TracePayload::Runtime(RuntimeEvent::ExceptionStart {
                exception_type: "System.InvalidOperationException".to_string(),
                exception_message: String::new(),
            })
        );

        let line = r#"{"timestamp":9,"process_id":1,"thread_id":2,"payload":{"runtime":{"event":"thread_pool_starvation","new_worker_thread_count":12}}}"#;
        let record = TraceRecord::parse_line(line, 2).unwrap().unwrap();
        let expected = RuntimeEvent::ThreadPoolStarvation { new_worker_thread_count: 12 };
        assert_eq!(record.payload, TracePayload::Runtime(expected));
    }

    #[test]
    fn test_blank_and_comment_lines_are_skipped() {
        assert!(TraceRecord::parse_line("", 1).unwrap().is_none());
        assert!(TraceRecord::parse_line("   # header", 2).unwrap().is_none());
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let err = TraceRecord::parse_line("{\"timestamp\":", 17).unwrap_err();
        assert!(matches!(err, ReplayError::InvalidRecord { line: 17, .. }));
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = TraceRecord {
            header: EventHeader {
                timestamp: Timestamp(10),
                process_id: Pid(3),
                thread_id: Tid(4),
                stack: Some(vec![0x1000, 0x2000]),
                ..EventHeader::default()
            },
            payload: TracePayload::NetworkRaw {
                provider: NetProvider::Http,
                event_id: 2,
                data: vec![0xc8, 0, 0, 0],
            },
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"data\":\"c8000000\""));
        let back: TraceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
