use clrscope::export::ChromeTraceExporter;
use clrscope::profiling::{EngineConfig, EventProcessor};
use clrscope::trace_data::TraceRecord;

fn fixture(name: &str) -> Vec<TraceRecord> {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    TraceRecord::load_file(path).expect("Failed to load fixture")
}

#[test]
fn test_export_creates_valid_json() {
    // Export an empty exporter to an in-memory buffer
    let exporter = ChromeTraceExporter::new();
    let mut buffer = Vec::new();

    exporter.export(&mut buffer).expect("Failed to export trace");

    // Verify the output is valid JSON
    let json_str = String::from_utf8(buffer).expect("Invalid UTF-8");
    let parsed: serde_json::Value = serde_json::from_str(&json_str).expect("Invalid JSON");

    // Verify it has the expected structure
    assert!(parsed.get("traceEvents").is_some());
    assert!(parsed.get("displayTimeUnit").is_some());
    assert_eq!(parsed["displayTimeUnit"], "ms");
}

#[test]
fn test_replayed_trace_exports_to_file() {
    let mut processor = EventProcessor::new(
        false,
        EngineConfig::default(),
        None,
        Some(ChromeTraceExporter::new()),
        None,
    );
    processor.process_all(&fixture("gc_cycles.jsonl"));
    processor.process_all(&fixture("http_redirect.jsonl"));

    let exporter = processor.take_exporter().expect("exporter was configured");
    // three collections, one request with dns, socket and the redirect exchange
    assert_eq!(exporter.event_count(), 7);

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("trace.json");
    exporter.export_to_file(&path).expect("Failed to export trace");

    let text = std::fs::read_to_string(&path).expect("Failed to read export");
    let parsed: serde_json::Value = serde_json::from_str(&text).expect("Invalid JSON");
    let events = parsed["traceEvents"].as_array().expect("traceEvents array");

    let complete: Vec<&serde_json::Value> = events.iter().filter(|e| e["ph"] == "X").collect();
    let metadata: Vec<&serde_json::Value> = events.iter().filter(|e| e["ph"] == "M").collect();
    assert_eq!(complete.len(), 7);
    assert_eq!(metadata.len(), 2);

    let names: Vec<&str> = complete.iter().filter_map(|e| e["name"].as_str()).collect();
    assert!(names.contains(&"GC #10 gen2"));
    assert!(names.contains(&"https://example.com:443/old"));
    assert!(names.contains(&"redirect request/response"));

    // timestamps start at the earliest span, the request at 1000ns
    let request = complete.iter().find(|e| e["cat"] == "http" && e["args"]["status"] == 200);
    let request = request.expect("request span");
    assert_eq!(request["ts"], 0.0);
    assert_eq!(request["dur"], 0.85);
    assert_eq!(request["pid"], 200);
}
