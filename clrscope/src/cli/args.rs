//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::correlation::GcCloseRule;
use crate::domain::{Duration, Pid};
use crate::profiling::{EngineConfig, EventFilter};

#[derive(Parser, Debug)]
#[command(
    name = "clrscope",
    about = "Correlate .NET runtime trace events into GC cycles, HTTP timelines and lock waits",
    after_help = "\
EXAMPLES:
    clrscope --input trace.jsonl                     Replay a recorded trace
    clrscope --input trace.jsonl --pid 1234          Only one process
    clrscope --events gc,network --headless < live   Print records as they complete
    clrscope --input trace.jsonl --export trace.json Write a Chrome trace"
)]
pub struct Args {
    /// JSON-lines trace to replay (reads stdin when omitted or `-`)
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Only correlate records from this process
    #[arg(short, long)]
    pub pid: Option<u32>,

    /// Event families to process, comma separated
    #[arg(long, value_name = "LIST", default_value = "all")]
    pub events: EventFilter,

    /// Event that closes an ephemeral or non-concurrent collection
    #[arg(long, value_enum, default_value_t = GcCloseRule::HeapStats)]
    pub gc_close_rule: GcCloseRule,

    /// Hide lock waits shorter than this
    #[arg(long, value_name = "MS", default_value = "0")]
    pub min_wait_ms: f64,

    /// Export completed records as a Chrome trace
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Number of allocation types shown in the summary
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Print each record as it completes instead of the live view
    #[arg(long)]
    pub headless: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Engine settings shared by every process
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            gc_close_rule: self.gc_close_rule,
            filter: self.events,
            min_wait: Duration::from_millis_f64(self.min_wait_ms),
        }
    }

    #[must_use]
    pub fn target_pid(&self) -> Option<Pid> {
        self.pid.map(Pid)
    }

    /// The input file, `None` for stdin
    #[must_use]
    pub fn input_path(&self) -> Option<&PathBuf> {
        self.input.as_ref().filter(|path| path.as_os_str() != "-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["clrscope"]);
        assert_eq!(args.engine_config(), EngineConfig::default());
        assert!(args.input_path().is_none());
        assert_eq!(args.top, 10);
    }

    #[test]
    fn test_engine_config_from_flags() {
        let args = Args::parse_from([
            "clrscope",
            "--events",
            "gc,contention",
            "--gc-close-rule",
            "restart-end",
            "--min-wait-ms",
            "1.5",
            "--pid",
            "42",
        ]);
        let config = args.engine_config();
        assert_eq!(config.filter, EventFilter::GC | EventFilter::CONTENTION);
        assert_eq!(config.gc_close_rule, GcCloseRule::RestartEnd);
        assert_eq!(config.min_wait, Duration(1_500_000));
        assert_eq!(args.target_pid(), Some(Pid(42)));
    }

    #[test]
    fn test_stdin_dash() {
        let args = Args::parse_from(["clrscope", "--input", "-"]);
        assert!(args.input_path().is_none());
    }

    #[test]
    fn test_unknown_family_is_rejected() {
        assert!(Args::try_parse_from(["clrscope", "--events", "gc,bogus"]).is_err());
    }
}
