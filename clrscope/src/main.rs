//! # clrscope - Main Entry Point
//!
//! Replays a JSON-lines trace (file or stdin) through the correlation engine:
//! - **Live view** (default): a display thread lists records as they complete
//! - **Headless** (`--headless`): full records printed inline, periodic statistics
//!
//! Either way a per-process summary follows once the input ends or Ctrl+C arrives.

// Main function is intentionally long for clarity; time conversions lose precision for display
#![allow(clippy::too_many_lines, clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver};
use log::{info, warn};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use clrscope::cli::Args;
use clrscope::correlation::CompletedRecord;
use clrscope::export::ChromeTraceExporter;
use clrscope::profiling::{
    display_allocations, display_runtime_events, display_statistics, format_record,
    EventProcessor, ProcessEngine,
};
use clrscope::trace_data::TraceRecord;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("invalid argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Live view: one line per completed record, totals when the channel closes
fn run_display(record_rx: &Receiver<CompletedRecord>) -> usize {
    let mut shown = 0;
    for record in record_rx {
        shown += 1;
        let text = format_record(&record);
        let headline = text.lines().next().unwrap_or_default();
        println!("{shown:>6} {} {headline}", record.process_id());
    }
    shown
}

fn print_engine_summary(engine: &ProcessEngine, top: usize) {
    println!(
        "\n{}: {} methods, {} open requests, {} pending waits, {} cpu samples",
        engine.process_id(),
        engine.methods().method_count(),
        engine.network().pending_count(),
        engine.contention().pending_count(),
        engine.cpu_samples
    );
    let gc = engine.gc();
    if gc.background_in_progress() || gc.ephemeral_in_progress() || gc.awaiting_restart() {
        println!("  GC still in progress at end of trace");
    }
    if engine.filtered_records > 0 {
        println!("  {} records skipped by --events", engine.filtered_records);
    }
    if engine.cpu_stacks().stack_count() > 0 {
        println!("\nCPU stacks:{}", engine.cpu_stacks().render_to_string());
    }
    display_allocations(engine.allocations(), top);
    display_runtime_events(engine.runtime_events(), top);
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();

    let quiet = args.quiet;

    if args.min_wait_ms.is_nan() || args.min_wait_ms < 0.0 {
        anyhow::bail!("invalid argument: --min-wait-ms must be a non-negative number");
    }

    // ── Input ───────────────────────────────────────────────────────────
    let input: Box<dyn AsyncRead + Unpin + Send> = match args.input_path() {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open trace input: {}", path.display()))?;
            Box::new(file)
        }
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(input).lines();

    if !quiet {
        eprintln!("clrscope v{}", env!("CARGO_PKG_VERSION"));
        match args.input_path() {
            Some(path) => eprintln!("input: {}", path.display()),
            None => eprintln!("input: stdin"),
        }
        if let Some(pid) = args.target_pid() {
            eprintln!("pid: {pid}");
        }
        if let Some(ref export_path) = args.export {
            eprintln!("export: {}", export_path.display());
        }
    }

    let trace_exporter = args.export.as_ref().map(|_| ChromeTraceExporter::new());

    // Launch the live view in a separate thread if not headless
    let (display_handle, record_tx) = if args.headless || quiet {
        (None, None)
    } else {
        let (record_tx, record_rx) = bounded(1000);
        let handle = std::thread::spawn(move || run_display(&record_rx));
        (Some(handle), Some(record_tx))
    };

    let mut processor = EventProcessor::new(
        args.headless,
        args.engine_config(),
        args.target_pid(),
        trace_exporter,
        record_tx,
    );

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let mut stats_timer = Instant::now();
    let mut line_number = 0;
    let mut malformed_lines = 0;
    let mut exit_reason = "interrupted";

    // Main record processing loop
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read trace input")? else {
                    exit_reason = "end of input";
                    break;
                };
                line_number += 1;
                match TraceRecord::parse_line(&line, line_number) {
                    Ok(Some(record)) => processor.process_record(&record),
                    Ok(None) => {}
                    Err(e) => {
                        malformed_lines += 1;
                        warn!("{e}");
                    }
                }
            }
            _ = &mut ctrl_c => {
                break;
            }
        }

        // Print statistics every 10 seconds in headless mode
        if args.headless && stats_timer.elapsed() > Duration::from_secs(10) {
            display_statistics(&processor.stats, &processor.correlation_stats());
            stats_timer = Instant::now();
        }
    }

    // Closing the channel ends the display thread
    processor.close_channel();
    if let Some(handle) = display_handle {
        if let Ok(shown) = handle.join() {
            info!("live view showed {shown} records");
        }
    }

    if !quiet || args.headless {
        eprintln!(
            "\n{}: {:.1}s, {} lines ({} malformed), {} dropped by the live view",
            exit_reason,
            started.elapsed().as_secs_f64(),
            line_number,
            malformed_lines,
            processor.channel_dropped
        );
        display_statistics(&processor.stats, &processor.correlation_stats());
    }

    if !quiet {
        for engine in processor.engines() {
            print_engine_summary(engine, args.top);
        }
    }

    // Export trace if enabled
    if let (Some(exporter), Some(export_path)) = (processor.take_exporter(), args.export.as_ref()) {
        exporter.export_to_file(export_path).context("Failed to export trace")?;

        if !quiet {
            eprintln!("saved: {} ({} events)", export_path.display(), exporter.event_count());
        }
    }

    Ok(())
}
