//! CLI result rendering.
//!
//! `human` prints one line per file and a summary, `json` prints the whole
//! report once, `jsonl` streams progress events and ends with the report.

use crate::batch::{BatchProgress, BatchResult, FileResult, FileStatus};
use crate::config::ConfigSource;
use crate::discovery::DroppedInput;
use crate::exit_codes::ExitCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::ops::ControlFlow;

/// Version of the JSON report layout.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Output format for command payloads on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
    Jsonl,
}

impl OutputFormat {
    pub fn is_machine(self) -> bool {
        !matches!(self, OutputFormat::Human)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Human => write!(f, "human"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Jsonl => write!(f, "jsonl"),
        }
    }
}

/// Machine-readable envelope around a batch result.
#[derive(Debug, Serialize)]
pub struct BatchReport<'a> {
    pub schema_version: u32,
    pub run_id: &'a str,
    pub generated_at: DateTime<Utc>,
    pub exit_code: i32,
    pub exit_code_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<&'a ConfigSource>,
    #[serde(skip_serializing_if = "no_dropped")]
    pub dropped_inputs: &'a [DroppedInput],
    pub result: &'a BatchResult,
}

fn no_dropped(dropped: &&[DroppedInput]) -> bool {
    dropped.is_empty()
}

impl<'a> BatchReport<'a> {
    pub fn new(
        run_id: &'a str,
        result: &'a BatchResult,
        dropped_inputs: &'a [DroppedInput],
        config: Option<&'a ConfigSource>,
    ) -> Self {
        let code = ExitCode::from(result);
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            run_id,
            generated_at: Utc::now(),
            exit_code: code.as_i32(),
            exit_code_name: code.code_name(),
            config,
            dropped_inputs,
            result,
        }
    }
}

/// `1536` -> `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// One status line for a finished file.
pub fn format_file_line(result: &FileResult) -> String {
    let name = result.display_name();
    match result.status {
        FileStatus::Success => {
            let mut line = format!("  ok      {name}");
            if let Some(output) = &result.output_path {
                line.push_str(&format!(" -> {}", output.display()));
            }
            if let Some(bytes) = result.output_bytes {
                line.push_str(&format!(" ({}, {} ms)", format_bytes(bytes), result.elapsed_ms));
            }
            if !result.message.is_empty() {
                line.push_str(&format!(" [{}]", result.message));
            }
            line
        }
        FileStatus::Skipped => format!("  skipped {name}: {}", result.message),
        FileStatus::Failed => format!("  FAILED  {name}: {}", result.message),
    }
}

/// Summary block printed after the per-file lines.
pub fn format_summary(result: &BatchResult) -> String {
    let verb = if result.dry_run { "would write" } else { "wrote" };
    let mut out = format!(
        "{}: {} succeeded, {} skipped, {} failed of {} in {} ms ({verb} {})",
        result.operation,
        result.succeeded,
        result.skipped,
        result.failed,
        result.total(),
        result.elapsed_ms,
        format_bytes(result.total_output_bytes),
    );
    if result.cancelled {
        out.push_str(&format!(
            "\ncancelled: {} file(s) not started",
            result.cancelled_count
        ));
    }
    out
}

/// Human progress hook: announces each file and prints its status line.
pub struct ConsoleProgress<W: Write> {
    out: W,
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> BatchProgress for ConsoleProgress<W> {
    fn file_started(&mut self, name: &str, index: usize, total: usize) {
        let _ = writeln!(self.out, "[{index}/{total}] {name}");
    }

    fn file_finished(&mut self, _index: usize, _total: usize, result: &FileResult) -> ControlFlow<()> {
        let _ = writeln!(self.out, "{}", format_file_line(result));
        let _ = self.out.flush();
        ControlFlow::Continue(())
    }
}
