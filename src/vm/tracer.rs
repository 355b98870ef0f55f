//! Buffered execution tracer for the skipper VM.
//!
//! Tracing is off unless `SKIPPER_TRACE` is set, and every call site goes
//! through the `vm_*` macros, which check [`Tracer::is_enabled`] before any
//! formatting happens.
//!
//! ## Environment Variables
//!
//! - `SKIPPER_TRACE`: Enable tracing
//!   - `"1"`, `"true"`, or `"stdout"`: Write to stdout
//!   - `"stderr"`: Write to stderr
//!   - `<path>`: Write to file at path
//! - `SKIPPER_TRACE_LEVEL`: `error`, `info`, `debug`, `trace` or `instruction` (default)
//! - `SKIPPER_TRACE_FORMAT`: `text` (default) or `json`, one object per line
//! - `SKIPPER_TRACE_FLUSH_INTERVAL`: Number of messages before auto-flush (default: 10000)
//! - `SKIPPER_TRACE_STATS`: Print event counts when the tracer is dropped
//!
//! ```bash
//! SKIPPER_TRACE=/tmp/trace.log SKIPPER_TRACE_LEVEL=trace skipper fact.json
//! ```
use serde::Serialize;
use std::{
    cell::{Cell, RefCell},
    env,
    fmt::Arguments,
    fs::File,
    io::{stderr, stdout, BufWriter, Write},
};

const BUFFER_SIZE: usize = 64 * 1024;
const AUTO_FLUSH_INTERVAL: usize = 10_000;

/// Trace level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
    Trace = 3,
    Instruction = 4,
}

impl TraceLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            "instruction" => Some(Self::Instruction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct TraceStats {
    pub total_messages: usize,
    pub instructions_traced: usize,
    pub calls: usize,
    pub returns: usize,
    pub branches: usize,
    pub gc_events: usize,
    pub allocations: usize,
    pub faults: usize,
}

pub struct Tracer {
    writer: RefCell<Option<BufWriter<Box<dyn Write>>>>,
    format: TraceFormat,
    min_level: TraceLevel,
    message_count: Cell<usize>,
    auto_flush_interval: usize,
    stats: RefCell<TraceStats>,
    detailed_stats: bool,
}

impl Tracer {
    /// Configures the tracer from the `SKIPPER_TRACE*` environment variables.
    pub fn from_env() -> Self {
        let writer: Option<Box<dyn Write>> = match env::var("SKIPPER_TRACE") {
            Ok(val) if val == "1" || val == "true" || val == "stdout" => Some(Box::new(stdout())),
            Ok(val) if val == "stderr" => Some(Box::new(stderr())),
            Ok(val) if !val.is_empty() && val != "0" && val != "false" => match File::create(&val) {
                Ok(f) => Some(Box::new(f)),
                Err(e) => {
                    eprintln!("Failed to create trace file {}: {}", val, e);
                    None
                }
            },
            _ => None,
        };

        let format = match env::var("SKIPPER_TRACE_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => TraceFormat::Json,
            _ => TraceFormat::Text,
        };

        let min_level = env::var("SKIPPER_TRACE_LEVEL")
            .ok()
            .and_then(|v| TraceLevel::parse(&v))
            .unwrap_or(TraceLevel::Instruction);

        let auto_flush_interval = env::var("SKIPPER_TRACE_FLUSH_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(AUTO_FLUSH_INTERVAL);

        let detailed_stats = env::var("SKIPPER_TRACE_STATS")
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);

        let mut tracer = match writer {
            Some(w) => Self::to_writer(w, min_level, format),
            None => Self::disabled(),
        };
        tracer.auto_flush_interval = auto_flush_interval.max(1);
        tracer.detailed_stats = detailed_stats;
        tracer
    }

    pub fn disabled() -> Self {
        Self {
            writer: RefCell::new(None),
            format: TraceFormat::Text,
            min_level: TraceLevel::Error,
            message_count: Cell::new(0),
            auto_flush_interval: AUTO_FLUSH_INTERVAL,
            stats: RefCell::new(TraceStats::default()),
            detailed_stats: false,
        }
    }

    /// A tracer writing to `writer`, for embedders and tests.
    pub fn to_writer(writer: Box<dyn Write>, min_level: TraceLevel, format: TraceFormat) -> Self {
        Self {
            writer: RefCell::new(Some(BufWriter::with_capacity(BUFFER_SIZE, writer))),
            format,
            min_level,
            message_count: Cell::new(0),
            auto_flush_interval: AUTO_FLUSH_INTERVAL,
            stats: RefCell::new(TraceStats::default()),
            detailed_stats: false,
        }
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.writer.borrow().is_some()
    }

    fn write_msg(&self, level: TraceLevel, indent: usize, args: Arguments) {
        if level > self.min_level {
            return;
        }
        let mut guard = self.writer.borrow_mut();
        let Some(writer) = guard.as_mut() else {
            return;
        };

        match self.format {
            TraceFormat::Text => {
                for _ in 0..indent {
                    let _ = writer.write_all(b"  ");
                }
                let _ = writer.write_fmt(args);
                let _ = writer.write_all(b"\n");
            }
            TraceFormat::Json => {
                let line = serde_json::json!({
                    "level": level,
                    "indent": indent,
                    "message": args.to_string(),
                });
                if serde_json::to_writer(&mut *writer, &line).is_ok() {
                    let _ = writer.write_all(b"\n");
                }
            }
        }

        let count = self.message_count.get() + 1;
        self.message_count.set(count);
        if count >= self.auto_flush_interval {
            let _ = writer.flush();
            self.message_count.set(0);
        }
        if self.detailed_stats {
            self.stats.borrow_mut().total_messages += 1;
        }
    }

    fn count(&self, update: impl FnOnce(&mut TraceStats)) {
        if self.detailed_stats {
            update(&mut self.stats.borrow_mut());
        }
    }

    pub fn msg(&self, level: TraceLevel, indent: usize, args: Arguments) {
        self.write_msg(level, indent, args);
    }

    pub fn flush(&self) {
        if let Some(writer) = self.writer.borrow_mut().as_mut() {
            let _ = writer.flush();
        }
        self.message_count.set(0);
    }

    pub fn trace_instruction(&self, indent: usize, ip: usize, instruction: &str) {
        self.count(|s| s.instructions_traced += 1);
        self.write_msg(
            TraceLevel::Instruction,
            indent,
            format_args!("[IP:{:04}] {}", ip, instruction),
        );
    }

    pub fn trace_call(&self, indent: usize, name: &str, args: usize) {
        self.count(|s| s.calls += 1);
        self.write_msg(
            TraceLevel::Trace,
            indent,
            format_args!("→ CALL {} ({} args)", name, args),
        );
    }

    pub fn trace_return(&self, indent: usize, name: &str) {
        self.count(|s| s.returns += 1);
        self.write_msg(TraceLevel::Trace, indent, format_args!("← RET  {}", name));
    }

    pub fn trace_branch(&self, indent: usize, op: &str, target: usize, taken: bool) {
        self.count(|s| s.branches += 1);
        let status = if taken { "TAKEN" } else { "NOT TAKEN" };
        self.write_msg(
            TraceLevel::Instruction,
            indent,
            format_args!("↷ {} to {:04} ({})", op, target, status),
        );
    }

    pub fn trace_allocation(&self, indent: usize, kind: &str, address: u64, size: usize) {
        self.count(|s| s.allocations += 1);
        self.write_msg(
            TraceLevel::Debug,
            indent,
            format_args!("+ NEW  {} at {:#X} ({} bytes)", kind, address, size),
        );
    }

    pub fn trace_gc_event(&self, indent: usize, event: &str, details: &str) {
        self.count(|s| s.gc_events += 1);
        self.write_msg(
            TraceLevel::Debug,
            indent,
            format_args!("♻ GC   {} ({})", event, details),
        );
    }

    pub fn trace_fault(&self, indent: usize, fault: &str, location: &str) {
        self.count(|s| s.faults += 1);
        self.write_msg(
            TraceLevel::Error,
            indent,
            format_args!("⚠ FAULT {} at {}", fault, location),
        );
    }

    /// Writes the evaluation stack, top last, with a marker at each frame's
    /// stack height.
    pub fn dump_stack_state(&self, stack_contents: &[String], frame_markers: &[(usize, String)]) {
        self.msg(TraceLevel::Debug, 0, format_args!("╔═ STACK SNAPSHOT"));
        if stack_contents.is_empty() {
            self.msg(TraceLevel::Debug, 0, format_args!("║ (empty stack)"));
        }
        for (idx, content) in stack_contents.iter().enumerate().rev() {
            for (_, label) in frame_markers.iter().filter(|(pos, _)| *pos == idx) {
                self.msg(TraceLevel::Debug, 0, format_args!("╟─ {}", label));
            }
            self.msg(TraceLevel::Debug, 0, format_args!("║ [{:4}] {}", idx, content));
        }
        self.msg(TraceLevel::Debug, 0, format_args!("╚═"));
    }

    pub fn dump_heap_snapshot_start(&self, object_count: usize, live_bytes: usize) {
        self.msg(
            TraceLevel::Debug,
            0,
            format_args!("╔═ HEAP SNAPSHOT ({} objects, {} bytes)", object_count, live_bytes),
        );
    }

    pub fn dump_heap_object(&self, address: u64, kind: &str, details: &str) {
        self.msg(
            TraceLevel::Debug,
            0,
            format_args!("║ HEAP[{:#X}] {} => {}", address, kind, details),
        );
    }

    pub fn dump_heap_snapshot_end(&self) {
        self.msg(TraceLevel::Debug, 0, format_args!("╚═"));
    }

    pub fn get_stats(&self) -> TraceStats {
        self.stats.borrow().clone()
    }

    pub fn print_stats(&self) {
        if !self.detailed_stats {
            return;
        }
        let stats = self.stats.borrow();
        eprintln!("\n=== Tracer Statistics ===");
        eprintln!("Total messages:      {:>12}", stats.total_messages);
        eprintln!("Instructions traced: {:>12}", stats.instructions_traced);
        eprintln!("Calls:               {:>12}", stats.calls);
        eprintln!("Returns:             {:>12}", stats.returns);
        eprintln!("Branches:            {:>12}", stats.branches);
        eprintln!("GC events:           {:>12}", stats.gc_events);
        eprintln!("Allocations:         {:>12}", stats.allocations);
        eprintln!("Faults:              {:>12}", stats.faults);
        eprintln!("========================\n");
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        if self.detailed_stats && self.is_enabled() {
            self.print_stats();
        }
        self.flush();
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    #[test]
    fn level_filter_drops_verbose_messages() {
        let out = Capture::default();
        let tracer = Tracer::to_writer(Box::new(out.clone()), TraceLevel::Trace, TraceFormat::Text);
        tracer.trace_instruction(0, 3, "ADD");
        tracer.trace_call(1, "fact", 1);
        tracer.flush();
        assert_eq!(out.text(), "  → CALL fact (1 args)\n");
    }

    #[test]
    fn json_lines() {
        let out = Capture::default();
        let tracer = Tracer::to_writer(Box::new(out.clone()), TraceLevel::Instruction, TraceFormat::Json);
        tracer.trace_fault(0, "Division by zero", "main@4");
        tracer.flush();
        let line: serde_json::Value = serde_json::from_str(out.text().trim()).unwrap();
        assert_eq!(line["level"], "error");
        assert_eq!(line["message"], "⚠ FAULT Division by zero at main@4");
    }

    #[test]
    fn disabled_tracer_writes_nothing() {
        let tracer = Tracer::disabled();
        assert!(!tracer.is_enabled());
        tracer.trace_instruction(0, 0, "PUSH 0");
        assert_eq!(tracer.get_stats().instructions_traced, 0);
    }
}
