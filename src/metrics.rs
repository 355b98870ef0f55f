use crate::gc::CollectionReport;
use serde::Serialize;

/// Counters collected while a VM runs.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RuntimeMetrics {
    pub instructions_executed: u64,
    pub calls: u64,
    /// Deepest frame stack seen
    pub max_call_depth: usize,
    pub allocations: u64,
    pub bytes_allocated: u64,
    pub gc_collections: u64,
    pub gc_objects_freed: u64,
    pub gc_bytes_freed: u64,
    /// Total time spent in collections (in microseconds)
    pub gc_pause_total_us: u64,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&mut self, depth: usize) {
        self.calls += 1;
        self.max_call_depth = self.max_call_depth.max(depth);
    }

    pub fn record_allocation(&mut self, bytes: usize) {
        self.allocations += 1;
        self.bytes_allocated += bytes as u64;
    }

    pub fn record_collection(&mut self, report: &CollectionReport) {
        self.gc_collections += 1;
        self.gc_objects_freed += report.freed_objects as u64;
        self.gc_bytes_freed += report.freed_bytes as u64;
        self.gc_pause_total_us += report.duration.as_micros() as u64;
    }
}
