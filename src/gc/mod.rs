//! Mark-sweep garbage collection.
//!
//! Collection is synchronous, single-threaded and non-moving. The mark phase
//! walks an explicit worklist, so arbitrarily long object chains never touch
//! the native stack. Only offsets declared by an object's descriptor are read
//! as references.
pub mod roots;

pub use roots::{RootProvider, RootSet};

use crate::{
    memory::Heap,
    value::{Address, HasReferences},
};
use serde::Serialize;
use std::{
    collections::HashSet,
    time::{Duration, Instant},
};
use tracing::debug;

/// Outcome of a single collection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub marked: usize,
    pub freed_objects: usize,
    pub freed_bytes: usize,
    pub duration: Duration,
}

/// Totals over every collection a collector has run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct GcStats {
    pub collections: u64,
    pub objects_freed: u64,
    pub bytes_freed: u64,
    pub total_pause_us: u64,
}

impl GcStats {
    fn record(&mut self, report: &CollectionReport) {
        self.collections += 1;
        self.objects_freed += report.freed_objects as u64;
        self.bytes_freed += report.freed_bytes as u64;
        self.total_pause_us += report.duration.as_micros() as u64;
    }
}

pub trait GarbageCollector {
    /// Frees every object in `heap` that is unreachable from `roots`.
    fn collect(&mut self, heap: &mut Heap, roots: &dyn RootProvider) -> CollectionReport;

    fn stats(&self) -> &GcStats;
}

#[derive(Debug, Default)]
pub struct MarkSweep {
    marks: HashSet<Address>,
    worklist: Vec<Address>,
    stats: GcStats,
}

impl MarkSweep {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark(&mut self, heap: &Heap, roots: &dyn RootProvider) {
        let marks = &mut self.marks;
        let worklist = &mut self.worklist;

        for root in roots.enumerate_roots() {
            if heap.find_object(root).is_some() && marks.insert(root) {
                worklist.push(root);
            }
        }

        while let Some(address) = worklist.pop() {
            let Some(record) = heap.find_object(address) else {
                continue;
            };
            let read = |offset: usize| heap.read_i64(address, offset).ok();
            record
                .descriptor
                .visit_reference_offsets(&read, record.size, &mut |offset| {
                    let Ok(raw) = heap.read_i64(address, offset) else {
                        return;
                    };
                    if raw == 0 {
                        return;
                    }
                    let child = Address(raw as u64);
                    if heap.find_object(child).is_some() && marks.insert(child) {
                        worklist.push(child);
                    }
                });
        }
    }

    fn sweep(&mut self, heap: &mut Heap) -> (usize, usize) {
        let dead: Vec<Address> = heap
            .objects()
            .filter(|r| !self.marks.contains(&r.address))
            .map(|r| r.address)
            .collect();

        let mut freed_bytes = 0;
        for &address in &dead {
            freed_bytes += heap.free(address).unwrap_or(0);
        }
        (dead.len(), freed_bytes)
    }
}

impl GarbageCollector for MarkSweep {
    fn collect(&mut self, heap: &mut Heap, roots: &dyn RootProvider) -> CollectionReport {
        let start = Instant::now();

        self.mark(heap, roots);
        let marked = self.marks.len();
        let (freed_objects, freed_bytes) = self.sweep(heap);
        self.marks.clear();

        let report = CollectionReport {
            marked,
            freed_objects,
            freed_bytes,
            duration: start.elapsed(),
        };
        self.stats.record(&report);
        debug!(
            marked,
            freed_objects,
            freed_bytes,
            live_bytes = heap.live_bytes(),
            "collection finished"
        );
        report
    }

    fn stats(&self) -> &GcStats {
        &self.stats
    }
}
