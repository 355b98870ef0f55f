use std::env;

pub const DEFAULT_HEAP_CAPACITY: usize = 1024 * 1024;
pub const DEFAULT_MIN_LOCALS: usize = 64;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 10_000;

/// Runtime knobs for a [`crate::vm::VirtualMachine`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// Size of the heap arena in bytes.
    pub heap_capacity: usize,
    /// Lower bound on the number of local slots in every frame.
    pub min_locals: usize,
    pub max_call_depth: usize,
    /// Collect before every allocation.
    pub gc_stress: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            heap_capacity: DEFAULT_HEAP_CAPACITY,
            min_locals: DEFAULT_MIN_LOCALS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            gc_stress: false,
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl VmConfig {
    /// Defaults overridden by `SKIPPER_HEAP_SIZE`, `SKIPPER_MIN_LOCALS`,
    /// `SKIPPER_MAX_CALL_DEPTH` and `SKIPPER_GC_STRESS`. Unparseable values
    /// are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            heap_capacity: env_usize("SKIPPER_HEAP_SIZE").unwrap_or(defaults.heap_capacity),
            min_locals: env_usize("SKIPPER_MIN_LOCALS").unwrap_or(defaults.min_locals),
            max_call_depth: env_usize("SKIPPER_MAX_CALL_DEPTH").unwrap_or(defaults.max_call_depth),
            gc_stress: env_flag("SKIPPER_GC_STRESS").unwrap_or(defaults.gc_stress),
        }
    }

    pub fn with_heap_capacity(mut self, bytes: usize) -> Self {
        self.heap_capacity = bytes;
        self
    }

    pub fn with_gc_stress(mut self, enabled: bool) -> Self {
        self.gc_stress = enabled;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_min_locals(mut self, slots: usize) -> Self {
        self.min_locals = slots;
        self
    }
}
