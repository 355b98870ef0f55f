use crate::{
    config::VmConfig,
    error::{ExecutionError, VmError, VmResult},
    gc::{CollectionReport, GarbageCollector, GcStats, MarkSweep, RootProvider, RootSet},
    memory::Heap,
    metrics::RuntimeMetrics,
    program::{BytecodeProgram, OpCode},
    utils::{ClassId, FunctionId},
    value::{Address, HasReferences, ObjectDescriptor, SlotKind, Value},
};
use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    io::{self, Write},
    rc::Rc,
};
use tracing::debug;

#[macro_use]
mod macros;
mod instructions;
mod objects;
pub mod stack;
pub mod tracer;

pub use stack::{EvaluationStack, ExecutionState, FrameStack, StackFrame};
pub use tracer::{TraceFormat, TraceLevel, Tracer};

/// What the main loop does after an instruction completes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepResult {
    Continue,    // Advance IP
    Jump(usize), // Set IP to X
    FramePushed, // IP already points into the callee
    Return,      // Frame popped, IP restored
}

/// Where the most recent fault happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultLocation {
    pub function: String,
    pub ip: usize,
    pub opcode: Option<OpCode>,
}

impl Display for FaultLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.function, self.ip)?;
        if let Some(op) = self.opcode {
            write!(f, " ({})", op)?;
        }
        Ok(())
    }
}

/// Descriptors are shared by every object of the same shape.
#[derive(Default)]
struct DescriptorCache {
    classes: HashMap<ClassId, Rc<ObjectDescriptor>>,
    arrays: HashMap<Option<SlotKind>, Rc<ObjectDescriptor>>,
}

pub struct VirtualMachine {
    program: Rc<BytecodeProgram>,
    config: VmConfig,
    state: ExecutionState,
    heap: Heap,
    collector: Box<dyn GarbageCollector>,
    descriptors: DescriptorCache,
    ip: usize,
    tracer: Tracer,
    metrics: RuntimeMetrics,
    output: Box<dyn Write>,
    last_fault: Option<FaultLocation>,
}

impl VirtualMachine {
    pub fn new(program: impl Into<Rc<BytecodeProgram>>) -> Self {
        Self::with_config(program, VmConfig::default())
    }

    pub fn with_config(program: impl Into<Rc<BytecodeProgram>>, config: VmConfig) -> Self {
        Self {
            program: program.into(),
            heap: Heap::new(config.heap_capacity),
            config,
            state: ExecutionState::default(),
            collector: Box::new(MarkSweep::new()),
            descriptors: DescriptorCache::default(),
            ip: 0,
            tracer: Tracer::from_env(),
            metrics: RuntimeMetrics::new(),
            output: Box::new(io::stdout()),
            last_fault: None,
        }
    }

    pub fn program(&self) -> &BytecodeProgram {
        &self.program
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }

    pub fn gc_stats(&self) -> &GcStats {
        self.collector.stats()
    }

    pub fn last_fault(&self) -> Option<&FaultLocation> {
        self.last_fault.as_ref()
    }

    /// Roots the embedder keeps alive across runs and collections.
    pub fn host_roots_mut(&mut self) -> &mut RootSet {
        &mut self.state.host_roots
    }

    /// Redirects PRINT output.
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    pub fn set_tracer(&mut self, tracer: Tracer) {
        self.tracer = tracer;
    }

    pub fn set_collector(&mut self, collector: Box<dyn GarbageCollector>) {
        self.collector = collector;
    }

    #[inline(always)]
    pub fn tracer_enabled(&self) -> bool {
        self.tracer.is_enabled()
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn indent(&self) -> usize {
        self.state.frames.len().saturating_sub(1)
    }

    pub fn run(&mut self, entry: &str) -> VmResult<Value> {
        self.run_with_args(entry, &[])
    }

    /// Runs `entry` with `args` bound to its first local slots.
    pub fn run_with_args(&mut self, entry: &str, args: &[Value]) -> VmResult<Value> {
        let function = self
            .program
            .function_by_name(entry)
            .ok_or_else(|| ExecutionError::FunctionNotFound(entry.to_string()))?;
        let id = function.id;
        let slots = self.frame_slots(function.slot_count()).max(args.len());

        self.state.reset();
        self.last_fault = None;

        let mut frame = StackFrame::new(id, None, slots, 0);
        frame.locals[..args.len()].copy_from_slice(args);
        self.state.frames.push(frame);
        self.ip = 0;
        self.metrics.record_call(1);
        vm_trace_call!(self, entry, args.len());
        debug!(entry, args = args.len(), "run started");

        while !self.state.frames.is_empty() {
            if let Err(e) = self.step() {
                return Err(self.fault(e));
            }
        }

        let result = self.state.stack.pop().unwrap_or(Value::Null);
        self.state.stack.clear();
        vm_info!(self, "{} returned {}", entry, result);
        self.tracer.flush();
        Ok(result)
    }

    fn frame_slots(&self, declared: usize) -> usize {
        declared.max(self.config.min_locals)
    }

    fn step(&mut self) -> VmResult<()> {
        let program = Rc::clone(&self.program);
        let id = self.current_function()?;
        let function = program
            .function(id)
            .ok_or(ExecutionError::FunctionIdNotFound(id.as_usize()))?;

        let Some(instruction) = function.code.get(self.ip) else {
            // running off the end is an implicit RETURN
            self.return_from_frame();
            return Ok(());
        };

        vm_trace_instruction!(self, self.ip, instruction);
        self.metrics.instructions_executed += 1;

        match self.dispatch(instruction)? {
            StepResult::Continue => self.ip += 1,
            StepResult::Jump(target) => self.ip = target,
            StepResult::FramePushed | StepResult::Return => {}
        }
        Ok(())
    }

    fn current_function(&self) -> Result<FunctionId, ExecutionError> {
        self.state
            .frames
            .current()
            .map(|f| f.function)
            .ok_or(ExecutionError::StackUnderflow)
    }

    fn fault(&mut self, error: VmError) -> VmError {
        let function = self
            .state
            .frames
            .current()
            .and_then(|frame| self.program.function(frame.function));
        let location = FaultLocation {
            function: function.map(|f| f.name.clone()).unwrap_or_default(),
            ip: self.ip,
            opcode: function.and_then(|f| f.code.get(self.ip)).map(|i| i.op),
        };

        vm_trace_fault!(self, error, location);
        vm_trace_stack_snapshot!(self);
        debug!(%location, %error, "execution faulted");
        self.tracer.flush();
        self.last_fault = Some(location);
        error
    }

    /// Runs a collection with the VM's stacks, frames and host roots as roots.
    pub fn collect(&mut self) -> CollectionReport {
        vm_trace_gc!(
            self,
            "collection start",
            "{} objects, {} bytes live",
            self.heap.object_count(),
            self.heap.live_bytes()
        );
        let report = self.collector.collect(&mut self.heap, &self.state);
        self.metrics.record_collection(&report);
        vm_trace_gc!(
            self,
            "collection end",
            "marked {}, freed {} objects / {} bytes in {:?}",
            report.marked,
            report.freed_objects,
            report.freed_bytes,
            report.duration
        );
        vm_trace_heap_snapshot!(self);
        report
    }

    fn trace_dump_stack(&self) {
        let contents: Vec<String> = self.state.stack.iter().map(Value::to_string).collect();
        let markers: Vec<(usize, String)> = self
            .state
            .frames
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let name = self.program.function(f.function).map_or("?", |f| f.name.as_str());
                (f.stack_base, format!("FRAME #{} {}", i, name))
            })
            .collect();
        self.tracer.dump_stack_state(&contents, &markers);
    }

    fn trace_dump_heap(&self) {
        self.tracer
            .dump_heap_snapshot_start(self.heap.object_count(), self.heap.live_bytes());
        for record in self.heap.objects() {
            let header = self.heap.header(record.address).unwrap_or(0);
            let kind = format!("{:?}", record.descriptor.kind());
            self.tracer.dump_heap_object(
                record.address.as_u64(),
                &kind,
                &format!("{} bytes, header {}", record.size, header),
            );
        }
        self.tracer.dump_heap_snapshot_end();
    }
}

impl RootProvider for VirtualMachine {
    fn enumerate_roots(&self) -> Box<dyn Iterator<Item = Address> + '_> {
        self.state.enumerate_roots()
    }
}
