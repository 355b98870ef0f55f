use crate::{
    error::ExecutionError,
    gc::{RootProvider, RootSet},
    utils::FunctionId,
    value::{Address, Value},
};

/// Activation record of one function call.
#[derive(Clone, Debug)]
pub struct StackFrame {
    pub function: FunctionId,
    /// Where the caller resumes; `None` for the entry frame.
    pub return_address: Option<usize>,
    pub locals: Box<[Value]>,
    /// Evaluation stack height when the frame was entered.
    pub stack_base: usize,
}

impl StackFrame {
    pub fn new(function: FunctionId, return_address: Option<usize>, slots: usize, stack_base: usize) -> Self {
        Self {
            function,
            return_address,
            locals: vec![Value::Null; slots].into_boxed_slice(),
            stack_base,
        }
    }

    pub fn local(&self, slot: usize) -> Result<Value, ExecutionError> {
        self.locals
            .get(slot)
            .copied()
            .ok_or(ExecutionError::InvalidLocalSlot(slot))
    }

    pub fn set_local(&mut self, slot: usize, value: Value) -> Result<(), ExecutionError> {
        let local = self
            .locals
            .get_mut(slot)
            .ok_or(ExecutionError::InvalidLocalSlot(slot))?;
        *local = value;
        Ok(())
    }
}

/// The operand stack shared by every frame.
#[derive(Clone, Debug, Default)]
pub struct EvaluationStack {
    stack: Vec<Value>,
}

impl EvaluationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, ExecutionError> {
        self.stack.pop().ok_or(ExecutionError::StackUnderflow)
    }

    pub fn peek(&self) -> Result<Value, ExecutionError> {
        self.stack.last().copied().ok_or(ExecutionError::StackUnderflow)
    }

    /// Removes the top `n` values, bottom-most first.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, ExecutionError> {
        if self.stack.len() < n {
            return Err(ExecutionError::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> + '_ {
        self.stack.iter()
    }
}

#[derive(Clone, Debug, Default)]
pub struct FrameStack {
    frames: Vec<StackFrame>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<StackFrame> {
        self.frames.pop()
    }

    pub fn current(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut StackFrame> {
        self.frames.last_mut()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &StackFrame> + '_ {
        self.frames.iter()
    }
}

/// Everything the mutator holds references in.
#[derive(Clone, Debug, Default)]
pub struct ExecutionState {
    pub stack: EvaluationStack,
    pub frames: FrameStack,
    pub host_roots: RootSet,
}

impl ExecutionState {
    /// Drops stacks and frames; host-pinned roots survive.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
    }
}

impl RootProvider for ExecutionState {
    fn enumerate_roots(&self) -> Box<dyn Iterator<Item = Address> + '_> {
        let stack = self.stack.iter().filter_map(Value::as_address);
        let locals = self
            .frames
            .iter()
            .flat_map(|f| f.locals.iter())
            .filter_map(Value::as_address);
        Box::new(stack.chain(locals).chain(self.host_roots.enumerate_roots()))
    }
}
