use crate::{program::OpCode, value::ValueKind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("Program loading failed: {0}")]
    Program(#[from] ProgramError),

    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Memory access violation: {0}")]
    Memory(#[from] MemoryError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProgramError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<std::io::Error> for ProgramError {
    fn from(e: std::io::Error) -> Self {
        ProgramError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ProgramError {
    fn from(e: serde_json::Error) -> Self {
        ProgramError::InvalidFormat(e.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Division by zero")]
    DivisionByZero,

    #[error("Null reference")]
    NullReference,

    #[error("Index {index} out of range for array of length {length}")]
    IndexOutOfRange { index: i64, length: i64 },

    #[error("Out of memory: could not allocate {requested} bytes after collection")]
    OutOfMemory { requested: usize },

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Function id not found: {0}")]
    FunctionIdNotFound(usize),

    #[error("Class id not found: {0}")]
    ClassNotFound(usize),

    #[error("Invalid assignment target: {0}")]
    InvalidAssignmentTarget(String),

    #[error("Unsupported operator {opcode} for operands {operands:?}")]
    UnsupportedOperator {
        opcode: OpCode,
        operands: Vec<ValueKind>,
    },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Stack overflow: call depth exceeded {0}")]
    StackOverflow(usize),

    #[error("Invalid local slot: {0}")]
    InvalidLocalSlot(usize),

    #[error("Invalid constant index: {0}")]
    InvalidConstant(usize),

    #[error("Invalid field index: {0}")]
    InvalidField(usize),

    #[error("{opcode} is missing operand {index}")]
    MissingOperand { opcode: OpCode, index: usize },

    #[error("{opcode} has invalid operand {value}")]
    InvalidOperand { opcode: OpCode, value: i64 },

    #[error("Array length cannot be negative: {0}")]
    NegativeArrayLength(i64),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MemoryError {
    #[error("Access violation at {address:#x}+{offset}")]
    AccessViolation { address: u64, offset: usize },
    #[error("Out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
}

pub type VmResult<T> = Result<T, VmError>;
