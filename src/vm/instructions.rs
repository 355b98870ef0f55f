use super::{StackFrame, StepResult, VirtualMachine};
use crate::{
    error::{ExecutionError, VmError},
    program::{Constant, Instruction, OpCode},
    utils::FunctionId,
    value::{Value, ValueError},
};
use std::rc::Rc;
use tracing::debug;

pub(super) type StepOutcome = Result<StepResult, VmError>;

pub(super) fn operand(instruction: &Instruction, index: usize) -> Result<i64, ExecutionError> {
    instruction.operand(index).ok_or(ExecutionError::MissingOperand {
        opcode: instruction.op,
        index,
    })
}

pub(super) fn as_index(instruction: &Instruction, value: i64) -> Result<usize, ExecutionError> {
    usize::try_from(value).map_err(|_| ExecutionError::InvalidOperand {
        opcode: instruction.op,
        value,
    })
}

/// The first operand as an index or id.
pub(super) fn first_index(instruction: &Instruction) -> Result<usize, ExecutionError> {
    as_index(instruction, operand(instruction, 0)?)
}

/// The last operand as an index. Compilers may emit a leading owner id
/// (`LOAD func, slot`, `GET_FIELD class, field`), which is ignored.
pub(super) fn last_index(instruction: &Instruction) -> Result<usize, ExecutionError> {
    let value = instruction
        .last_operand()
        .ok_or(ExecutionError::MissingOperand {
            opcode: instruction.op,
            index: 0,
        })?;
    as_index(instruction, value)
}

fn unsupported(opcode: OpCode, operands: &[Value]) -> ExecutionError {
    ExecutionError::UnsupportedOperator {
        opcode,
        operands: operands.iter().map(Value::kind).collect(),
    }
}

fn value_error(opcode: OpCode, operands: &[Value], error: ValueError) -> ExecutionError {
    match error {
        ValueError::DivisionByZero => ExecutionError::DivisionByZero,
        ValueError::Unsupported => unsupported(opcode, operands),
    }
}

macro_rules! binary_op {
    ($func_name:ident, $method:ident) => {
        fn $func_name(&mut self, opcode: OpCode) -> StepOutcome {
            pop_args!(self, [rhs, lhs]);
            let result = lhs
                .$method(rhs)
                .map_err(|e| value_error(opcode, &[lhs, rhs], e))?;
            self.state.stack.push(result);
            Ok(StepResult::Continue)
        }
    };
}

macro_rules! ordering_op {
    ($func_name:ident, $test:ident) => {
        fn $func_name(&mut self, opcode: OpCode) -> StepOutcome {
            pop_args!(self, [rhs, lhs]);
            let ordering = lhs
                .compare(&rhs)
                .ok_or_else(|| unsupported(opcode, &[lhs, rhs]))?;
            self.state.stack.push(Value::Bool(ordering.$test()));
            Ok(StepResult::Continue)
        }
    };
}

macro_rules! logic_op {
    ($func_name:ident, $op:tt) => {
        fn $func_name(&mut self) -> StepOutcome {
            pop_args!(self, [rhs, lhs]);
            self.state
                .stack
                .push(Value::Bool(lhs.truthy() $op rhs.truthy()));
            Ok(StepResult::Continue)
        }
    };
}

impl VirtualMachine {
    pub(super) fn dispatch(&mut self, instruction: &Instruction) -> StepOutcome {
        let op = instruction.op;
        match op {
            OpCode::Push => self.push_constant(instruction),
            OpCode::Pop => {
                self.state.stack.pop()?;
                Ok(StepResult::Continue)
            }
            OpCode::Dup => {
                let top = self.state.stack.peek()?;
                self.state.stack.push(top);
                Ok(StepResult::Continue)
            }
            OpCode::Swap => {
                pop_args!(self, [top, below]);
                self.state.stack.push(top);
                self.state.stack.push(below);
                Ok(StepResult::Continue)
            }
            OpCode::Load => self.load_local(instruction),
            OpCode::Store => self.store_local(instruction),

            OpCode::Add => self.add(op),
            OpCode::Sub => self.subtract(op),
            OpCode::Mul => self.multiply(op),
            OpCode::Div => self.divide(op),
            OpCode::Mod => self.remainder(op),
            OpCode::Neg => {
                pop_args!(self, [value]);
                let result = value.neg().map_err(|e| value_error(op, &[value], e))?;
                self.state.stack.push(result);
                Ok(StepResult::Continue)
            }

            OpCode::CmpEq | OpCode::CmpNe => {
                pop_args!(self, [rhs, lhs]);
                let equal = lhs.equals(&rhs);
                self.state.stack.push(Value::Bool(equal == (op == OpCode::CmpEq)));
                Ok(StepResult::Continue)
            }
            OpCode::CmpLt => self.less_than(op),
            OpCode::CmpGt => self.greater_than(op),
            OpCode::CmpLe => self.less_equal(op),
            OpCode::CmpGe => self.greater_equal(op),

            OpCode::And => self.and(),
            OpCode::Or => self.or(),
            OpCode::Not => {
                pop_args!(self, [value]);
                self.state.stack.push(Value::Bool(!value.truthy()));
                Ok(StepResult::Continue)
            }

            OpCode::Jump => {
                let target = first_index(instruction)?;
                vm_trace_branch!(self, op, target, true);
                Ok(StepResult::Jump(target))
            }
            OpCode::JumpIfTrue | OpCode::JumpIfFalse => {
                let target = first_index(instruction)?;
                pop_args!(self, [condition]);
                let taken = condition.truthy() == (op == OpCode::JumpIfTrue);
                vm_trace_branch!(self, op, target, taken);
                if taken {
                    Ok(StepResult::Jump(target))
                } else {
                    Ok(StepResult::Continue)
                }
            }
            OpCode::Call => self.call(instruction),
            OpCode::Return => {
                self.return_from_frame();
                Ok(StepResult::Return)
            }

            OpCode::NewObject => self.new_object(instruction),
            OpCode::GetField => self.get_field(instruction),
            OpCode::SetField => self.set_field(instruction),
            OpCode::NewArray => self.new_array(instruction),
            OpCode::GetElement => self.get_element(),
            OpCode::SetElement => self.set_element(),
            OpCode::ArrayLength => self.array_length(),
            OpCode::Print => self.print(),
        }
    }

    binary_op!(add, add);
    binary_op!(subtract, sub);
    binary_op!(multiply, mul);
    binary_op!(divide, div);
    binary_op!(remainder, rem);

    ordering_op!(less_than, is_lt);
    ordering_op!(greater_than, is_gt);
    ordering_op!(less_equal, is_le);
    ordering_op!(greater_equal, is_ge);

    logic_op!(and, &&);
    logic_op!(or, ||);

    fn push_constant(&mut self, instruction: &Instruction) -> StepOutcome {
        let index = first_index(instruction)?;
        let constant = self
            .program
            .constant(index)
            .cloned()
            .ok_or(ExecutionError::InvalidConstant(index))?;
        let value = match constant {
            Constant::Null => Value::Null,
            Constant::Int(i) => Value::Int(i),
            Constant::Double(d) => Value::Double(d),
            Constant::Bool(b) => Value::Bool(b),
            Constant::Char(c) => Value::Char(c),
            Constant::String(s) => self.allocate_string(&s)?,
            Constant::Type(_) => return Err(ExecutionError::InvalidConstant(index).into()),
        };
        self.state.stack.push(value);
        Ok(StepResult::Continue)
    }

    fn current_frame_mut(&mut self) -> Result<&mut StackFrame, ExecutionError> {
        self.state
            .frames
            .current_mut()
            .ok_or(ExecutionError::StackUnderflow)
    }

    fn load_local(&mut self, instruction: &Instruction) -> StepOutcome {
        let slot = last_index(instruction)?;
        let value = self.current_frame_mut()?.local(slot)?;
        self.state.stack.push(value);
        Ok(StepResult::Continue)
    }

    fn store_local(&mut self, instruction: &Instruction) -> StepOutcome {
        let slot = last_index(instruction)?;
        pop_args!(self, [value]);
        self.current_frame_mut()?.set_local(slot, value)?;
        Ok(StepResult::Continue)
    }

    fn call(&mut self, instruction: &Instruction) -> StepOutcome {
        let id = FunctionId(first_index(instruction)?);
        let program = Rc::clone(&self.program);
        let callee = program
            .function(id)
            .ok_or(ExecutionError::FunctionIdNotFound(id.as_usize()))?;

        if self.state.frames.len() >= self.config.max_call_depth {
            return Err(ExecutionError::StackOverflow(self.config.max_call_depth).into());
        }

        let args = self.state.stack.pop_n(callee.arity())?;
        let slots = self.frame_slots(callee.slot_count());
        let mut frame = StackFrame::new(id, Some(self.ip + 1), slots, self.state.stack.len());
        frame.locals[..args.len()].copy_from_slice(&args);

        self.state.frames.push(frame);
        self.ip = 0;

        let depth = self.state.frames.len();
        self.metrics.record_call(depth);
        vm_trace_call!(self, &callee.name, args.len());
        debug!(function = %callee.name, depth, "frame pushed");
        Ok(StepResult::FramePushed)
    }

    /// Pops the current frame and resumes the caller. The return value, if
    /// any, stays on the shared evaluation stack.
    pub(super) fn return_from_frame(&mut self) {
        let Some(frame) = self.state.frames.pop() else {
            return;
        };
        let name = self
            .program
            .function(frame.function)
            .map_or("?", |f| f.name.as_str());
        vm_trace_return!(self, name);
        debug!(function = name, depth = self.state.frames.len(), "frame popped");

        if let Some(address) = frame.return_address {
            self.ip = address;
        }
    }
}
