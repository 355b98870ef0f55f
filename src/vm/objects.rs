use super::{
    instructions::{first_index, last_index, StepOutcome},
    StepResult, VirtualMachine,
};
use crate::{
    error::{ExecutionError, MemoryError, VmError},
    program::{BytecodeType, Constant, Instruction},
    utils::{ClassId, WORD},
    value::{
        layout::HEADER_SIZE, Address, ArrayLayout, ClassLayout, HasReferences, ObjectDescriptor,
        SlotKind, Value,
    },
};
use std::{io::Write, rc::Rc};

fn receiver(value: Value) -> Result<Address, ExecutionError> {
    match value {
        Value::Null => Err(ExecutionError::NullReference),
        Value::ObjectRef(a) if a.is_null() => Err(ExecutionError::NullReference),
        Value::ObjectRef(a) => Ok(a),
        other => Err(ExecutionError::TypeMismatch {
            expected: "object".to_string(),
            actual: other.kind().to_string(),
        }),
    }
}

fn slot_offset(index: usize) -> usize {
    HEADER_SIZE + index * WORD
}

/// One element of a live array, resolved and bounds-checked.
struct ElementSlot {
    address: Address,
    element: Option<SlotKind>,
    length: usize,
    index: usize,
}

impl VirtualMachine {
    fn class_descriptor(&mut self, id: ClassId) -> Result<Rc<ObjectDescriptor>, ExecutionError> {
        if let Some(descriptor) = self.descriptors.classes.get(&id) {
            return Ok(Rc::clone(descriptor));
        }
        let class = self
            .program
            .class(id)
            .ok_or(ExecutionError::ClassNotFound(id.as_usize()))?;
        let descriptor = Rc::new(ObjectDescriptor::from(ClassLayout::for_fields(id, class.field_kinds())));
        self.descriptors.classes.insert(id, Rc::clone(&descriptor));
        Ok(descriptor)
    }

    fn array_descriptor(&mut self, element: Option<SlotKind>) -> Rc<ObjectDescriptor> {
        let descriptor = self.descriptors.arrays.entry(element).or_insert_with(|| {
            Rc::new(ObjectDescriptor::from(match element {
                Some(kind) => ArrayLayout::new(kind),
                None => ArrayLayout::untyped(),
            }))
        });
        Rc::clone(descriptor)
    }

    /// Allocates `size` bytes, collecting first when the heap looks full (or
    /// always, under `gc_stress`) and once more if the allocation still fails.
    pub(super) fn allocate(&mut self, descriptor: Rc<ObjectDescriptor>, size: usize) -> Result<Address, VmError> {
        let mut collected = false;
        if self.config.gc_stress || !self.heap.has_space(size) {
            self.collect();
            collected = true;
        }

        let address = match self.heap.allocate(Rc::clone(&descriptor), size) {
            Ok(address) => address,
            Err(_) => {
                if !collected {
                    self.collect();
                }
                self.heap
                    .allocate(Rc::clone(&descriptor), size)
                    .map_err(|_| ExecutionError::OutOfMemory { requested: size })?
            }
        };

        self.metrics.record_allocation(size);
        vm_trace_allocation!(self, &format!("{:?}", descriptor.kind()), address, size);
        Ok(address)
    }

    fn record_descriptor(&self, address: Address) -> Result<Rc<ObjectDescriptor>, MemoryError> {
        self.heap
            .find_object(address)
            .map(|r| Rc::clone(&r.descriptor))
            .ok_or(MemoryError::AccessViolation {
                address: address.as_u64(),
                offset: 0,
            })
    }

    fn field_kind(&self, address: Address, index: usize) -> Result<SlotKind, VmError> {
        let descriptor = self.record_descriptor(address)?;
        match descriptor.as_ref() {
            ObjectDescriptor::ClassLayout(layout) => {
                Ok(layout.field(index).ok_or(ExecutionError::InvalidField(index))?)
            }
            ObjectDescriptor::ArrayLayout(_) => Err(ExecutionError::TypeMismatch {
                expected: "object".to_string(),
                actual: "array".to_string(),
            }
            .into()),
        }
    }

    pub(super) fn new_object(&mut self, instruction: &Instruction) -> StepOutcome {
        let id = ClassId(first_index(instruction)?);
        let descriptor = self.class_descriptor(id)?;
        let size = descriptor
            .as_class()
            .map_or(HEADER_SIZE, ClassLayout::instance_size);
        let address = self.allocate(descriptor, size)?;
        self.heap.write_i64(address, 0, id.as_usize() as i64)?;
        self.state.stack.push(Value::ObjectRef(address));
        Ok(StepResult::Continue)
    }

    pub(super) fn get_field(&mut self, instruction: &Instruction) -> StepOutcome {
        let index = last_index(instruction)?;
        pop_args!(self, [target]);
        let address = receiver(target)?;
        let kind = self.field_kind(address, index)?;
        let raw = self.heap.read_i64(address, slot_offset(index))?;
        self.state.stack.push(kind.decode(raw));
        Ok(StepResult::Continue)
    }

    pub(super) fn set_field(&mut self, instruction: &Instruction) -> StepOutcome {
        let index = last_index(instruction)?;
        pop_args!(self, [value, target]);
        let address = receiver(target)?;
        if self.record_descriptor(address)?.as_array().is_some() {
            return Err(ExecutionError::InvalidAssignmentTarget(format!("field {} of an array", index)).into());
        }
        let kind = self.field_kind(address, index)?;
        let raw = kind.encode(value)?;
        self.heap.write_i64(address, slot_offset(index), raw)?;
        Ok(StepResult::Continue)
    }

    /// Element kind named by NEW_ARRAY's optional operand, a constant-pool
    /// index of a type. Without one the array is untyped.
    fn array_element(&self, instruction: &Instruction) -> Result<Option<SlotKind>, ExecutionError> {
        let Some(operand) = instruction.operand(0) else {
            return Ok(None);
        };
        let constant = usize::try_from(operand)
            .ok()
            .and_then(|index| self.program.constant(index));
        match constant {
            Some(Constant::Type(ty)) if *ty != BytecodeType::Void => Ok(Some(SlotKind::from(ty))),
            _ => Err(ExecutionError::InvalidOperand {
                opcode: instruction.op,
                value: operand,
            }),
        }
    }

    pub(super) fn new_array(&mut self, instruction: &Instruction) -> StepOutcome {
        let element = self.array_element(instruction)?;
        pop_args!(self, [length]);
        let length = length.as_int().ok_or_else(|| ExecutionError::TypeMismatch {
            expected: "int".to_string(),
            actual: length.kind().to_string(),
        })?;
        if length < 0 {
            return Err(ExecutionError::NegativeArrayLength(length).into());
        }

        let address = self.allocate_array(element, length as usize)?;
        self.state.stack.push(Value::ObjectRef(address));
        Ok(StepResult::Continue)
    }

    fn allocate_array(&mut self, element: Option<SlotKind>, length: usize) -> Result<Address, VmError> {
        let descriptor = self.array_descriptor(element);
        let size = descriptor
            .as_array()
            .and_then(|layout| layout.allocation_size(length))
            .ok_or(ExecutionError::OutOfMemory { requested: usize::MAX })?;
        let address = self.allocate(descriptor, size)?;
        self.heap.write_i64(address, 0, length as i64)?;
        Ok(address)
    }

    /// Materializes a string literal as a char array.
    pub(super) fn allocate_string(&mut self, text: &str) -> Result<Value, VmError> {
        let chars: Vec<char> = text.chars().collect();
        let address = self.allocate_array(Some(SlotKind::Char), chars.len())?;
        for (i, c) in chars.into_iter().enumerate() {
            self.heap
                .write_i64(address, slot_offset(i), SlotKind::Char.encode(Value::Char(c))?)?;
        }
        Ok(Value::ObjectRef(address))
    }

    fn element_slot(&self, array: Value, index: Value) -> Result<ElementSlot, VmError> {
        let address = receiver(array)?;
        let (element, length) = self.array_info(address)?;
        let index = index.as_int().ok_or_else(|| ExecutionError::TypeMismatch {
            expected: "int".to_string(),
            actual: index.kind().to_string(),
        })?;
        if index < 0 || index >= length {
            return Err(ExecutionError::IndexOutOfRange { index, length }.into());
        }
        Ok(ElementSlot {
            address,
            element,
            length: length as usize,
            index: index as usize,
        })
    }

    fn array_info(&self, address: Address) -> Result<(Option<SlotKind>, i64), VmError> {
        let descriptor = self.record_descriptor(address)?;
        let element = descriptor
            .as_array()
            .map(ArrayLayout::element)
            .ok_or_else(|| ExecutionError::TypeMismatch {
                expected: "array".to_string(),
                actual: "object".to_string(),
            })?;
        let length = self.heap.read_i64(address, 0)?;
        Ok((element, length))
    }

    fn load_element(&self, slot: &ElementSlot) -> Result<Value, VmError> {
        let kind = match slot.element {
            Some(kind) => kind,
            None => {
                let (offset, shift) = ArrayLayout::tag_position(slot.length, slot.index);
                let word = self.heap.read_i64(slot.address, offset)?;
                SlotKind::from_tag_word(word, shift).ok_or(MemoryError::AccessViolation {
                    address: slot.address.as_u64(),
                    offset,
                })?
            }
        };
        let raw = self.heap.read_i64(slot.address, slot_offset(slot.index))?;
        Ok(kind.decode(raw))
    }

    fn store_element(&mut self, slot: &ElementSlot, value: Value) -> Result<(), VmError> {
        let kind = slot.element.unwrap_or(SlotKind::of(value));
        let raw = kind.encode(value)?;
        if slot.element.is_none() {
            let (offset, shift) = ArrayLayout::tag_position(slot.length, slot.index);
            let word = self.heap.read_i64(slot.address, offset)?;
            self.heap
                .write_i64(slot.address, offset, kind.into_tag_word(word, shift))?;
        }
        self.heap.write_i64(slot.address, slot_offset(slot.index), raw)?;
        Ok(())
    }

    pub(super) fn get_element(&mut self) -> StepOutcome {
        pop_args!(self, [index, array]);
        let slot = self.element_slot(array, index)?;
        let value = self.load_element(&slot)?;
        self.state.stack.push(value);
        Ok(StepResult::Continue)
    }

    pub(super) fn set_element(&mut self) -> StepOutcome {
        pop_args!(self, [value, index, array]);
        let slot = self.element_slot(array, index)?;
        self.store_element(&slot, value)?;
        Ok(StepResult::Continue)
    }

    pub(super) fn array_length(&mut self) -> StepOutcome {
        pop_args!(self, [array]);
        let address = receiver(array)?;
        let (_, length) = self.array_info(address)?;
        self.state.stack.push(Value::Int(length));
        Ok(StepResult::Continue)
    }

    pub(super) fn print(&mut self) -> StepOutcome {
        pop_args!(self, [value]);
        let text = self.read_string(value).unwrap_or_else(|| value.to_string());
        // output errors are not program faults
        let _ = writeln!(self.output, "{}", text);
        Ok(StepResult::Continue)
    }

    /// The elements of a live array, decoded by their slot kinds.
    pub fn read_array(&self, value: Value) -> Option<Vec<Value>> {
        let address = value.as_address()?;
        let (element, length) = self.array_info(address).ok()?;
        let length = usize::try_from(length).ok()?;
        (0..length)
            .map(|index| {
                let slot = ElementSlot {
                    address,
                    element,
                    length,
                    index,
                };
                self.load_element(&slot).ok()
            })
            .collect()
    }

    /// The text of a char array.
    pub fn read_string(&self, value: Value) -> Option<String> {
        let address = value.as_address()?;
        let (element, _) = self.array_info(address).ok()?;
        if element != Some(SlotKind::Char) {
            return None;
        }
        self.read_array(value)?
            .into_iter()
            .map(|v| v.as_char())
            .collect()
    }

    /// Decodes field `index` of a live class instance.
    pub fn read_field(&self, value: Value, index: usize) -> Option<Value> {
        let address = value.as_address()?;
        let kind = self.field_kind(address, index).ok()?;
        let raw = self.heap.read_i64(address, slot_offset(index)).ok()?;
        Some(kind.decode(raw))
    }
}
