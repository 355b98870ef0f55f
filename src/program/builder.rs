use super::{BytecodeProgram, BytecodeType, Class, Constant, Field, Function};
use crate::utils::{ClassId, FunctionId};

/// Incremental construction of a [`BytecodeProgram`]. Registering a name
/// twice returns the id it already has.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: BytecodeProgram,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_function(&mut self, name: &str) -> FunctionId {
        if let Some(existing) = self.program.function_by_name(name) {
            return existing.id;
        }
        let id = FunctionId(self.program.functions.len());
        self.program.functions.push(Function::new(id, name));
        id
    }

    pub fn register_class(&mut self, name: &str) -> ClassId {
        if let Some(existing) = self.program.classes.iter().find(|c| c.name == name) {
            return existing.id;
        }
        let id = ClassId(self.program.classes.len());
        self.program.classes.push(Class::new(id, name));
        id
    }

    /// Adds a field to a registered class and returns its slot.
    pub fn add_field(&mut self, class: ClassId, name: &str, ty: BytecodeType) -> Option<usize> {
        let class = self.program.classes.iter_mut().find(|c| c.id == class)?;
        if let Some(field) = class.fields.get(name) {
            return Some(field.slot);
        }
        let slot = class.fields.len();
        class.fields.insert(name.to_string(), Field { slot, ty });
        Some(slot)
    }

    pub fn register_method(&mut self, class: ClassId, name: &str, function: FunctionId) -> Option<FunctionId> {
        let class = self.program.classes.iter_mut().find(|c| c.id == class)?;
        class.methods.insert(name.to_string(), function);
        Some(function)
    }

    /// Interns a literal and returns its pool index.
    pub fn add_constant(&mut self, constant: Constant) -> usize {
        if let Some(index) = self.program.constants.iter().position(|c| *c == constant) {
            return index;
        }
        self.program.constants.push(constant);
        self.program.constants.len() - 1
    }

    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut Function> {
        self.program.functions.iter_mut().find(|f| f.id == id)
    }

    pub fn set_entry(&mut self, id: FunctionId) {
        self.program.entry_function_id = id;
    }

    pub fn build(self) -> BytecodeProgram {
        self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SlotKind;

    #[test]
    fn registration_is_idempotent() {
        let mut b = ProgramBuilder::new();
        let main = b.register_function("main");
        let helper = b.register_function("helper");
        assert_eq!(b.register_function("main"), main);
        assert_ne!(main, helper);

        let point = b.register_class("Point");
        assert_eq!(b.register_class("Point"), point);
        assert_eq!(b.add_field(point, "x", BytecodeType::Int), Some(0));
        assert_eq!(b.add_field(point, "next", BytecodeType::Class(point)), Some(1));
        assert_eq!(b.add_field(point, "x", BytecodeType::Int), Some(0));
        assert_eq!(b.add_field(ClassId(9), "x", BytecodeType::Int), None);
        b.register_method(point, "helper", helper);

        let program = b.build();
        let class = program.class(point).unwrap();
        assert_eq!(class.methods["helper"], helper);
        assert_eq!(class.field_kinds(), vec![SlotKind::Int, SlotKind::Reference]);
    }

    #[test]
    fn constants_are_interned() {
        let mut b = ProgramBuilder::new();
        assert_eq!(b.add_constant(Constant::Int(1)), 0);
        assert_eq!(b.add_constant(Constant::String("a".into())), 1);
        assert_eq!(b.add_constant(Constant::Int(1)), 0);
        assert_eq!(b.build().constants.len(), 2);
    }
}
