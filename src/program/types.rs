use super::Instruction;
use crate::{
    utils::{ClassId, FunctionId},
    value::SlotKind,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BytecodeType {
    #[default]
    Void,
    Int,
    Float,
    Bool,
    Char,
    String,
    Array(Box<BytecodeType>),
    Class(ClassId),
}

impl Display for BytecodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BytecodeType::Void => f.write_str("void"),
            BytecodeType::Int => f.write_str("int"),
            BytecodeType::Float => f.write_str("float"),
            BytecodeType::Bool => f.write_str("bool"),
            BytecodeType::Char => f.write_str("char"),
            BytecodeType::String => f.write_str("string"),
            BytecodeType::Array(element) => write!(f, "{}[]", element),
            BytecodeType::Class(id) => write!(f, "class#{}", id),
        }
    }
}

/// A literal in the constant pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constant {
    Null,
    Int(i64),
    Double(f64),
    Bool(bool),
    Char(char),
    String(String),
    /// An element type, named by NEW_ARRAY.
    Type(BytecodeType),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: BytecodeType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    #[serde(default)]
    pub return_type: BytecodeType,
    #[serde(default)]
    pub parameters: Vec<Variable>,
    #[serde(default)]
    pub code: Vec<Instruction>,
    /// Declared locals; their slots follow the parameters.
    #[serde(default)]
    pub locals: Vec<Variable>,
}

impl Function {
    pub fn new(id: FunctionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            return_type: BytecodeType::Void,
            parameters: vec![],
            code: vec![],
            locals: vec![],
        }
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// Number of local slots the function addresses, parameters included.
    pub fn slot_count(&self) -> usize {
        self.parameters.len() + self.locals.len()
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, ty: BytecodeType) -> usize {
        self.parameters.push(Variable { name: name.into(), ty });
        self.parameters.len() - 1
    }

    /// Declares a local and returns its slot.
    pub fn add_local(&mut self, name: impl Into<String>, ty: BytecodeType) -> usize {
        self.locals.push(Variable { name: name.into(), ty });
        self.slot_count() - 1
    }

    /// Appends an instruction and returns its index.
    pub fn emit(&mut self, instruction: Instruction) -> usize {
        self.code.push(instruction);
        self.code.len() - 1
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "fn {} #{}(", self.name, self.id)?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", p.name, p.ty)?;
        }
        writeln!(f, ") -> {}", self.return_type)?;
        for (i, instruction) in self.code.iter().enumerate() {
            writeln!(f, "  {:04}: {}", i, instruction)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub slot: usize,
    #[serde(rename = "type")]
    pub ty: BytecodeType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Class {
    pub id: ClassId,
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Field>,
    #[serde(default)]
    pub methods: BTreeMap<String, FunctionId>,
}

impl Class {
    pub fn new(id: ClassId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: BTreeMap::new(),
            methods: BTreeMap::new(),
        }
    }

    /// Slot kinds of an instance, indexed by field slot. Unassigned slots are
    /// plain integers.
    pub fn field_kinds(&self) -> Vec<SlotKind> {
        let count = self.fields.values().map(|f| f.slot + 1).max().unwrap_or(0);
        let mut kinds = vec![SlotKind::Int; count];
        for field in self.fields.values() {
            kinds[field.slot] = SlotKind::from(&field.ty);
        }
        kinds
    }
}
