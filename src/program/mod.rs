//! The compiled program the VM executes.
//!
//! A program is produced by an external compiler and is read-only once
//! loaded. It is persisted as JSON.
mod builder;
mod instruction;
mod types;

pub use builder::ProgramBuilder;
pub use instruction::{Instruction, OpCode};
pub use types::{BytecodeType, Class, Constant, Field, Function, Variable};

use crate::{
    error::ProgramError,
    utils::{ClassId, FunctionId},
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BytecodeProgram {
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub classes: Vec<Class>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub entry_function_id: FunctionId,
}

impl BytecodeProgram {
    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        // ids are normally positional
        match self.functions.get(id.as_usize()) {
            Some(f) if f.id == id => Some(f),
            _ => self.functions.iter().find(|f| f.id == id),
        }
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn class(&self, id: ClassId) -> Option<&Class> {
        match self.classes.get(id.as_usize()) {
            Some(c) if c.id == id => Some(c),
            _ => self.classes.iter().find(|c| c.id == id),
        }
    }

    pub fn constant(&self, index: usize) -> Option<&Constant> {
        self.constants.get(index)
    }

    pub fn entry_function(&self) -> Option<&Function> {
        self.function(self.entry_function_id)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ProgramError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String, ProgramError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ProgramError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ProgramError> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}
