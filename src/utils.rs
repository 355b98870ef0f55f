use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Size of one heap slot, and of every object header.
pub const WORD: usize = 8;

/// Rounds `value` up to a multiple of `align`; `None` if that overflows.
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    match value % align {
        0 => Some(value),
        misalignment => value.checked_add(align - misalignment),
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(pub usize);

impl Display for FunctionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for FunctionId {
    fn from(id: usize) -> Self {
        FunctionId(id)
    }
}

impl FunctionId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub usize);

impl Display for ClassId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for ClassId {
    fn from(id: usize) -> Self {
        ClassId(id)
    }
}

impl ClassId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}
