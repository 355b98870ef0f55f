use crate::error::ProgramError;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

macro_rules! opcodes {
    ($($variant:ident => $name:literal),* $(,)?) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum OpCode {
            $(
                #[serde(rename = $name)]
                $variant,
            )*
        }

        impl OpCode {
            pub const ALL: &'static [OpCode] = &[$(OpCode::$variant),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(OpCode::$variant => $name,)*
                }
            }
        }

        impl FromStr for OpCode {
            type Err = ProgramError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(OpCode::$variant),)*
                    other => Err(ProgramError::InvalidFormat(format!("unknown opcode {}", other))),
                }
            }
        }
    };
}

opcodes! {
    Push => "PUSH",
    Pop => "POP",
    Dup => "DUP",
    Swap => "SWAP",
    Load => "LOAD",
    Store => "STORE",
    Add => "ADD",
    Sub => "SUB",
    Mul => "MUL",
    Div => "DIV",
    Mod => "MOD",
    Neg => "NEG",
    CmpEq => "CMP_EQ",
    CmpNe => "CMP_NE",
    CmpLt => "CMP_LT",
    CmpGt => "CMP_GT",
    CmpLe => "CMP_LE",
    CmpGe => "CMP_GE",
    And => "AND",
    Or => "OR",
    Not => "NOT",
    Jump => "JUMP",
    JumpIfTrue => "JUMP_IF_TRUE",
    JumpIfFalse => "JUMP_IF_FALSE",
    Call => "CALL",
    Return => "RETURN",
    NewObject => "NEW_OBJECT",
    GetField => "GET_FIELD",
    SetField => "SET_FIELD",
    NewArray => "NEW_ARRAY",
    GetElement => "GET_ELEMENT",
    SetElement => "SET_ELEMENT",
    ArrayLength => "ARRAY_LENGTH",
    Print => "PRINT",
}

impl Display for OpCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operands: Vec<i64>,
}

impl Instruction {
    pub fn new(op: OpCode) -> Self {
        Self { op, operands: vec![] }
    }

    pub fn with_operands(op: OpCode, operands: impl IntoIterator<Item = i64>) -> Self {
        Self {
            op,
            operands: operands.into_iter().collect(),
        }
    }

    pub fn operand(&self, index: usize) -> Option<i64> {
        self.operands.get(index).copied()
    }

    /// The authoritative operand of multi-operand forms such as `LOAD func, slot`.
    pub fn last_operand(&self) -> Option<i64> {
        self.operands.last().copied()
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, operand)?;
        }
        Ok(())
    }
}

/// Parses the disassembly form, e.g. `PUSH 0` or `LOAD 1, 2`.
impl FromStr for Instruction {
    type Err = ProgramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (op, rest) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
        let op: OpCode = op.parse()?;
        let operands = rest
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(|o| {
                o.parse::<i64>()
                    .map_err(|e| ProgramError::InvalidFormat(format!("bad operand {:?} for {}: {}", o, op, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { op, operands })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassembly_format() {
        assert_eq!(Instruction::new(OpCode::Add).to_string(), "ADD");
        assert_eq!(Instruction::with_operands(OpCode::Push, [0]).to_string(), "PUSH 0");
        assert_eq!(Instruction::with_operands(OpCode::Load, [1, 2]).to_string(), "LOAD 1, 2");
    }

    #[test]
    fn parses_disassembly() {
        let i: Instruction = " JUMP_IF_FALSE 12 ".parse().unwrap();
        assert_eq!(i, Instruction::with_operands(OpCode::JumpIfFalse, [12]));
        let i: Instruction = "SET_FIELD 0, -1".parse().unwrap();
        assert_eq!(i.operands, vec![0, -1]);
        assert!("FROB".parse::<Instruction>().is_err());
        assert!("PUSH x".parse::<Instruction>().is_err());
    }

    #[test]
    fn opcode_names_round_trip() {
        assert_eq!(OpCode::ALL.len(), 34);
        for op in OpCode::ALL {
            assert_eq!(op.name().parse::<OpCode>().unwrap(), *op);
        }
    }

    #[test]
    fn json_shape() {
        let json = serde_json::to_string(&Instruction::new(OpCode::CmpLe)).unwrap();
        assert_eq!(json, r#"{"op":"CMP_LE"}"#);
        let back: Instruction = serde_json::from_str(r#"{"op":"CALL","operands":[3]}"#).unwrap();
        assert_eq!(back, Instruction::with_operands(OpCode::Call, [3]));
    }
}
