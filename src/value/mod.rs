use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
};

pub mod layout;

pub use layout::{ArrayLayout, ClassLayout, HasReferences, ObjectDescriptor, ObjectKind, SlotKind};

/// Opaque handle to an object in the heap arena. Zero is the null reference.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub u64);

impl Address {
    pub const NULL: Self = Address(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#X}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Int,
    Bool,
    Double,
    Char,
    ObjectRef,
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Int => "int",
            ValueKind::Bool => "bool",
            ValueKind::Double => "double",
            ValueKind::Char => "char",
            ValueKind::ObjectRef => "object",
        };
        f.write_str(name)
    }
}

/// The unit moved between the evaluation stack, locals and heap slots.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Bool(bool),
    Double(f64),
    Char(char),
    ObjectRef(Address),
}

/// Why a value-level operation could not produce a result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueError {
    DivisionByZero,
    Unsupported,
}

#[derive(Copy, Clone, Debug)]
enum Numeric {
    Int(i64),
    Double(f64),
}

impl Numeric {
    fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(i) => i as f64,
            Numeric::Double(d) => d,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Numeric::Int(i) => i == 0,
            Numeric::Double(d) => d == 0.0,
        }
    }
}

macro_rules! arithmetic_op {
    ($l:expr, $r:expr, $int_op:ident, $float_op:tt) => {
        match ($l.numeric(), $r.numeric()) {
            (Some(Numeric::Int(l)), Some(Numeric::Int(r))) => Ok(Value::Int(l.$int_op(r))),
            (Some(l), Some(r)) => Ok(Value::Double(l.as_f64() $float_op r.as_f64())),
            _ => Err(ValueError::Unsupported),
        }
    };
}

impl Value {
    pub fn object(address: Address) -> Self {
        if address.is_null() {
            Value::Null
        } else {
            Value::ObjectRef(address)
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Int(_) => ValueKind::Int,
            Value::Bool(_) => ValueKind::Bool,
            Value::Double(_) => ValueKind::Double,
            Value::Char(_) => ValueKind::Char,
            Value::ObjectRef(_) => ValueKind::ObjectRef,
        }
    }

    /// True for `Null` and for a reference whose raw address is zero.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::ObjectRef(a) => a.is_null(),
            _ => false,
        }
    }

    /// The heap address carried by a non-null reference.
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::ObjectRef(a) if !a.is_null() => Some(*a),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Char(c) => Some(*c as i64),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        self.numeric().map(Numeric::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_char(&self) -> Option<char> {
        match self {
            Value::Char(c) => Some(*c),
            _ => None,
        }
    }

    /// Boolean coercion used by AND/OR/NOT and the conditional jumps.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Int(i) => *i != 0,
            Value::Bool(b) => *b,
            Value::Double(d) => *d != 0.0,
            Value::Char(c) => *c != '\0',
            Value::ObjectRef(a) => !a.is_null(),
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        match self {
            Value::Int(i) => Some(Numeric::Int(*i)),
            Value::Char(c) => Some(Numeric::Int(*c as i64)),
            Value::Double(d) => Some(Numeric::Double(*d)),
            _ => None,
        }
    }

    pub fn add(self, rhs: Value) -> Result<Value, ValueError> {
        arithmetic_op!(self, rhs, wrapping_add, +)
    }

    pub fn sub(self, rhs: Value) -> Result<Value, ValueError> {
        arithmetic_op!(self, rhs, wrapping_sub, -)
    }

    pub fn mul(self, rhs: Value) -> Result<Value, ValueError> {
        arithmetic_op!(self, rhs, wrapping_mul, *)
    }

    pub fn div(self, rhs: Value) -> Result<Value, ValueError> {
        if rhs.numeric().is_some_and(Numeric::is_zero) {
            return Err(ValueError::DivisionByZero);
        }
        arithmetic_op!(self, rhs, wrapping_div, /)
    }

    pub fn rem(self, rhs: Value) -> Result<Value, ValueError> {
        if rhs.numeric().is_some_and(Numeric::is_zero) {
            return Err(ValueError::DivisionByZero);
        }
        arithmetic_op!(self, rhs, wrapping_rem, %)
    }

    pub fn neg(self) -> Result<Value, ValueError> {
        match self.numeric() {
            Some(Numeric::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
            Some(Numeric::Double(d)) => Ok(Value::Double(-d)),
            None => Err(ValueError::Unsupported),
        }
    }

    /// Ordering between numeric values or between two bools (`false` first);
    /// `None` for anything else.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if let (Value::Bool(l), Value::Bool(r)) = (self, other) {
            return Some(l.cmp(r));
        }
        match (self.numeric()?, other.numeric()?) {
            (Numeric::Int(l), Numeric::Int(r)) => Some(l.cmp(&r)),
            (l, r) => l.as_f64().partial_cmp(&r.as_f64()),
        }
    }

    /// Equality as seen by CMP_EQ: numerics by value, references by address,
    /// and any two null values are equal.
    pub fn equals(&self, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return self.is_null() && other.is_null();
        }
        match (self, other) {
            (Value::Bool(l), Value::Bool(r)) => l == r,
            (Value::ObjectRef(l), Value::ObjectRef(r)) => l == r,
            _ => matches!(self.compare(other), Some(Ordering::Equal)),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Double(d) => write!(f, "{}", d),
            Value::Char(c) => write!(f, "{}", c),
            Value::ObjectRef(a) if a.is_null() => f.write_str("null"),
            Value::ObjectRef(a) => write!(f, "[Object Ref: {}]", a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_arithmetic_stays_int() {
        assert_eq!(Value::Int(2).add(Value::Int(3)), Ok(Value::Int(5)));
        assert_eq!(Value::Int(7).rem(Value::Int(3)), Ok(Value::Int(1)));
        assert_eq!(Value::Int(i64::MAX).add(Value::Int(1)), Ok(Value::Int(i64::MIN)));
    }

    #[test]
    fn double_operand_promotes() {
        assert_eq!(Value::Int(1).add(Value::Double(0.5)), Ok(Value::Double(1.5)));
        assert_eq!(Value::Double(3.0).div(Value::Int(2)), Ok(Value::Double(1.5)));
    }

    #[test]
    fn zero_divisor_is_reported() {
        assert_eq!(Value::Int(10).div(Value::Int(0)), Err(ValueError::DivisionByZero));
        assert_eq!(Value::Double(1.0).rem(Value::Double(0.0)), Err(ValueError::DivisionByZero));
    }

    #[test]
    fn non_numeric_operands_are_unsupported() {
        assert_eq!(Value::Bool(true).add(Value::Int(1)), Err(ValueError::Unsupported));
        assert_eq!(Value::Null.neg(), Err(ValueError::Unsupported));
        assert_eq!(Value::Bool(true).compare(&Value::Int(1)), None);
    }

    #[test]
    fn bools_order_false_first() {
        assert_eq!(Value::Bool(false).compare(&Value::Bool(true)), Some(Ordering::Less));
        assert_eq!(Value::Bool(true).compare(&Value::Bool(true)), Some(Ordering::Equal));
    }

    #[test]
    fn null_reference_equals_null() {
        assert!(Value::Null.equals(&Value::ObjectRef(Address::NULL)));
        assert!(!Value::Null.equals(&Value::Int(0)));
        assert!(Value::Char('a').equals(&Value::Int(97)));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.truthy());
        assert!(Value::Int(-1).truthy());
        assert!(!Value::Double(0.0).truthy());
        assert!(Value::ObjectRef(Address(0x1000)).truthy());
        assert!(!Value::ObjectRef(Address::NULL).truthy());
    }
}
