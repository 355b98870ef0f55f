//! Object shapes.
//!
//! Every object the VM allocates is an 8-byte header followed by sequential
//! 8-byte slots. Class instances store their class id in the header, arrays
//! store their element count. Untyped arrays follow their element slots with
//! one kind tag byte per element. A descriptor tells the collector which slots
//! hold references; nothing else in an object is ever read as a pointer.

use super::{Address, Value};
use crate::{
    error::ExecutionError,
    program::BytecodeType,
    utils::{align_up, ClassId, WORD},
};
use enum_dispatch::enum_dispatch;
use std::collections::BTreeSet;

pub const HEADER_SIZE: usize = WORD;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Class,
    Array,
}

/// How a single 8-byte slot is interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Int,
    Double,
    Bool,
    Char,
    Reference,
}

impl SlotKind {
    /// Decodes an element tag of an untyped array.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(SlotKind::Int),
            1 => Some(SlotKind::Double),
            2 => Some(SlotKind::Bool),
            3 => Some(SlotKind::Char),
            4 => Some(SlotKind::Reference),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            SlotKind::Int => 0,
            SlotKind::Double => 1,
            SlotKind::Bool => 2,
            SlotKind::Char => 3,
            SlotKind::Reference => 4,
        }
    }

    /// The kind of slot that hands `value` back unchanged.
    pub fn of(value: Value) -> Self {
        match value {
            Value::Int(_) => SlotKind::Int,
            Value::Double(_) => SlotKind::Double,
            Value::Bool(_) => SlotKind::Bool,
            Value::Char(_) => SlotKind::Char,
            Value::Null | Value::ObjectRef(_) => SlotKind::Reference,
        }
    }

    /// Reads the tag byte at `shift` out of a packed tag word.
    pub fn from_tag_word(word: i64, shift: u32) -> Option<Self> {
        Self::from_code((((word as u64) >> shift) & 0xFF) as i64)
    }

    /// Replaces the tag byte at `shift` in a packed tag word.
    pub fn into_tag_word(self, word: i64, shift: u32) -> i64 {
        let cleared = (word as u64) & !(0xFF << shift);
        (cleared | ((self.code() as u64) << shift)) as i64
    }

    pub fn is_reference(self) -> bool {
        self == SlotKind::Reference
    }

    pub fn name(self) -> &'static str {
        match self {
            SlotKind::Int => "int",
            SlotKind::Double => "double",
            SlotKind::Bool => "bool",
            SlotKind::Char => "char",
            SlotKind::Reference => "reference",
        }
    }

    /// Converts a value into the raw slot representation.
    ///
    /// A slot only accepts values it can decode unchanged: references and
    /// null go in reference slots, and each primitive slot takes its own kind.
    pub fn encode(self, value: Value) -> Result<i64, ExecutionError> {
        match (self, value) {
            (SlotKind::Int, Value::Int(i)) => Ok(i),
            (SlotKind::Double, Value::Double(d)) => Ok(d.to_bits() as i64),
            (SlotKind::Bool, Value::Bool(b)) => Ok(b as i64),
            (SlotKind::Char, Value::Char(c)) => Ok(c as i64),
            (SlotKind::Reference, Value::Null) => Ok(0),
            (SlotKind::Reference, Value::ObjectRef(a)) => Ok(a.as_u64() as i64),
            _ => Err(ExecutionError::TypeMismatch {
                expected: self.name().to_string(),
                actual: value.kind().to_string(),
            }),
        }
    }

    pub fn decode(self, raw: i64) -> Value {
        match self {
            SlotKind::Int => Value::Int(raw),
            SlotKind::Double => Value::Double(f64::from_bits(raw as u64)),
            SlotKind::Bool => Value::Bool(raw != 0),
            SlotKind::Char => Value::Char(char::from_u32(raw as u32).unwrap_or('\u{FFFD}')),
            SlotKind::Reference => Value::object(Address(raw as u64)),
        }
    }
}

impl From<&BytecodeType> for SlotKind {
    fn from(ty: &BytecodeType) -> Self {
        match ty {
            BytecodeType::Void | BytecodeType::Int => SlotKind::Int,
            BytecodeType::Float => SlotKind::Double,
            BytecodeType::Bool => SlotKind::Bool,
            BytecodeType::Char => SlotKind::Char,
            BytecodeType::String | BytecodeType::Array(_) | BytecodeType::Class(_) => {
                SlotKind::Reference
            }
        }
    }
}

#[enum_dispatch]
pub trait HasReferences {
    fn kind(&self) -> ObjectKind;

    /// Calls `visit` with the byte offset of every reference slot in an
    /// object of `size` bytes. `read` yields the object's word at an offset.
    fn visit_reference_offsets(
        &self,
        read: &dyn Fn(usize) -> Option<i64>,
        size: usize,
        visit: &mut dyn FnMut(usize),
    );
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassLayout {
    class_id: Option<ClassId>,
    fields: Vec<SlotKind>,
    reference_offsets: Vec<usize>,
}

impl ClassLayout {
    /// A raw shape described only by the byte offsets that hold references.
    pub fn with_offsets(offsets: impl IntoIterator<Item = usize>) -> Self {
        let offsets: BTreeSet<usize> = offsets.into_iter().collect();
        Self {
            class_id: None,
            fields: vec![],
            reference_offsets: offsets.into_iter().collect(),
        }
    }

    /// The header-plus-slots shape of an instance of `class_id`.
    pub fn for_fields(class_id: ClassId, fields: Vec<SlotKind>) -> Self {
        let reference_offsets = fields
            .iter()
            .enumerate()
            .filter(|(_, kind)| kind.is_reference())
            .map(|(i, _)| HEADER_SIZE + i * WORD)
            .collect();
        Self {
            class_id: Some(class_id),
            fields,
            reference_offsets,
        }
    }

    pub fn class_id(&self) -> Option<ClassId> {
        self.class_id
    }

    pub fn field(&self, index: usize) -> Option<SlotKind> {
        self.fields.get(index).copied()
    }

    pub fn instance_size(&self) -> usize {
        HEADER_SIZE + self.fields.len() * WORD
    }

    pub fn reference_offsets(&self) -> &[usize] {
        &self.reference_offsets
    }
}

impl HasReferences for ClassLayout {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Class
    }

    fn visit_reference_offsets(
        &self,
        _read: &dyn Fn(usize) -> Option<i64>,
        _size: usize,
        visit: &mut dyn FnMut(usize),
    ) {
        for &offset in &self.reference_offsets {
            visit(offset);
        }
    }
}

/// Shape of an array. A typed array stores every element as `element`; an
/// untyped one (`element` is `None`) keeps each element's [`SlotKind`] in a
/// tag area after the element slots, so any value round-trips unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayLayout {
    element: Option<SlotKind>,
}

impl ArrayLayout {
    pub fn new(element: SlotKind) -> Self {
        Self {
            element: Some(element),
        }
    }

    pub fn untyped() -> Self {
        Self { element: None }
    }

    pub fn element(&self) -> Option<SlotKind> {
        self.element
    }

    /// Bytes needed for `length` elements, or `None` if that overflows.
    pub fn allocation_size(&self, length: usize) -> Option<usize> {
        let slots = length.checked_mul(WORD)?.checked_add(HEADER_SIZE)?;
        match self.element {
            Some(_) => Some(slots),
            None => slots.checked_add(align_up(length, WORD)?),
        }
    }

    /// Offset of the tag word holding element `index` of a `length`-element
    /// untyped array, and the bit shift of its tag byte.
    pub fn tag_position(length: usize, index: usize) -> (usize, u32) {
        let offset = HEADER_SIZE + length * WORD + index / WORD * WORD;
        (offset, (index % WORD * 8) as u32)
    }
}

impl HasReferences for ArrayLayout {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Array
    }

    fn visit_reference_offsets(
        &self,
        read: &dyn Fn(usize) -> Option<i64>,
        size: usize,
        visit: &mut dyn FnMut(usize),
    ) {
        let Some(length) = read(0) else {
            return;
        };
        let length = usize::try_from(length).unwrap_or(0);

        match self.element {
            Some(SlotKind::Reference) => {
                // a corrupt header must not send the collector past the object
                let capacity = size.saturating_sub(HEADER_SIZE) / WORD;
                for i in 0..length.min(capacity) {
                    visit(HEADER_SIZE + i * WORD);
                }
            }
            Some(_) => {}
            None => {
                if self.allocation_size(length).map_or(true, |needed| needed > size) {
                    return;
                }
                for i in 0..length {
                    let (offset, shift) = Self::tag_position(length, i);
                    let tag = read(offset).and_then(|word| SlotKind::from_tag_word(word, shift));
                    if tag == Some(SlotKind::Reference) {
                        visit(HEADER_SIZE + i * WORD);
                    }
                }
            }
        }
    }
}

/// Shape metadata shared by every object of one class or array kind.
#[enum_dispatch(HasReferences)]
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectDescriptor {
    ClassLayout,
    ArrayLayout,
}

impl ObjectDescriptor {
    pub fn class(reference_offsets: impl IntoIterator<Item = usize>) -> Self {
        ClassLayout::with_offsets(reference_offsets).into()
    }

    pub fn array(element: SlotKind) -> Self {
        ArrayLayout::new(element).into()
    }

    pub fn untyped_array() -> Self {
        ArrayLayout::untyped().into()
    }

    pub fn as_class(&self) -> Option<&ClassLayout> {
        match self {
            ObjectDescriptor::ClassLayout(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayLayout> {
        match self {
            ObjectDescriptor::ArrayLayout(a) => Some(a),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(descriptor: &ObjectDescriptor, words: &[i64], size: usize) -> Vec<usize> {
        let read = |offset: usize| words.get(offset / WORD).copied();
        let mut found = vec![];
        descriptor.visit_reference_offsets(&read, size, &mut |o| found.push(o));
        found
    }

    #[test]
    fn raw_offsets_are_an_ordered_set() {
        let desc = ObjectDescriptor::class([16, 0, 16, 8]);
        assert_eq!(desc.kind(), ObjectKind::Class);
        assert_eq!(offsets(&desc, &[], 24), vec![0, 8, 16]);
    }

    #[test]
    fn class_fields_skip_the_header() {
        let layout = ClassLayout::for_fields(
            ClassId(3),
            vec![SlotKind::Int, SlotKind::Reference, SlotKind::Double, SlotKind::Reference],
        );
        assert_eq!(layout.reference_offsets(), &[16, 32]);
        assert_eq!(layout.instance_size(), 40);
    }

    #[test]
    fn reference_arrays_are_bounded_by_size() {
        let desc = ObjectDescriptor::array(SlotKind::Reference);
        assert_eq!(offsets(&desc, &[2], 24), vec![8, 16]);
        assert_eq!(offsets(&desc, &[1_000], 24), vec![8, 16]);
        assert!(offsets(&desc, &[-4], 24).is_empty());
        assert!(offsets(&ObjectDescriptor::array(SlotKind::Int), &[2], 24).is_empty());
    }

    #[test]
    fn untyped_arrays_follow_reference_tags() {
        let layout = ArrayLayout::untyped();
        assert_eq!(layout.allocation_size(3), Some(8 + 3 * 8 + 8));
        assert_eq!(layout.allocation_size(9), Some(8 + 9 * 8 + 16));
        assert_eq!(layout.allocation_size(0), Some(8));
        assert_eq!(layout.allocation_size(usize::MAX / 8), None);

        let mut tags = 0;
        for (i, kind) in [SlotKind::Reference, SlotKind::Double, SlotKind::Reference].into_iter().enumerate() {
            let (offset, shift) = ArrayLayout::tag_position(3, i);
            assert_eq!(offset, 32);
            tags = kind.into_tag_word(tags, shift);
        }
        let desc = ObjectDescriptor::untyped_array();
        assert_eq!(offsets(&desc, &[3, 0x1010, 0, 0x1020, tags], 40), vec![8, 24]);
        // a header claiming more elements than fit is not trusted
        assert!(offsets(&desc, &[9, 0x1010, 0, 0x1020, tags], 40).is_empty());
    }

    #[test]
    fn tag_words_pack_one_byte_per_element() {
        let (_, shift) = ArrayLayout::tag_position(16, 13);
        assert_eq!(ArrayLayout::tag_position(16, 13).0, 8 + 16 * 8 + 8);
        let word = SlotKind::Char.into_tag_word(-1, shift);
        assert_eq!(SlotKind::from_tag_word(word, shift), Some(SlotKind::Char));
        assert_eq!(SlotKind::from_tag_word(word, shift - 8), None);
        assert_eq!(SlotKind::from_tag_word(0, shift), Some(SlotKind::Int));
    }

    #[test]
    fn slots_reject_misplaced_references() {
        let r = Value::ObjectRef(Address(0x1008));
        assert!(SlotKind::Int.encode(r).is_err());
        assert!(SlotKind::Reference.encode(Value::Int(4)).is_err());
        assert_eq!(SlotKind::Reference.encode(Value::Null), Ok(0));
        assert_eq!(SlotKind::Reference.decode(0), Value::Null);
    }

    #[test]
    fn primitive_slots_refuse_other_kinds() {
        assert!(SlotKind::Int.encode(Value::Double(2.5)).is_err());
        assert!(SlotKind::Int.encode(Value::Bool(true)).is_err());
        assert!(SlotKind::Int.encode(Value::Null).is_err());
        assert!(SlotKind::Double.encode(Value::Int(1)).is_err());
        assert!(SlotKind::Bool.encode(Value::Int(1)).is_err());
        assert!(SlotKind::Char.encode(Value::Int(65)).is_err());
    }

    #[test]
    fn slot_round_trip_keeps_kind() {
        for (kind, value) in [
            (SlotKind::Int, Value::Int(-42)),
            (SlotKind::Double, Value::Double(2.5)),
            (SlotKind::Bool, Value::Bool(true)),
            (SlotKind::Char, Value::Char('ж')),
            (SlotKind::Reference, Value::ObjectRef(Address(0x1010))),
        ] {
            let raw = kind.encode(value).unwrap();
            assert_eq!(kind.decode(raw), value);
            assert_eq!(SlotKind::of(value), kind);
            assert_eq!(SlotKind::from_code(kind.code()), Some(kind));
        }
    }
}
