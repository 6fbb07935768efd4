//! Tagged values manipulated by script code.

use std::fmt;

/// Raw tag bits carried by every 16-bit word in the code stream and by every value.
pub mod tags {
    pub const OPCODE: u16 = 0x8000;
    pub const INT: u16 = 0x4000;
    pub const FLOAT: u16 = 0x2000;
    pub const STATIC_STRING: u16 = 0x1000;
    pub const DYNAMIC_STRING: u16 = 0x0800;

    pub const VALUE_INT: u16 = 0xC001;
    pub const VALUE_FLOAT: u16 = 0xA001;
    pub const VALUE_STRING: u16 = 0x9001;
    pub const VALUE_DYNAMIC_STRING: u16 = 0x9801;
    pub const VALUE_POINTER: u16 = 0xE001;
}

/// Opaque host reference carried on the stacks.
///
/// The VM never dereferences pointers. Address zero is the null pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pointer(u64);

impl Pointer {
    pub const NULL: Pointer = Pointer(0);

    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A single stack slot.
///
/// String variants hold offsets that only make sense together with the program that
/// produced them: static strings index the image's string table, dynamic strings index
/// the program's own string heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    StaticString(u32),
    DynamicString(u32),
    Pointer(Pointer),
}

impl Value {
    /// Decodes the literal that follows a `PUSH` word. The word's own tag bits select
    /// the value type.
    pub fn from_literal(word: u16, operand: u32) -> Self {
        if word & (tags::INT | tags::FLOAT) == tags::INT | tags::FLOAT {
            Value::Pointer(Pointer::new(u64::from(operand)))
        } else if word & tags::INT != 0 {
            Value::Int(operand as i32)
        } else if word & tags::FLOAT != 0 {
            Value::Float(f32::from_bits(operand))
        } else if word & tags::DYNAMIC_STRING != 0 {
            Value::DynamicString(operand)
        } else if word & tags::STATIC_STRING != 0 {
            Value::StaticString(operand)
        } else {
            Value::Int(operand as i32)
        }
    }

    /// The typed tag this value would carry in the legacy encoding.
    pub fn type_tag(&self) -> u16 {
        match self {
            Value::Int(_) => tags::VALUE_INT,
            Value::Float(_) => tags::VALUE_FLOAT,
            Value::StaticString(_) => tags::VALUE_STRING,
            Value::DynamicString(_) => tags::VALUE_DYNAMIC_STRING,
            Value::Pointer(_) => tags::VALUE_POINTER,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::StaticString(_) | Value::DynamicString(_) => "string",
            Value::Pointer(_) => "pointer",
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::StaticString(_) | Value::DynamicString(_))
    }

    /// Condition semantics used by `IF`, `WHILE`, `NOT` and the logical operators.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::StaticString(_) | Value::DynamicString(_) => true,
            Value::Pointer(pointer) => !pointer.is_null(),
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<Pointer> {
        match self {
            Value::Pointer(pointer) => Some(*pointer),
            Value::Int(0) => Some(Pointer::NULL),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<Pointer> for Value {
    fn from(value: Pointer) -> Self {
        Value::Pointer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Int(i32::from(value))
    }
}

/// Formats a float the way scripts observe it in string contexts (`%.5f`).
pub fn format_float(value: f32) -> String {
    format!("{value:.5}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_type_comes_from_the_push_word() {
        assert_eq!(Value::from_literal(tags::VALUE_INT, 7), Value::Int(7));
        assert_eq!(
            Value::from_literal(tags::VALUE_FLOAT, 1.5f32.to_bits()),
            Value::Float(1.5)
        );
        assert_eq!(
            Value::from_literal(tags::VALUE_STRING, 12),
            Value::StaticString(12)
        );
        assert_eq!(
            Value::from_literal(tags::VALUE_DYNAMIC_STRING, 3),
            Value::DynamicString(3)
        );
        assert_eq!(Value::from_literal(0x8001, 9), Value::Int(9));
    }

    #[test]
    fn negative_integers_survive_decoding() {
        assert_eq!(
            Value::from_literal(tags::VALUE_INT, (-5i32) as u32),
            Value::Int(-5)
        );
    }

    #[test]
    fn zero_integer_reads_as_null_pointer() {
        assert_eq!(Value::Int(0).as_pointer(), Some(Pointer::NULL));
        assert_eq!(Value::Int(3).as_pointer(), None);
    }

    #[test]
    fn floats_format_with_five_decimals() {
        assert_eq!(format_float(2.0), "2.00000");
        assert_eq!(format_float(-0.25), "-0.25000");
    }
}
