use crate::value::{Pointer, Value};
use crate::{StackKind, VmError, VmResult};

/// Bounded stack of tagged values. Every program owns two: a data stack and a control stack.
#[derive(Debug, Clone)]
pub struct ValueStack {
    values: Vec<Value>,
    capacity: usize,
    kind: StackKind,
}

impl ValueStack {
    pub fn new(kind: StackKind, capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity.min(64)),
            capacity,
            kind,
        }
    }

    pub fn kind(&self) -> StackKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: impl Into<Value>) -> VmResult<()> {
        if self.values.len() >= self.capacity {
            return Err(VmError::StackOverflow(self.kind));
        }
        self.values.push(value.into());
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.values.pop().ok_or(VmError::StackUnderflow(self.kind))
    }

    pub fn pop_integer(&mut self) -> VmResult<i32> {
        match self.pop()? {
            Value::Int(value) => Ok(value),
            other => Err(VmError::TypeMismatch {
                expected: "integer",
                found: other.type_name(),
            }),
        }
    }

    pub fn pop_float(&mut self) -> VmResult<f32> {
        match self.pop()? {
            Value::Float(value) => Ok(value),
            other => Err(VmError::TypeMismatch {
                expected: "float",
                found: other.type_name(),
            }),
        }
    }

    /// Pops a pointer. A literal integer zero is accepted as the null pointer.
    pub fn pop_pointer(&mut self) -> VmResult<Pointer> {
        let value = self.pop()?;
        value.as_pointer().ok_or(VmError::TypeMismatch {
            expected: "pointer",
            found: value.type_name(),
        })
    }

    pub fn peek(&self) -> VmResult<Value> {
        self.values
            .last()
            .copied()
            .ok_or(VmError::StackUnderflow(self.kind))
    }

    /// Reads the value at an absolute depth, counted from the bottom.
    pub fn get(&self, index: i32) -> VmResult<Value> {
        usize::try_from(index)
            .ok()
            .and_then(|slot| self.values.get(slot))
            .copied()
            .ok_or(VmError::InvalidAddress(index))
    }

    pub fn set(&mut self, index: i32, value: Value) -> VmResult<()> {
        let slot = usize::try_from(index)
            .ok()
            .and_then(|slot| self.values.get_mut(slot))
            .ok_or(VmError::InvalidAddress(index))?;
        *slot = value;
        Ok(())
    }

    pub fn swap_top(&mut self) -> VmResult<()> {
        let len = self.values.len();
        if len < 2 {
            return Err(VmError::StackUnderflow(self.kind));
        }
        self.values.swap(len - 1, len - 2);
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(capacity: usize) -> ValueStack {
        ValueStack::new(StackKind::Data, capacity)
    }

    #[test]
    fn pops_in_reverse_push_order() {
        let mut stack = data(8);
        let values = [
            Value::Int(1),
            Value::Float(2.5),
            Value::StaticString(4),
            Value::DynamicString(0),
            Value::Pointer(Pointer::new(0x10)),
        ];
        for value in values {
            stack.push(value).expect("push");
        }
        for value in values.iter().rev() {
            assert_eq!(stack.pop().expect("pop"), *value);
        }
        assert!(stack.is_empty());
    }

    #[test]
    fn empty_pop_underflows() {
        let mut stack = ValueStack::new(StackKind::Control, 4);
        assert_eq!(
            stack.pop(),
            Err(VmError::StackUnderflow(StackKind::Control))
        );
    }

    #[test]
    fn push_past_capacity_overflows() {
        let mut stack = data(2);
        stack.push(1).expect("push");
        stack.push(2).expect("push");
        assert_eq!(stack.push(3), Err(VmError::StackOverflow(StackKind::Data)));
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn typed_pops_check_the_tag() {
        let mut stack = data(4);
        stack.push(1.0f32).expect("push");
        assert_eq!(
            stack.pop_integer(),
            Err(VmError::TypeMismatch {
                expected: "integer",
                found: "float"
            })
        );
        stack.push(0).expect("push");
        assert_eq!(stack.pop_pointer(), Ok(Pointer::NULL));
    }

    #[test]
    fn absolute_addressing_is_bounds_checked() {
        let mut stack = data(4);
        stack.push(7).expect("push");
        assert_eq!(stack.get(0), Ok(Value::Int(7)));
        assert_eq!(stack.get(1), Err(VmError::InvalidAddress(1)));
        assert_eq!(stack.set(-1, Value::Int(0)), Err(VmError::InvalidAddress(-1)));
    }
}
