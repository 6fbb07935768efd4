use std::cmp::Ordering;

use crate::context::Context;
use crate::opcode::Opcode;
use crate::program::Program;
use crate::value::{Pointer, Value};
use crate::{VmError, VmResult};

/// Numeric operands after the int/float promotion rules are applied.
enum Operands {
    Ints(i32, i32),
    Floats(f32, f32),
}

fn numeric(opcode: Opcode, lhs: Value, rhs: Value) -> VmResult<Operands> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Operands::Ints(a, b)),
        (Value::Int(a), Value::Float(b)) => Ok(Operands::Floats(a as f32, b)),
        (Value::Float(a), Value::Int(b)) => Ok(Operands::Floats(a, b as f32)),
        (Value::Float(a), Value::Float(b)) => Ok(Operands::Floats(a, b)),
        (Value::Int(_) | Value::Float(_), other) | (other, _) => Err(VmError::InvalidOperand {
            op: opcode.name(),
            found: other.type_name(),
        }),
    }
}

fn is_zero(value: &Value) -> bool {
    matches!(value, Value::Int(0)) || matches!(value, Value::Float(f) if *f == 0.0)
}

/// Orders two values under the comparison coercion rules. `None` means unordered (NaN).
fn compare_values(program: &Program, lhs: Value, rhs: Value) -> VmResult<Option<Ordering>> {
    match (lhs, rhs) {
        (Value::Pointer(a), Value::Pointer(b)) => Ok(Some(a.cmp(&b))),
        (Value::Pointer(a), Value::Int(0)) => Ok(Some(a.cmp(&Pointer::NULL))),
        (Value::Int(0), Value::Pointer(b)) => Ok(Some(Pointer::NULL.cmp(&b))),
        (Value::Pointer(_), other) | (other, Value::Pointer(_)) => Err(VmError::TypeMismatch {
            expected: "pointer",
            found: other.type_name(),
        }),
        (a, b) if a.is_string() || b.is_string() => {
            let left = program.stringify(&a)?;
            let right = program.stringify(&b)?;
            Ok(Some(left.cmp(&right)))
        }
        (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(&b))),
        (Value::Int(a), Value::Float(b)) => Ok((a as f32).partial_cmp(&b)),
        (Value::Float(a), Value::Int(b)) => Ok(a.partial_cmp(&(b as f32))),
        (Value::Float(a), Value::Float(b)) => Ok(a.partial_cmp(&b)),
        (a, _) => Err(VmError::TypeMismatch {
            expected: "number",
            found: a.type_name(),
        }),
    }
}

pub(super) fn compare(ctx: &mut Context<'_>, opcode: Opcode) -> VmResult<()> {
    let rhs = ctx.pop()?;
    let lhs = ctx.pop()?;
    let ordering = compare_values(ctx.program(), lhs, rhs)?;
    let result = match opcode {
        Opcode::Equal => ordering == Some(Ordering::Equal),
        Opcode::NotEqual => ordering != Some(Ordering::Equal),
        Opcode::LessEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        Opcode::GreaterEqual => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        Opcode::Less => ordering == Some(Ordering::Less),
        Opcode::Greater => ordering == Some(Ordering::Greater),
        other => {
            return Err(VmError::MalformedOpcode {
                word: other.word(),
                reason: "non-comparison",
            })
        }
    };
    ctx.push(result)
}

pub(super) fn arithmetic(ctx: &mut Context<'_>, opcode: Opcode) -> VmResult<()> {
    let rhs = ctx.pop()?;
    let lhs = ctx.pop()?;
    let result = match opcode {
        Opcode::Add if lhs.is_string() || rhs.is_string() => {
            let text = format!("{}{}", ctx.stringify(&lhs)?, ctx.stringify(&rhs)?);
            ctx.program_mut().intern(&text)
        }
        Opcode::Add => match numeric(opcode, lhs, rhs)? {
            Operands::Ints(a, b) => match a.checked_add(b) {
                Some(sum) => Value::Int(sum),
                None => Value::Float(a as f32 + b as f32),
            },
            Operands::Floats(a, b) => Value::Float(a + b),
        },
        Opcode::Sub => match numeric(opcode, lhs, rhs)? {
            Operands::Ints(a, b) => Value::Int(a.wrapping_sub(b)),
            Operands::Floats(a, b) => Value::Float(a - b),
        },
        Opcode::Mul => match numeric(opcode, lhs, rhs)? {
            Operands::Ints(a, b) => Value::Int(a.wrapping_mul(b)),
            Operands::Floats(a, b) => Value::Float(a * b),
        },
        Opcode::Div => {
            if is_zero(&rhs) {
                return Err(VmError::DivisionByZero { op: opcode.name() });
            }
            match numeric(opcode, lhs, rhs)? {
                Operands::Ints(a, b) => Value::Int(a.wrapping_div(b)),
                Operands::Floats(a, b) => Value::Float(a / b),
            }
        }
        Opcode::Mod => {
            if is_zero(&rhs) {
                return Err(VmError::DivisionByZero { op: opcode.name() });
            }
            match numeric(opcode, lhs, rhs)? {
                Operands::Ints(a, b) => Value::Int(a.wrapping_rem(b)),
                Operands::Floats(..) => {
                    return Err(VmError::TypeMismatch {
                        expected: "integer",
                        found: "float",
                    })
                }
            }
        }
        other => {
            return Err(VmError::MalformedOpcode {
                word: other.word(),
                reason: "non-arithmetic",
            })
        }
    };
    ctx.push(result)
}

pub(super) fn logical(ctx: &mut Context<'_>, opcode: Opcode) -> VmResult<()> {
    let rhs = ctx.pop()?;
    let lhs = ctx.pop()?;
    let result = match opcode {
        Opcode::And => lhs.is_truthy() && rhs.is_truthy(),
        _ => lhs.is_truthy() || rhs.is_truthy(),
    };
    ctx.push(result)
}

fn integral(opcode: Opcode, value: Value) -> VmResult<i32> {
    match value {
        Value::Int(number) => Ok(number),
        Value::Float(number) => Ok(number as i32),
        other => Err(VmError::InvalidOperand {
            op: opcode.name(),
            found: other.type_name(),
        }),
    }
}

pub(super) fn bitwise(ctx: &mut Context<'_>, opcode: Opcode) -> VmResult<()> {
    let rhs = integral(opcode, ctx.pop()?)?;
    let lhs = integral(opcode, ctx.pop()?)?;
    let result = match opcode {
        Opcode::BitwiseAnd => lhs & rhs,
        Opcode::BitwiseOr => lhs | rhs,
        _ => lhs ^ rhs,
    };
    ctx.push(result)
}

pub(super) fn bitwise_not(ctx: &mut Context<'_>) -> VmResult<()> {
    let value = integral(Opcode::BitwiseNot, ctx.pop()?)?;
    ctx.push(!value)
}

pub(super) fn floor(ctx: &mut Context<'_>) -> VmResult<()> {
    let value = ctx.pop()?;
    let result = match value {
        Value::Int(number) => number,
        // Truncates toward zero.
        Value::Float(number) => number as i32,
        other => {
            return Err(VmError::InvalidOperand {
                op: Opcode::Floor.name(),
                found: other.type_name(),
            })
        }
    };
    ctx.push(result)
}

pub(super) fn not(ctx: &mut Context<'_>) -> VmResult<()> {
    let value = ctx.pop()?;
    ctx.push(!value.is_truthy())
}

pub(super) fn negate(ctx: &mut Context<'_>) -> VmResult<()> {
    let result = match ctx.pop()? {
        Value::Int(number) => Value::Int(number.wrapping_neg()),
        Value::Float(number) => Value::Float(-number),
        other => {
            return Err(VmError::InvalidOperand {
                op: Opcode::Negate.name(),
                found: other.type_name(),
            })
        }
    };
    ctx.push(result)
}
