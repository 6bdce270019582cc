//! Formula operations and their stack-machine evaluation.
//!
//! A formula is an ordered list of operations over a value stack: pushes of
//! constants, knot vectors, or channel reads, arithmetic operators popping
//! two values, and spline operators popping an input value, N knots, and the
//! knot count. Evaluation leaves exactly one value on the stack.

use crate::spline::{evaluate_constant, evaluate_linear, KochanekBartelsSpline, TcbKey};
use dson_api_core::{ChannelKey, DsonError};

/// What a push places on the stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Scalar(f64),
    /// A spline knot, `(x, y)` or `(x, y, tension, continuity, bias)`.
    Knot(Vec<f64>),
    /// A channel read, resolved ahead of evaluation.
    Channel(ChannelKey),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Push(Operand),
    Add,
    Sub,
    Mult,
    Div,
    SplineTcb,
    SplineLinear,
    SplineConstant,
}

/// How a formula's result combines with other formulas on the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Sum,
    Mult,
    /// Replaces the summed value outright instead of contributing to it.
    Exclusive,
}

/// One lowered formula: an output channel, a stage, and operations whose
/// channel reads have already been resolved.
#[derive(Debug, Clone)]
pub struct Formula {
    pub output: ChannelKey,
    pub stage: Stage,
    pub ops: Vec<Op>,
}

impl Formula {
    pub fn new(output: ChannelKey, stage: Stage, ops: Vec<Op>) -> Formula {
        Formula { output, stage, ops }
    }

    /// Channels this formula reads.
    pub fn inputs(&self) -> impl Iterator<Item = &ChannelKey> {
        self.ops.iter().filter_map(|op| match op {
            Op::Push(Operand::Channel(key)) => Some(key),
            _ => None,
        })
    }

    /// The formula's value if it is a bare constant push, else None.
    pub fn constant_value(&self) -> Option<f64> {
        match self.ops.as_slice() {
            [Op::Push(Operand::Scalar(v))] => Some(*v),
            _ => None,
        }
    }

    /// Fold constant subexpressions: `2*3` becomes `6`, `0*n` becomes `0`,
    /// `1*n` becomes `n`, and an all-constant spline bakes to its result.
    pub fn fold_constants(&mut self) {
        let mut stack: Vec<Op> = Vec::with_capacity(self.ops.len());
        for op in self.ops.drain(..) {
            match op {
                Op::Mult => fold_mult(&mut stack),
                Op::SplineTcb => fold_spline_tcb(&mut stack),
                other => stack.push(other),
            }
        }
        self.ops = stack;
    }

    /// Evaluate against `read`, which supplies current channel values.
    pub fn evaluate(&self, read: &mut dyn FnMut(&ChannelKey) -> f64) -> Result<f64, DsonError> {
        let mut stack: Vec<StackValue> = Vec::new();
        for op in &self.ops {
            match op {
                Op::Push(Operand::Scalar(v)) => stack.push(StackValue::Scalar(*v)),
                Op::Push(Operand::Knot(k)) => stack.push(StackValue::Knot(k.clone())),
                Op::Push(Operand::Channel(key)) => {
                    stack.push(StackValue::Scalar(read(key)));
                }
                // Binary operators combine the second value on the stack
                // with the top; for sub and div the top is the right side.
                Op::Add => binary(&mut stack, |b, a| b + a)?,
                Op::Sub => binary(&mut stack, |b, a| b - a)?,
                Op::Mult => binary(&mut stack, |b, a| b * a)?,
                Op::Div => binary(&mut stack, |b, a| b / a)?,
                Op::SplineTcb => {
                    let (input, knots) = pop_spline_args(&mut stack)?;
                    let keys = knots
                        .iter()
                        .map(|k| TcbKey::from_slice(k))
                        .collect::<Result<Vec<_>, _>>()?;
                    let spline = KochanekBartelsSpline::new(keys)?;
                    stack.push(StackValue::Scalar(spline.evaluate(input)));
                }
                Op::SplineLinear => {
                    let (input, knots) = pop_spline_args(&mut stack)?;
                    let points = knot_points(&knots)?;
                    stack.push(StackValue::Scalar(evaluate_linear(&points, input)));
                }
                Op::SplineConstant => {
                    let (input, knots) = pop_spline_args(&mut stack)?;
                    let points = knot_points(&knots)?;
                    stack.push(StackValue::Scalar(evaluate_constant(&points, input)));
                }
            }
        }
        match stack.as_slice() {
            [StackValue::Scalar(v)] => Ok(*v),
            _ => Err(DsonError::Parse {
                reason: "unbalanced formula stack".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
enum StackValue {
    Scalar(f64),
    Knot(Vec<f64>),
}

fn binary(
    stack: &mut Vec<StackValue>,
    apply: impl Fn(f64, f64) -> f64,
) -> Result<(), DsonError> {
    let a = pop_scalar(stack)?;
    let b = pop_scalar(stack)?;
    stack.push(StackValue::Scalar(apply(b, a)));
    Ok(())
}

fn pop_scalar(stack: &mut Vec<StackValue>) -> Result<f64, DsonError> {
    match stack.pop() {
        Some(StackValue::Scalar(v)) => Ok(v),
        Some(StackValue::Knot(_)) => Err(DsonError::Parse {
            reason: "knot operand where a scalar was expected".to_string(),
        }),
        None => Err(DsonError::Parse {
            reason: "formula stack underflow".to_string(),
        }),
    }
}

/// Pop the knot count, the knots, then the spline's input value.
fn pop_spline_args(stack: &mut Vec<StackValue>) -> Result<(f64, Vec<Vec<f64>>), DsonError> {
    let raw_count = pop_scalar(stack)?;
    if !raw_count.is_finite()
        || raw_count < 0.0
        || raw_count.fract() != 0.0
        || raw_count as usize > stack.len()
    {
        return Err(DsonError::Parse {
            reason: format!("spline knot count {raw_count} out of range"),
        });
    }
    let count = raw_count as usize;
    let mut knots = Vec::with_capacity(count);
    for _ in 0..count {
        match stack.pop() {
            Some(StackValue::Knot(k)) => knots.push(k),
            Some(StackValue::Scalar(_)) | None => {
                return Err(DsonError::Parse {
                    reason: "spline expects knot operands".to_string(),
                })
            }
        }
    }
    let input = pop_scalar(stack)?;
    Ok((input, knots))
}

fn knot_points(knots: &[Vec<f64>]) -> Result<Vec<(f64, f64)>, DsonError> {
    knots
        .iter()
        .map(|k| match *k.as_slice() {
            [x, y, ..] => Ok((x, y)),
            _ => Err(DsonError::Parse {
                reason: "spline knot must have at least 2 values".to_string(),
            }),
        })
        .collect()
}

fn scalar_of(op: &Op) -> Option<f64> {
    match op {
        Op::Push(Operand::Scalar(v)) => Some(*v),
        _ => None,
    }
}

fn fold_mult(stack: &mut Vec<Op>) {
    if stack.len() < 2 {
        // Malformed stack; leave it for evaluate() to report.
        stack.push(Op::Mult);
        return;
    }
    let (a, b) = match (stack.pop(), stack.pop()) {
        (Some(a), Some(b)) => (a, b),
        _ => return,
    };
    let ca = scalar_of(&a);
    let cb = scalar_of(&b);
    if let (Some(x), Some(y)) = (ca, cb) {
        stack.push(Op::Push(Operand::Scalar(x * y)));
    } else if ca == Some(0.0) || cb == Some(0.0) {
        stack.push(Op::Push(Operand::Scalar(0.0)));
    } else if ca == Some(1.0) {
        stack.push(b);
    } else if cb == Some(1.0) {
        stack.push(a);
    } else {
        stack.push(b);
        stack.push(a);
        stack.push(Op::Mult);
    }
}

fn fold_spline_tcb(stack: &mut Vec<Op>) {
    // Bake the spline only when the count, every knot, and the input are all
    // constants; otherwise restore the stack untouched.
    let baked = (|| {
        // The knot count comes straight off the document; treat anything that
        // is not a small non-negative integer as unfoldable.
        let raw_count = scalar_of(stack.last()?)?;
        if !raw_count.is_finite() || raw_count < 0.0 || raw_count.fract() != 0.0 {
            return None;
        }
        let count = raw_count as usize;
        if stack.len() < count.checked_add(2)? {
            return None;
        }
        let input_idx = stack.len() - 2 - count;
        let input = scalar_of(&stack[input_idx])?;
        let mut keys = Vec::with_capacity(count);
        for op in &stack[input_idx + 1..stack.len() - 1] {
            match op {
                Op::Push(Operand::Knot(k)) => keys.push(TcbKey::from_slice(k).ok()?),
                _ => return None,
            }
        }
        let spline = KochanekBartelsSpline::new(keys).ok()?;
        Some((input_idx, spline.evaluate(input)))
    })();

    match baked {
        Some((from, value)) => {
            stack.truncate(from);
            stack.push(Op::Push(Operand::Scalar(value)));
        }
        None => stack.push(Op::SplineTcb),
    }
}

/// Evaluate every formula targeting one channel: the summed stage over the
/// channel's static value, then the multiplicative stage. An exclusive
/// formula replaces the summed result; the last one wins.
pub fn evaluate_formula_list(
    formulas: &[&Formula],
    static_value: f64,
    read: &mut dyn FnMut(&ChannelKey) -> f64,
) -> Result<f64, DsonError> {
    let mut result = static_value;
    for formula in formulas {
        if formula.stage == Stage::Sum {
            result += formula.evaluate(read)?;
        }
    }
    for formula in formulas {
        if formula.stage == Stage::Exclusive {
            result = formula.evaluate(read)?;
        }
    }
    for formula in formulas {
        if formula.stage == Stage::Mult {
            result *= formula.evaluate(read)?;
        }
    }
    Ok(result)
}
