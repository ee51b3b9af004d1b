//! Value-level merge algebra.
//!
//! These are the leaf rules of unification: how two already-evaluated,
//! non-composite values combine. Struct and list operands are merged arc-wise
//! by the engine, not here; what this module decides is scalar conflicts,
//! kind intersection, bound intersection (including empty ranges), and
//! distribution of conjunction over disjunction branches.

use confit_adt::{Bottom, BoundOp, DisjunctBranch, Op, Value};
use std::cmp::Ordering;

/// Unifies two values. Conflicts come back as `Value::Bottom`; constraints
/// that cannot reduce come back as `Value::Conjunction`.
pub fn merge_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Bottom(x), Value::Bottom(y)) => Value::Bottom(x.clone().combine(y.clone())),
        (Value::Bottom(x), _) | (_, Value::Bottom(x)) => Value::Bottom(x.clone()),
        (Value::Disjunction(branches), other) | (other, Value::Disjunction(branches)) => {
            distribute(branches, other)
        }
        _ => merge_flat(a, b),
    }
}

/// Conjunction of a disjunction with an operand distributes over every
/// branch: `(A|B) & C == (A&C)|(B&C)`. Failed branches are pruned, never
/// short-circuited. Defaults follow the recombination law: a non-disjunction
/// operand preserves marks, a disjunction operand ANDs them.
fn distribute(branches: &[DisjunctBranch], operand: &Value) -> Value {
    let mut out: Vec<DisjunctBranch> = Vec::new();
    let mut errors: Option<Bottom> = None;
    for branch in branches {
        match merge_values(&branch.value, operand) {
            Value::Bottom(b) if !b.is_incomplete() => {
                errors = Some(Bottom::combine_opt(errors, b));
            }
            Value::Disjunction(subs) => {
                for sub in subs {
                    push_branch(&mut out, sub.value, branch.default && sub.default);
                }
            }
            other => push_branch(&mut out, other, branch.default),
        }
    }
    match out.len() {
        0 => Value::Bottom(
            errors.unwrap_or_else(|| Bottom::eval("empty disjunction: all branches failed")),
        ),
        1 => out.into_iter().next().map(|b| b.value).unwrap_or(Value::Null),
        _ => Value::Disjunction(out),
    }
}

fn push_branch(out: &mut Vec<DisjunctBranch>, value: Value, default: bool) {
    if let Some(existing) = out.iter_mut().find(|existing| existing.value == value) {
        existing.default |= default;
    } else {
        out.push(DisjunctBranch::new(value, default));
    }
}

fn merge_flat(a: &Value, b: &Value) -> Value {
    let mut members: Vec<Value> = Vec::new();
    let result = collect(&mut members, a).and_then(|_| collect(&mut members, b));
    if let Err(bottom) = result {
        return Value::Bottom(bottom);
    }
    match members.len() {
        0 => Value::Bottom(Bottom::eval("empty conjunction")),
        1 => members.into_iter().next().unwrap_or(Value::Null),
        _ => Value::Conjunction(members),
    }
}

fn collect(members: &mut Vec<Value>, value: &Value) -> Result<(), Bottom> {
    match value {
        Value::Conjunction(inner) => {
            for member in inner {
                insert(members, member.clone())?;
            }
            Ok(())
        }
        other => insert(members, other.clone()),
    }
}

/// Inserts one atom into a flattened conjunction, reducing against existing
/// members until a fixpoint.
fn insert(members: &mut Vec<Value>, value: Value) -> Result<(), Bottom> {
    let mut value = value;
    let mut i = 0;
    while i < members.len() {
        match merge_atoms(&members[i], &value) {
            Reduced::One(reduced) => {
                members.remove(i);
                value = reduced;
                i = 0;
            }
            Reduced::Fail(bottom) => return Err(bottom),
            Reduced::Both => i += 1,
        }
    }
    members.push(value);
    Ok(())
}

enum Reduced {
    /// The pair collapses into a single value.
    One(Value),
    /// Irreducible; keep both as conjunction members.
    Both,
    Fail(Bottom),
}

fn conflict(a: &Value, b: &Value) -> Reduced {
    Reduced::Fail(Bottom::eval(format!("conflicting values {a} and {b}")))
}

fn merge_atoms(a: &Value, b: &Value) -> Reduced {
    use Value::*;
    match (a, b) {
        (Null, Null) => Reduced::One(Null),
        (Bool(x), Bool(y)) if x == y => Reduced::One(Bool(*x)),
        (Int(x), Int(y)) if x == y => Reduced::One(Int(*x)),
        (Float(x), Float(y)) if x == y => Reduced::One(Float(*x)),
        (Str(x), Str(y)) if x == y => Reduced::One(Str(x.clone())),
        (Bytes(x), Bytes(y)) if x == y => Reduced::One(Bytes(x.clone())),
        // Cross-kind numeric equality: 1 & 1.0 unifies.
        (Int(i), Float(f)) | (Float(f), Int(i)) if *i as f64 == *f => Reduced::One(Int(*i)),

        (Type(k1), Type(k2)) => {
            let meet = k1.intersect(*k2);
            if meet.is_bottom() {
                conflict(a, b)
            } else {
                Reduced::One(Type(meet))
            }
        }
        (Type(k), other) | (other, Type(k)) if other.is_concrete() => {
            if k.accepts(other.kind()) {
                Reduced::One(other.clone())
            } else {
                conflict(a, b)
            }
        }
        (Type(k), bound @ Bound { .. }) | (bound @ Bound { .. }, Type(k)) => {
            let meet = k.intersect(bound.kind());
            if meet.is_bottom() {
                conflict(a, b)
            } else if meet == bound.kind() {
                // The type adds nothing beyond what the bound already implies.
                Reduced::One(bound.clone())
            } else {
                Reduced::Both
            }
        }

        (Bound { op, bound }, scalar) if scalar.is_concrete() => {
            bound_check(*op, bound, scalar, a, b)
        }
        (scalar, Bound { op, bound }) if scalar.is_concrete() => {
            bound_check(*op, bound, scalar, a, b)
        }
        (
            Bound { op: op1, bound: b1 },
            Bound { op: op2, bound: b2 },
        ) => bound_pair(*op1, b1, *op2, b2, a, b),

        (Struct(w1), Struct(w2)) | (List(w1), List(w2)) if w1 == w2 => Reduced::One(a.clone()),
        // Distinct composites are merged arc-wise by the engine; at the
        // value level they are simply not reducible.
        (Struct(_), Struct(_)) | (List(_), List(_)) => Reduced::Both,

        _ => conflict(a, b),
    }
}

fn bound_check(op: BoundOp, bound: &Value, scalar: &Value, a: &Value, b: &Value) -> Reduced {
    match satisfies(scalar, op, bound) {
        Some(true) => Reduced::One(scalar.clone()),
        Some(false) => Reduced::Fail(Bottom::eval(format!(
            "value {scalar} out of bound {}{bound}",
            op.symbol()
        ))),
        None => conflict(a, b),
    }
}

/// Whether `scalar op bound` holds. `None` when the operands are not
/// comparable.
fn satisfies(scalar: &Value, op: BoundOp, bound: &Value) -> Option<bool> {
    if op == BoundOp::Ne {
        if scalar.kind().intersect(bound.kind()).is_bottom() {
            return None;
        }
        return Some(!scalar_eq(scalar, bound));
    }
    let ordering = cmp_scalars(scalar, bound)?;
    Some(match op {
        BoundOp::Gt => ordering == Ordering::Greater,
        BoundOp::Ge => ordering != Ordering::Less,
        BoundOp::Lt => ordering == Ordering::Less,
        BoundOp::Le => ordering != Ordering::Greater,
        BoundOp::Ne => unreachable!(),
    })
}

fn bound_pair(
    op1: BoundOp,
    b1: &Value,
    op2: BoundOp,
    b2: &Value,
    a: &Value,
    b: &Value,
) -> Reduced {
    if b1.kind().intersect(b2.kind()).is_bottom() {
        return conflict(a, b);
    }
    if op1 == op2 && scalar_eq(b1, b2) {
        return Reduced::One(a.clone());
    }
    match (op1.is_lower(), op2.is_lower(), op1.is_upper(), op2.is_upper()) {
        // Same direction: keep the tighter bound; on equal limits the
        // strict one wins.
        (true, true, _, _) | (_, _, true, true) => {
            let ordering = match cmp_scalars(b1, b2) {
                Some(ordering) => ordering,
                None => return conflict(a, b),
            };
            let tighter_is_greater = op1.is_lower();
            let first_tighter = match ordering {
                Ordering::Equal => op1.is_strict(),
                Ordering::Greater => tighter_is_greater,
                Ordering::Less => !tighter_is_greater,
            };
            Reduced::One(if first_tighter { a.clone() } else { b.clone() })
        }
        // Opposite directions: empty ranges fail, touching inclusive
        // bounds collapse to the single admitted value.
        (true, _, _, true) | (_, true, true, _) => {
            let (lo_op, lo, hi_op, hi) = if op1.is_lower() {
                (op1, b1, op2, b2)
            } else {
                (op2, b2, op1, b1)
            };
            match cmp_scalars(lo, hi) {
                Some(Ordering::Less) => Reduced::Both,
                Some(Ordering::Equal) => {
                    if lo_op.is_strict() || hi_op.is_strict() {
                        Reduced::Fail(Bottom::eval(format!(
                            "incompatible bounds {}{lo} and {}{hi}",
                            lo_op.symbol(),
                            hi_op.symbol()
                        )))
                    } else {
                        Reduced::One(lo.clone())
                    }
                }
                Some(Ordering::Greater) => Reduced::Fail(Bottom::eval(format!(
                    "incompatible bounds {}{lo} and {}{hi}",
                    lo_op.symbol(),
                    hi_op.symbol()
                ))),
                None => conflict(a, b),
            }
        }
        // At least one != exclusion: irreducible but compatible.
        _ => Reduced::Both,
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match cmp_scalars(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

fn cmp_scalars(a: &Value, b: &Value) -> Option<Ordering> {
    use Value::*;
    match (a, b) {
        (Int(x), Int(y)) => Some(x.cmp(y)),
        (Float(x), Float(y)) => x.partial_cmp(y),
        (Int(x), Float(y)) => (*x as f64).partial_cmp(y),
        (Float(x), Int(y)) => x.partial_cmp(&(*y as f64)),
        (Str(x), Str(y)) => Some(x.cmp(y)),
        (Bytes(x), Bytes(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Applies a binary operator to two concrete values.
pub(crate) fn apply_binop(op: Op, a: &Value, b: &Value) -> Value {
    match op {
        Op::Add | Op::Sub | Op::Mul | Op::Div => arith(op, a, b),
        Op::Eq => Value::Bool(scalar_eq(a, b)),
        Op::Ne => Value::Bool(!scalar_eq(a, b)),
        Op::Lt | Op::Le | Op::Gt | Op::Ge => match cmp_scalars(a, b) {
            Some(ordering) => Value::Bool(match op {
                Op::Lt => ordering == Ordering::Less,
                Op::Le => ordering != Ordering::Greater,
                Op::Gt => ordering == Ordering::Greater,
                Op::Ge => ordering != Ordering::Less,
                _ => unreachable!(),
            }),
            None => invalid_operands(op, a, b),
        },
        Op::And | Op::Or => match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => {
                Value::Bool(if op == Op::And { *x && *y } else { *x || *y })
            }
            _ => invalid_operands(op, a, b),
        },
    }
}

fn arith(op: Op, a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            let result = match op {
                Op::Add => x.checked_add(*y),
                Op::Sub => x.checked_sub(*y),
                Op::Mul => x.checked_mul(*y),
                Op::Div => {
                    return if *y == 0 {
                        Value::Bottom(Bottom::eval("division by zero"))
                    } else {
                        Value::Float(*x as f64 / *y as f64)
                    }
                }
                _ => unreachable!(),
            };
            match result {
                Some(value) => Value::Int(value),
                None => Value::Bottom(Bottom::eval(format!(
                    "integer overflow in {a} {} {b}",
                    op.symbol()
                ))),
            }
        }
        (Value::Int(_), Value::Float(_))
        | (Value::Float(_), Value::Int(_))
        | (Value::Float(_), Value::Float(_)) => {
            let (x, y) = (as_f64(a), as_f64(b));
            match op {
                Op::Add => Value::Float(x + y),
                Op::Sub => Value::Float(x - y),
                Op::Mul => Value::Float(x * y),
                Op::Div => {
                    if y == 0.0 {
                        Value::Bottom(Bottom::eval("division by zero"))
                    } else {
                        Value::Float(x / y)
                    }
                }
                _ => unreachable!(),
            }
        }
        (Value::Str(x), Value::Str(y)) if op == Op::Add => Value::Str(format!("{x}{y}")),
        _ => invalid_operands(op, a, b),
    }
}

fn invalid_operands(op: Op, a: &Value, b: &Value) -> Value {
    Value::Bottom(Bottom::eval(format!(
        "invalid operands {a} and {b} to {}",
        op.symbol()
    )))
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(x) => *x as f64,
        Value::Float(x) => *x,
        _ => f64::NAN,
    }
}
