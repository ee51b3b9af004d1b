//! Evaluated values.
//!
//! `Value` is the closed sum type every engine operation matches on
//! exhaustively. Composite values (`Struct`, `List`) point at their vertex in
//! the arena rather than owning their fields; everything else is self
//! contained.

use crate::errors::Bottom;
use crate::expr::BoundOp;
use crate::kind::Kind;
use crate::vertex::VertexId;

/// One branch of an unresolved disjunction value.
#[derive(Debug, Clone, PartialEq)]
pub struct DisjunctBranch {
    pub value: Value,
    pub default: bool,
}

impl DisjunctBranch {
    pub fn new(value: Value, default: bool) -> Self {
        Self { value, default }
    }
}

/// An evaluated (possibly still partial) value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bottom(Bottom),
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// A type constraint: permits any value of the given kind.
    Type(Kind),
    /// A scalar bound constraint, e.g. `>=3`.
    Bound { op: BoundOp, bound: Box<Value> },
    /// An irreducible conjunction of constraints, e.g. `>1 & <10`.
    Conjunction(Vec<Value>),
    /// An unresolved disjunction over evaluated branches.
    Disjunction(Vec<DisjunctBranch>),
    Struct(VertexId),
    List(VertexId),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Bottom(_) => Kind::BOTTOM,
            Value::Null => Kind::NULL,
            Value::Bool(_) => Kind::BOOL,
            Value::Int(_) => Kind::INT,
            Value::Float(_) => Kind::FLOAT,
            Value::Str(_) => Kind::STRING,
            Value::Bytes(_) => Kind::BYTES,
            Value::Type(kind) => *kind,
            Value::Bound { bound, .. } => match bound.as_ref() {
                Value::Int(_) | Value::Float(_) => Kind::NUMBER,
                Value::Str(_) => Kind::STRING,
                Value::Bytes(_) => Kind::BYTES,
                _ => Kind::TOP,
            },
            Value::Conjunction(members) => members
                .iter()
                .fold(Kind::TOP, |acc, member| acc.intersect(member.kind())),
            Value::Disjunction(branches) => branches
                .iter()
                .fold(Kind::BOTTOM, |acc, branch| acc.union(branch.value.kind())),
            Value::Struct(_) => Kind::STRUCT,
            Value::List(_) => Kind::LIST,
        }
    }

    /// Whether this value has no remaining unresolved choice. Composite
    /// values are concrete at this level; their fields are checked by the
    /// validator walk.
    pub fn is_concrete(&self) -> bool {
        match self {
            Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Bytes(_)
            | Value::Struct(_)
            | Value::List(_) => true,
            Value::Bottom(_)
            | Value::Type(_)
            | Value::Bound { .. }
            | Value::Conjunction(_) => false,
            Value::Disjunction(_) => false,
        }
    }

    pub fn as_bottom(&self) -> Option<&Bottom> {
        match self {
            Value::Bottom(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Value::Bottom(_))
    }

    /// Resolves an unresolved disjunction to its default when exactly one
    /// structurally distinct default branch survives. Other values pass
    /// through unchanged.
    pub fn default(&self) -> &Value {
        if let Value::Disjunction(branches) = self {
            let mut defaults = branches.iter().filter(|branch| branch.default);
            if let Some(first) = defaults.next() {
                if defaults.all(|branch| branch.value == first.value) {
                    return &first.value;
                }
            }
        }
        self
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bottom(b) => write!(f, "_|_({})", b.code),
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "'{} bytes'", v.len()),
            Value::Type(kind) => write!(f, "{kind}"),
            Value::Bound { op, bound } => write!(f, "{}{bound}", op.symbol()),
            Value::Conjunction(members) => {
                let mut first = true;
                for member in members {
                    if !first {
                        write!(f, " & ")?;
                    }
                    write!(f, "{member}")?;
                    first = false;
                }
                Ok(())
            }
            Value::Disjunction(branches) => {
                let mut first = true;
                for branch in branches {
                    if !first {
                        write!(f, " | ")?;
                    }
                    if branch.default {
                        write!(f, "*")?;
                    }
                    write!(f, "{}", branch.value)?;
                    first = false;
                }
                Ok(())
            }
            Value::Struct(_) => write!(f, "{{...}}"),
            Value::List(_) => write!(f, "[...]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DisjunctBranch, Value};
    use crate::errors::Bottom;
    use crate::kind::Kind;

    #[test]
    fn concreteness() {
        assert!(Value::Int(1).is_concrete());
        assert!(Value::Str("a".into()).is_concrete());
        assert!(!Value::Type(Kind::INT).is_concrete());
        assert!(!Value::Bottom(Bottom::eval("boom")).is_concrete());
    }

    #[test]
    fn single_default_resolves() {
        let disjunction = Value::Disjunction(vec![
            DisjunctBranch::new(Value::Int(1), true),
            DisjunctBranch::new(Value::Int(2), false),
        ]);
        assert_eq!(disjunction.default(), &Value::Int(1));
    }

    #[test]
    fn ambiguous_defaults_stay_unresolved() {
        let disjunction = Value::Disjunction(vec![
            DisjunctBranch::new(Value::Int(1), true),
            DisjunctBranch::new(Value::Int(2), true),
        ]);
        assert!(matches!(disjunction.default(), Value::Disjunction(_)));
    }

    #[test]
    fn duplicate_defaults_collapse() {
        let disjunction = Value::Disjunction(vec![
            DisjunctBranch::new(Value::Int(1), true),
            DisjunctBranch::new(Value::Int(1), true),
        ]);
        assert_eq!(disjunction.default(), &Value::Int(1));
    }

    #[test]
    fn disjunction_kind_is_union_of_branches() {
        let disjunction = Value::Disjunction(vec![
            DisjunctBranch::new(Value::Int(1), false),
            DisjunctBranch::new(Value::Str("a".into()), false),
        ]);
        assert_eq!(disjunction.kind(), Kind::INT.union(Kind::STRING));
    }
}
