//! Kind lattice for confit values.
//!
//! A `Kind` is a bit set over the base value categories. Type values such as
//! `int` or `string` are represented as kinds, and unifying a value with a
//! type intersects the value's kind with it. The empty intersection is the
//! bottom of the lattice and signals a structural conflict.

use serde::{Deserialize, Serialize};

/// Bit set of base value categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Kind(u16);

impl Kind {
    pub const BOTTOM: Kind = Kind(0);
    pub const NULL: Kind = Kind(1 << 0);
    pub const BOOL: Kind = Kind(1 << 1);
    pub const INT: Kind = Kind(1 << 2);
    pub const FLOAT: Kind = Kind(1 << 3);
    pub const STRING: Kind = Kind(1 << 4);
    pub const BYTES: Kind = Kind(1 << 5);
    pub const STRUCT: Kind = Kind(1 << 6);
    pub const LIST: Kind = Kind(1 << 7);

    pub const NUMBER: Kind = Kind(Self::INT.0 | Self::FLOAT.0);
    pub const SCALAR: Kind =
        Kind(Self::NULL.0 | Self::BOOL.0 | Self::NUMBER.0 | Self::STRING.0 | Self::BYTES.0);
    pub const TOP: Kind = Kind(Self::SCALAR.0 | Self::STRUCT.0 | Self::LIST.0);

    /// Lattice meet: the categories permitted by both operands.
    pub fn intersect(self, other: Kind) -> Kind {
        Kind(self.0 & other.0)
    }

    pub fn union(self, other: Kind) -> Kind {
        Kind(self.0 | other.0)
    }

    pub fn is_bottom(self) -> bool {
        self.0 == 0
    }

    pub fn is_top(self) -> bool {
        self == Self::TOP
    }

    /// Whether every category of `other` is also permitted by `self`.
    pub fn accepts(self, other: Kind) -> bool {
        self.0 & other.0 == other.0
    }

    /// A kind is concrete when it names exactly one non-composite category.
    /// Composite kinds are concrete only through their vertex structure.
    pub fn is_single(self) -> bool {
        self.0 != 0 && self.0 & (self.0 - 1) == 0
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_bottom() {
            return write!(f, "_|_");
        }
        if self.is_top() {
            return write!(f, "_");
        }
        if *self == Self::NUMBER {
            return write!(f, "number");
        }
        let names = [
            (Self::NULL, "null"),
            (Self::BOOL, "bool"),
            (Self::INT, "int"),
            (Self::FLOAT, "float"),
            (Self::STRING, "string"),
            (Self::BYTES, "bytes"),
            (Self::STRUCT, "struct"),
            (Self::LIST, "list"),
        ];
        let mut first = true;
        for (kind, name) in names {
            if self.accepts(kind) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Kind;

    #[test]
    fn intersection_narrows() {
        assert_eq!(Kind::NUMBER.intersect(Kind::INT), Kind::INT);
        assert!(Kind::STRING.intersect(Kind::INT).is_bottom());
        assert_eq!(Kind::TOP.intersect(Kind::LIST), Kind::LIST);
    }

    #[test]
    fn single_kinds() {
        assert!(Kind::INT.is_single());
        assert!(!Kind::NUMBER.is_single());
        assert!(!Kind::BOTTOM.is_single());
    }

    #[test]
    fn display_names() {
        assert_eq!(Kind::NUMBER.to_string(), "number");
        assert_eq!(Kind::INT.union(Kind::STRING).to_string(), "int|string");
        assert_eq!(Kind::BOTTOM.to_string(), "_|_");
    }
}
