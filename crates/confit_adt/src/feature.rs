//! Field labels and arc classifications.
//!
//! A `Feature` addresses one arc within its parent vertex: a regular
//! identifier or string label, a list index, a definition, or a hidden field.
//! Definitions and hidden fields participate in unification but are excluded
//! from concrete output and from concreteness checking.

use serde::{Deserialize, Serialize};

/// Label of an arc within its parent vertex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// Regular identifier label (`a: ...`).
    Ident(String),
    /// Regular quoted-string label (`"a b": ...`).
    Str(String),
    /// List element index.
    Index(u64),
    /// Definition label (`#a: ...`); implies a closed struct scope.
    Def(String),
    /// Hidden label (`_a: ...`); excluded from output.
    Hidden(String),
}

impl Feature {
    pub fn ident(name: impl Into<String>) -> Self {
        Feature::Ident(name.into())
    }

    pub fn string(name: impl Into<String>) -> Self {
        Feature::Str(name.into())
    }

    pub fn def(name: impl Into<String>) -> Self {
        Feature::Def(name.into())
    }

    pub fn hidden(name: impl Into<String>) -> Self {
        Feature::Hidden(name.into())
    }

    /// Regular features are data: they count for output, concreteness, and
    /// closedness checking.
    pub fn is_regular(&self) -> bool {
        matches!(self, Feature::Ident(_) | Feature::Str(_) | Feature::Index(_))
    }

    pub fn is_def(&self) -> bool {
        matches!(self, Feature::Def(_))
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, Feature::Hidden(_))
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Feature::Index(_))
    }

    /// The identifier this feature binds in lexical scope, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Feature::Ident(n) | Feature::Str(n) | Feature::Def(n) | Feature::Hidden(n) => Some(n),
            Feature::Index(_) => None,
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feature::Ident(n) => write!(f, "{n}"),
            Feature::Str(n) => write!(f, "{n:?}"),
            Feature::Index(i) => write!(f, "[{i}]"),
            Feature::Def(n) => write!(f, "#{n}"),
            Feature::Hidden(n) => write!(f, "_{n}"),
        }
    }
}

/// Presence classification of an arc.
///
/// The order forms a lattice: unifying two arcs for the same feature keeps
/// the strongest presence requirement, where `Regular` (present) beats
/// `Required` (must be made present) beats `Optional` (may be present).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ArcType {
    /// The field is present.
    Regular,
    /// The field must be present in the final value (`a!: ...`).
    Required,
    /// The field constrains the value only if present (`a?: ...`).
    Optional,
}

impl ArcType {
    /// Combines the presence requirements of two conjuncts for one arc.
    pub fn merge(self, other: ArcType) -> ArcType {
        self.min(other)
    }
}

#[cfg(test)]
mod tests {
    use super::{ArcType, Feature};

    #[test]
    fn arc_type_lattice() {
        assert_eq!(ArcType::Regular.merge(ArcType::Optional), ArcType::Regular);
        assert_eq!(ArcType::Required.merge(ArcType::Optional), ArcType::Required);
        assert_eq!(ArcType::Optional.merge(ArcType::Optional), ArcType::Optional);
        assert_eq!(ArcType::Required.merge(ArcType::Regular), ArcType::Regular);
    }

    #[test]
    fn feature_classification() {
        assert!(Feature::ident("a").is_regular());
        assert!(Feature::Index(0).is_regular());
        assert!(Feature::def("Schema").is_def());
        assert!(!Feature::hidden("internal").is_regular());
    }

    #[test]
    fn display_forms() {
        assert_eq!(Feature::ident("a").to_string(), "a");
        assert_eq!(Feature::def("S").to_string(), "#S");
        assert_eq!(Feature::Index(3).to_string(), "[3]");
    }
}
