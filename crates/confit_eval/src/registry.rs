//! The builtin function boundary.
//!
//! Builtins are opaque to the engine: they take evaluated argument values and
//! return either a value or a bottom, and their results re-enter unification
//! exactly like any other conjunct result. A registry is populated before any
//! evaluation begins and shared read-only between evaluation contexts; the
//! process-wide default registry is initialized once behind a `Lazy`.

use confit_adt::{Bottom, Value};
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// An opaque builtin: evaluated arguments in, value or failure out.
pub type BuiltinFn = fn(&[Value]) -> Result<Value, Bottom>;

/// Read-only name table of builtin functions.
#[derive(Default)]
pub struct BuiltinRegistry {
    entries: FxHashMap<String, BuiltinFn>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a builtin. Later registrations shadow earlier ones; callers
    /// are expected to finish registration before handing the registry to an
    /// evaluation context.
    pub fn register(&mut self, name: impl Into<String>, f: BuiltinFn) {
        self.entries.insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<BuiltinFn> {
        self.entries.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for BuiltinRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

fn builtin_len(args: &[Value]) -> Result<Value, Bottom> {
    match args {
        [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
        [Value::Bytes(b)] => Ok(Value::Int(b.len() as i64)),
        [other] => Err(Bottom::eval(format!("len: unsupported argument {other}"))),
        _ => Err(Bottom::eval("len: expected exactly one argument")),
    }
}

fn builtin_contains(args: &[Value]) -> Result<Value, Bottom> {
    match args {
        [Value::Str(haystack), Value::Str(needle)] => {
            Ok(Value::Bool(haystack.contains(needle.as_str())))
        }
        _ => Err(Bottom::eval("contains: expected two string arguments")),
    }
}

static DEFAULT: Lazy<Arc<BuiltinRegistry>> = Lazy::new(|| {
    let mut registry = BuiltinRegistry::new();
    registry.register("len", builtin_len);
    registry.register("contains", builtin_contains);
    Arc::new(registry)
});

/// The process-wide default registry, populated exactly once at startup.
pub fn default_registry() -> Arc<BuiltinRegistry> {
    DEFAULT.clone()
}

#[cfg(test)]
mod tests {
    use super::{default_registry, BuiltinRegistry};
    use confit_adt::{Bottom, Value};

    #[test]
    fn default_registry_resolves_len() {
        let registry = default_registry();
        let f = registry.get("len").expect("len registered");
        assert_eq!(f(&[Value::Str("abc".into())]), Ok(Value::Int(3)));
    }

    #[test]
    fn contains_checks_membership() {
        let registry = default_registry();
        let f = registry.get("contains").expect("contains registered");
        assert_eq!(
            f(&[Value::Str("hello".into()), Value::Str("ell".into())]),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn unknown_arguments_fail_as_bottom() {
        let registry = default_registry();
        let f = registry.get("len").expect("len registered");
        let err = f(&[Value::Int(3)]).unwrap_err();
        assert_eq!(err.code, confit_adt::ErrorCode::Eval);
        let _ = Bottom::eval("unused");
    }

    #[test]
    fn custom_registrations_shadow() {
        let mut registry = BuiltinRegistry::new();
        registry.register("len", |_| Ok(Value::Int(42)));
        let f = registry.get("len").expect("len registered");
        assert_eq!(f(&[]), Ok(Value::Int(42)));
    }
}
