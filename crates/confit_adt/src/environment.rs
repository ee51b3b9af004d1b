//! Lexical environments.
//!
//! An environment is one frame of the scope chain a conjunct was captured in:
//! a parent link, the vertex whose fields are in scope, and explicit bindings
//! (`let` values, comprehension iteration variables). Frames live in an arena
//! and are addressed by `EnvId`; parent links are ids, never owned pointers,
//! so shared and cyclic scope shapes cost nothing.

use crate::expr::Expr;
use crate::value::Value;
use crate::vertex::VertexId;
use std::sync::Arc;

/// Stable handle of an environment frame within its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(u32);

impl EnvId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }
}

/// What an identifier resolves to inside a frame.
#[derive(Debug, Clone)]
pub enum Binding {
    /// An already-evaluated value (comprehension iteration variables).
    Value(Value),
    /// A deferred vertex; resolved on demand.
    Vertex(VertexId),
    /// A lazily evaluated expression in its own captured environment
    /// (`let` bindings).
    Lazy { expr: Arc<Expr>, env: EnvId },
    /// A name that must not resolve here: comprehension clause bindings seen
    /// from an `else` body. Referencing one is an evaluation error rather
    /// than a silent fallthrough to an outer shadowed name.
    Forbidden,
}

/// One frame of the lexical scope chain.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub parent: Option<EnvId>,
    /// Vertex whose arcs are visible as names in this frame.
    pub vertex: Option<VertexId>,
    pub bindings: Vec<(String, Binding)>,
}

impl Environment {
    pub fn new(parent: Option<EnvId>, vertex: Option<VertexId>) -> Self {
        Self {
            parent,
            vertex,
            bindings: Vec::new(),
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, binding: Binding) {
        self.bindings.push((name.into(), binding));
    }

    /// Innermost binding for `name` within this frame only.
    pub fn local(&self, name: &str) -> Option<&Binding> {
        self.bindings
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, binding)| binding)
    }
}

/// Arena of environment frames.
#[derive(Debug, Default)]
pub struct EnvArena {
    frames: Vec<Environment>,
}

impl EnvArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, env: Environment) -> EnvId {
        let id = EnvId(self.frames.len() as u32);
        self.frames.push(env);
        id
    }

    pub fn get(&self, id: EnvId) -> &Environment {
        &self.frames[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: EnvId) -> &mut Environment {
        &mut self.frames[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Binding, EnvArena, Environment};
    use crate::value::Value;

    #[test]
    fn innermost_binding_shadows() {
        let mut env = Environment::new(None, None);
        env.bind("x", Binding::Value(Value::Int(1)));
        env.bind("x", Binding::Value(Value::Int(2)));
        match env.local("x") {
            Some(Binding::Value(Value::Int(2))) => {}
            other => panic!("unexpected binding: {other:?}"),
        }
    }

    #[test]
    fn arena_hands_out_sequential_ids() {
        let mut arena = EnvArena::new();
        let a = arena.add(Environment::default());
        let b = arena.add(Environment::new(Some(a), None));
        assert_eq!(a.to_raw(), 0);
        assert_eq!(b.to_raw(), 1);
        assert_eq!(arena.get(b).parent, Some(a));
    }
}
