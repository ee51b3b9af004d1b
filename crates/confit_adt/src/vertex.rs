//! The evaluated value graph.
//!
//! Vertices live in an arena and are addressed by `VertexId`; parent links
//! and arcs are ids, which is what lets the graph hold mutual references
//! without reference-counted cycles. A vertex is mutated only by the engine:
//! conjuncts may be appended until it finalizes, after which it is immutable.

use crate::environment::EnvId;
use crate::errors::Bottom;
use crate::expr::{Disjunct, Expr};
use crate::feature::{ArcType, Feature};
use crate::span::Span;
use crate::value::Value;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::sync::Arc;

/// Stable handle of a vertex within its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexId(u32);

impl VertexId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }
}

/// Evaluation state of a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexStatus {
    /// No conjunct has been processed yet.
    Unprocessed,
    /// On the evaluation stack right now.
    Evaluating,
    /// Evaluation stalled on an unresolved dependency; retryable.
    Partial,
    /// All conjuncts merged; immutable from here on.
    Finalized,
}

/// One unevaluated contribution to a vertex: an expression paired with the
/// lexical environment captured at its definition site.
#[derive(Debug, Clone)]
pub struct Conjunct {
    pub expr: Arc<Expr>,
    pub env: EnvId,
    pub span: Option<Span>,
}

impl Conjunct {
    pub fn new(expr: Arc<Expr>, env: EnvId) -> Self {
        Self {
            expr,
            env,
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

/// A disjunction conjunct waiting for branch resolution. Kept on the vertex
/// so a stalled (`Partial`) vertex can redo branch selection when it is
/// re-entered after more of the graph has resolved.
#[derive(Debug, Clone)]
pub struct PendingDisjunction {
    pub branches: Vec<Disjunct>,
    pub env: EnvId,
    pub span: Option<Span>,
}

/// A node in the evaluated value graph.
#[derive(Debug)]
pub struct Vertex {
    pub label: Feature,
    pub parent: Option<VertexId>,
    pub arc_type: ArcType,
    /// Child arcs in insertion order. Order is significant for output and
    /// iteration, not for equality.
    pub arcs: Vec<VertexId>,
    /// Append-only until finalized; the engine consumes entries by index so
    /// comprehensions can add more mid-evaluation.
    pub conjuncts: SmallVec<[Conjunct; 4]>,
    /// Number of leading conjuncts already consumed.
    pub processed: usize,
    /// Conjuncts whose evaluation stalled, with the blocking failure.
    pub postponed: Vec<(Conjunct, Bottom)>,
    /// Disjunction conjuncts awaiting branch resolution.
    pub disjunctions: Vec<PendingDisjunction>,
    pub status: VertexStatus,
    /// Accumulated non-composite result (scalar, bound set, bottom, ...).
    pub value: Option<Value>,
    /// Set once any struct literal merged into this vertex.
    pub is_struct: bool,
    /// Set once any list literal merged into this vertex.
    pub is_list: bool,
    pub closed: bool,
    /// Intersection of the declared feature sets of all closed operands;
    /// `None` while the vertex is open.
    pub allowed: Option<FxHashSet<Feature>>,
    /// Fixed element count required by closed list operands.
    pub list_len: Option<usize>,
    /// Open-list tail constraints: elements at or past the index unify with
    /// the conjunct.
    pub ellipses: Vec<(usize, Conjunct)>,
}

impl Vertex {
    pub fn new(label: Feature) -> Self {
        Self {
            label,
            parent: None,
            arc_type: ArcType::Regular,
            arcs: Vec::new(),
            conjuncts: SmallVec::new(),
            processed: 0,
            postponed: Vec::new(),
            disjunctions: Vec::new(),
            status: VertexStatus::Unprocessed,
            value: None,
            is_struct: false,
            is_list: false,
            closed: false,
            allowed: None,
            list_len: None,
            ellipses: Vec::new(),
        }
    }

    /// Attaches one more conjunct. Permitted until the vertex finalizes;
    /// attaching later is a translator bug, not an evaluation failure.
    pub fn add_conjunct(&mut self, conjunct: Conjunct) {
        debug_assert!(
            self.status != VertexStatus::Finalized,
            "conjunct added to finalized vertex"
        );
        self.conjuncts.push(conjunct);
    }

    pub fn status(&self) -> VertexStatus {
        self.status
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.status == VertexStatus::Finalized
    }

    /// The failure recorded on this vertex, if its result is a bottom.
    pub fn bottom(&self) -> Option<&Bottom> {
        self.value.as_ref().and_then(Value::as_bottom)
    }

    /// Whether this vertex is a composite (struct or list) node.
    pub fn is_composite(&self) -> bool {
        self.is_struct || self.is_list || !self.arcs.is_empty()
    }

    /// Narrows the allowed-feature set with one more closed operand.
    pub fn restrict(&mut self, features: FxHashSet<Feature>) {
        self.closed = true;
        self.allowed = Some(match self.allowed.take() {
            None => features,
            Some(current) => current.intersection(&features).cloned().collect(),
        });
    }

    /// Whether a regular feature passes this vertex's closedness restriction.
    pub fn accepts(&self, feature: &Feature) -> bool {
        if !self.closed || !feature.is_regular() {
            return true;
        }
        match &self.allowed {
            Some(allowed) => allowed.contains(feature),
            None => true,
        }
    }
}

/// Arena owning every vertex of one evaluation run.
#[derive(Debug, Default)]
pub struct VertexArena {
    nodes: Vec<Vertex>,
}

impl VertexArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, vertex: Vertex) -> VertexId {
        let id = VertexId(self.nodes.len() as u32);
        self.nodes.push(vertex);
        id
    }

    /// Creates an empty root vertex.
    pub fn new_root(&mut self) -> VertexId {
        self.add(Vertex::new(Feature::ident("_root")))
    }

    /// Creates a child vertex attached under `parent`.
    pub fn new_arc(&mut self, parent: VertexId, label: Feature, arc_type: ArcType) -> VertexId {
        let mut vertex = Vertex::new(label);
        vertex.parent = Some(parent);
        vertex.arc_type = arc_type;
        let id = self.add(vertex);
        self.get_mut(parent).arcs.push(id);
        id
    }

    pub fn get(&self, id: VertexId) -> &Vertex {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.nodes[id.0 as usize]
    }

    /// Finds the arc of `vertex` labelled `feature`, in insertion order.
    pub fn lookup_arc(&self, vertex: VertexId, feature: &Feature) -> Option<VertexId> {
        self.get(vertex)
            .arcs
            .iter()
            .copied()
            .find(|&arc| &self.get(arc).label == feature)
    }

    /// Dotted path of a vertex from the root, for error reports.
    pub fn path_of(&self, mut id: VertexId) -> String {
        let mut parts = Vec::new();
        loop {
            let vertex = self.get(id);
            match vertex.parent {
                Some(parent) => {
                    parts.push(vertex.label.clone());
                    id = parent;
                }
                None => break,
            }
        }
        let mut out = String::new();
        for feature in parts.iter().rev() {
            match feature {
                Feature::Index(_) => out.push_str(&feature.to_string()),
                _ => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(&feature.to_string());
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Vertex, VertexArena, VertexStatus};
    use crate::feature::{ArcType, Feature};
    use rustc_hash::FxHashSet;

    #[test]
    fn arcs_keep_insertion_order() {
        let mut arena = VertexArena::new();
        let root = arena.new_root();
        arena.new_arc(root, Feature::ident("b"), ArcType::Regular);
        arena.new_arc(root, Feature::ident("a"), ArcType::Regular);
        let labels: Vec<String> = arena
            .get(root)
            .arcs
            .iter()
            .map(|&arc| arena.get(arc).label.to_string())
            .collect();
        assert_eq!(labels, ["b", "a"]);
    }

    #[test]
    fn lookup_by_feature() {
        let mut arena = VertexArena::new();
        let root = arena.new_root();
        let child = arena.new_arc(root, Feature::ident("x"), ArcType::Required);
        assert_eq!(arena.lookup_arc(root, &Feature::ident("x")), Some(child));
        assert_eq!(arena.lookup_arc(root, &Feature::ident("y")), None);
        assert_eq!(arena.get(child).arc_type, ArcType::Required);
    }

    #[test]
    fn paths_use_dots_and_indices() {
        let mut arena = VertexArena::new();
        let root = arena.new_root();
        let a = arena.new_arc(root, Feature::ident("a"), ArcType::Regular);
        let elem = arena.new_arc(a, Feature::Index(0), ArcType::Regular);
        let leaf = arena.new_arc(elem, Feature::ident("b"), ArcType::Regular);
        assert_eq!(arena.path_of(leaf), "a[0].b");
    }

    #[test]
    fn closedness_restriction_intersects() {
        let mut vertex = Vertex::new(Feature::ident("v"));
        let mut first = FxHashSet::default();
        first.insert(Feature::ident("a"));
        first.insert(Feature::ident("b"));
        let mut second = FxHashSet::default();
        second.insert(Feature::ident("b"));
        second.insert(Feature::ident("c"));
        vertex.restrict(first);
        vertex.restrict(second);
        assert!(vertex.accepts(&Feature::ident("b")));
        assert!(!vertex.accepts(&Feature::ident("a")));
        assert!(vertex.accepts(&Feature::def("D")));
    }

    #[test]
    fn fresh_vertex_is_unprocessed() {
        let vertex = Vertex::new(Feature::ident("v"));
        assert_eq!(vertex.status(), VertexStatus::Unprocessed);
        assert!(vertex.value().is_none());
    }
}
