//! Exporting a finalized graph as plain data.
//!
//! Export is the strictest consumer of a graph: every reachable regular
//! field must be concrete. Definitions, hidden fields, optional constraints
//! and `let` bindings are not data and do not appear in the output.

use crate::context::OpContext;
use confit_adt::{ArcType, Bottom, Value, VertexId};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A fully concrete exported value, independent of the arena it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Exported {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Fields in declaration order.
    Struct(Vec<(String, Exported)>),
    List(Vec<Exported>),
}

impl Serialize for Exported {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Exported::Null => serializer.serialize_unit(),
            Exported::Bool(v) => serializer.serialize_bool(*v),
            Exported::Int(v) => serializer.serialize_i64(*v),
            Exported::Float(v) => serializer.serialize_f64(*v),
            Exported::Str(v) => serializer.serialize_str(v),
            Exported::Bytes(v) => serializer.serialize_bytes(v),
            Exported::Struct(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
            Exported::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// Exports the finalized subtree under `vertex`. Fails with the underlying
/// bottom if any reachable regular field is a failure or not concrete.
pub fn export(ctx: &OpContext, vertex: VertexId) -> Result<Exported, Bottom> {
    let vx = ctx.vertices.get(vertex);
    if let Some(bottom) = vx.bottom() {
        return Err(bottom.clone());
    }
    if vx.is_composite() {
        if vx.is_list {
            let mut items = Vec::new();
            for &arc in &vx.arcs {
                items.push(export(ctx, arc)?);
            }
            return Ok(Exported::List(items));
        }
        let mut fields = Vec::new();
        for &arc in &vx.arcs {
            let ax = ctx.vertices.get(arc);
            if ax.arc_type == ArcType::Optional || !ax.label.is_regular() {
                continue;
            }
            let Some(name) = ax.label.name() else {
                continue;
            };
            fields.push((name.to_string(), export(ctx, arc)?));
        }
        return Ok(Exported::Struct(fields));
    }
    match vx.value().map(Value::default) {
        Some(Value::Null) => Ok(Exported::Null),
        Some(Value::Bool(v)) => Ok(Exported::Bool(*v)),
        Some(Value::Int(v)) => Ok(Exported::Int(*v)),
        Some(Value::Float(v)) => Ok(Exported::Float(*v)),
        Some(Value::Str(v)) => Ok(Exported::Str(v.clone())),
        Some(Value::Bytes(v)) => Ok(Exported::Bytes(v.clone())),
        Some(other) => Err(Bottom::incomplete(format!("non-concrete value {other}"))
            .with_path(ctx.path_of(vertex))),
        None => {
            Err(Bottom::incomplete("unconstrained value").with_path(ctx.path_of(vertex)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{export, Exported};
    use crate::context::OpContext;
    use confit_adt::{
        ArcType, Conjunct, Decl, Disjunct, Expr, Feature, Kind, ListLit, StructLit,
    };

    fn field(name: &str, value: std::sync::Arc<Expr>) -> Decl {
        Decl::Field {
            label: Feature::ident(name),
            arc: ArcType::Regular,
            value,
        }
    }

    #[test]
    fn exports_nested_data_as_json() {
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let inner = StructLit::new(vec![field("port", Expr::int(8080))]);
        let lit = StructLit::new(vec![
            field("name", Expr::str("api")),
            field("server", Expr::struct_lit(inner)),
            field(
                "tags",
                Expr::list_lit(ListLit::new(vec![Expr::str("a"), Expr::str("b")])),
            ),
        ]);
        ctx.add_conjunct(root, Conjunct::new(Expr::struct_lit(lit), env));
        ctx.finalize_tree(root).expect("finalize");
        let exported = export(&ctx, root).expect("export");
        let json = serde_json::to_value(&exported).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "name": "api",
                "server": {"port": 8080},
                "tags": ["a", "b"],
            })
        );
    }

    #[test]
    fn definitions_and_optional_fields_are_omitted() {
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let schema = StructLit::new(vec![field("port", Expr::typ(Kind::INT))]);
        let lit = StructLit::new(vec![
            Decl::Field {
                label: Feature::def("Schema"),
                arc: ArcType::Regular,
                value: Expr::struct_lit(schema),
            },
            Decl::Field {
                label: Feature::ident("maybe"),
                arc: ArcType::Optional,
                value: Expr::typ(Kind::INT),
            },
            field("a", Expr::int(1)),
        ]);
        ctx.add_conjunct(root, Conjunct::new(Expr::struct_lit(lit), env));
        ctx.finalize_tree(root).expect("finalize");
        let exported = export(&ctx, root).expect("export");
        assert_eq!(exported, Exported::Struct(vec![("a".into(), Exported::Int(1))]));
    }

    #[test]
    fn default_is_taken_for_unresolved_disjunctions() {
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let lit = StructLit::new(vec![field(
            "mode",
            Expr::disjunction(vec![
                Disjunct::default(Expr::str("fast")),
                Disjunct::new(Expr::str("safe")),
            ]),
        )]);
        ctx.add_conjunct(root, Conjunct::new(Expr::struct_lit(lit), env));
        ctx.finalize_tree(root).expect("finalize");
        let exported = export(&ctx, root).expect("export");
        assert_eq!(
            exported,
            Exported::Struct(vec![("mode".into(), Exported::Str("fast".into()))])
        );
    }

    #[test]
    fn non_concrete_field_blocks_export() {
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        let lit = StructLit::new(vec![field("a", Expr::typ(Kind::INT))]);
        ctx.add_conjunct(root, Conjunct::new(Expr::struct_lit(lit), env));
        ctx.finalize_tree(root).expect("finalize");
        let err = export(&ctx, root).expect_err("must fail");
        assert_eq!(err.code, confit_adt::ErrorCode::Incomplete);
    }
}
