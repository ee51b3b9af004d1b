//! End-to-end scenario: a schema definition, concrete configuration and a
//! comprehension-derived section, driven through evaluate, validate and
//! export.

use confit_adt::{
    ArcType, BoundOp, Clause, Comprehension, Conjunct, Decl, Disjunct, Expr, Feature, Kind,
    ListLit, StructLit,
};
use confit_eval::{export, validate, Config, OpContext};
use std::sync::Arc;

fn field(name: &str, value: Arc<Expr>) -> Decl {
    Decl::Field {
        label: Feature::ident(name),
        arc: ArcType::Regular,
        value,
    }
}

/// #Service: close({ name: string, port: int & >0 & <65536, replicas: *1 | int })
fn service_schema() -> Arc<Expr> {
    Expr::struct_lit(StructLit::closed(vec![
        field("name", Expr::typ(Kind::STRING)),
        field("port", Expr::typ(Kind::INT)),
        field("port", Expr::bound(BoundOp::Gt, Expr::int(0))),
        field("port", Expr::bound(BoundOp::Lt, Expr::int(65536))),
        field(
            "replicas",
            Expr::disjunction(vec![
                Disjunct::default(Expr::int(1)),
                Disjunct::new(Expr::typ(Kind::INT)),
            ]),
        ),
    ]))
}

#[test]
fn schema_and_data_round_trip() {
    let mut ctx = OpContext::new();
    let (root, env) = ctx.new_root();
    let data = Expr::struct_lit(StructLit::new(vec![
        field("name", Expr::str("api")),
        field("port", Expr::int(8080)),
    ]));
    ctx.add_conjunct(root, Conjunct::new(service_schema(), env));
    ctx.add_conjunct(root, Conjunct::new(data, env));
    ctx.finalize_tree(root).expect("finalize");

    let report = validate(&ctx, root, Config::new().with_concrete(true).with_final(true));
    assert!(report.is_valid(), "unexpected failures: {:?}", report.errors);

    let exported = export(&ctx, root).expect("export");
    let json = serde_json::to_value(&exported).expect("serialize");
    assert_eq!(
        json,
        serde_json::json!({
            "name": "api",
            "port": 8080,
            "replicas": 1,
        })
    );
}

#[test]
fn out_of_bound_port_is_rejected() {
    let mut ctx = OpContext::new();
    let (root, env) = ctx.new_root();
    let data = Expr::struct_lit(StructLit::new(vec![
        field("name", Expr::str("api")),
        field("port", Expr::int(0)),
    ]));
    ctx.add_conjunct(root, Conjunct::new(service_schema(), env));
    ctx.add_conjunct(root, Conjunct::new(data, env));
    ctx.finalize_tree(root).expect("finalize");

    let report = validate(&ctx, root, Config::new());
    assert_eq!(report.code, Some(confit_adt::ErrorCode::Eval));
    assert!(export(&ctx, root).is_err());
}

#[test]
fn undeclared_field_is_rejected_by_closed_schema() {
    let mut ctx = OpContext::new();
    let (root, env) = ctx.new_root();
    let data = Expr::struct_lit(StructLit::new(vec![
        field("name", Expr::str("api")),
        field("port", Expr::int(80)),
        field("debug", Expr::bool(true)),
    ]));
    ctx.add_conjunct(root, Conjunct::new(service_schema(), env));
    ctx.add_conjunct(root, Conjunct::new(data, env));
    ctx.finalize_tree(root).expect("finalize");

    let report = validate(&ctx, root, Config::new());
    assert_eq!(report.code, Some(confit_adt::ErrorCode::Eval));
    let messages: Vec<&str> = report
        .errors
        .iter()
        .map(|error| error.message.as_str())
        .collect();
    assert!(messages.iter().any(|m| m.contains("not allowed")));
}

#[test]
fn derived_section_from_comprehension() {
    // ports: [8080, 8081]
    // checks: for p in ports { open: p } -- conflicting yields would fail,
    // so derive from a single-element list and cross-reference it
    let mut ctx = OpContext::new();
    let (root, env) = ctx.new_root();
    let lit = StructLit::new(vec![
        field(
            "ports",
            Expr::list_lit(ListLit::new(vec![Expr::int(8080)])),
        ),
        Decl::Embed(Expr::comprehension(Comprehension::new(
            vec![Clause::For {
                key: None,
                value: "p".into(),
                source: Expr::reference("ports"),
            }],
            Expr::struct_lit(StructLit::new(vec![field("open", Expr::reference("p"))])),
        ))),
    ]);
    ctx.add_conjunct(root, Conjunct::new(Expr::struct_lit(lit), env));
    ctx.finalize_tree(root).expect("finalize");

    let exported = export(&ctx, root).expect("export");
    let json = serde_json::to_value(&exported).expect("serialize");
    assert_eq!(
        json,
        serde_json::json!({
            "ports": [8080],
            "open": 8080,
        })
    );
}

#[test]
fn list_element_constraints_apply_to_tail() {
    // [...>0] & [1, 2] is fine; [...>0] & [0] fails
    let mut ctx = OpContext::new();
    let (root, env) = ctx.new_root();
    let open = Expr::list_lit(ListLit::open(
        vec![],
        Some(Expr::bound(BoundOp::Gt, Expr::int(0))),
    ));
    let data = Expr::list_lit(ListLit::new(vec![Expr::int(1), Expr::int(2)]));
    ctx.add_conjunct(root, Conjunct::new(open, env));
    ctx.add_conjunct(root, Conjunct::new(data, env));
    ctx.finalize_tree(root).expect("finalize");
    assert!(validate(&ctx, root, Config::new().with_concrete(true)).is_valid());

    let mut ctx = OpContext::new();
    let (root, env) = ctx.new_root();
    let open = Expr::list_lit(ListLit::open(
        vec![],
        Some(Expr::bound(BoundOp::Gt, Expr::int(0))),
    ));
    let data = Expr::list_lit(ListLit::new(vec![Expr::int(0)]));
    ctx.add_conjunct(root, Conjunct::new(open, env));
    ctx.add_conjunct(root, Conjunct::new(data, env));
    ctx.finalize_tree(root).expect("finalize");
    assert_eq!(
        validate(&ctx, root, Config::new()).code,
        Some(confit_adt::ErrorCode::Eval)
    );
}

#[test]
fn fixed_length_lists_reject_extra_elements() {
    let mut ctx = OpContext::new();
    let (root, env) = ctx.new_root();
    let short = Expr::list_lit(ListLit::new(vec![Expr::int(1)]));
    let long = Expr::list_lit(ListLit::new(vec![Expr::int(1), Expr::int(2)]));
    ctx.add_conjunct(root, Conjunct::new(short, env));
    ctx.add_conjunct(root, Conjunct::new(long, env));
    ctx.finalize_tree(root).expect("finalize");
    assert_eq!(
        validate(&ctx, root, Config::new()).code,
        Some(confit_adt::ErrorCode::Eval)
    );
}
