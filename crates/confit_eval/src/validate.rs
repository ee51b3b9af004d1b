//! Post-evaluation validation.
//!
//! The validator walks a finalized graph and checks it against a policy:
//! whether leaves must be concrete, whether unresolved reference cycles are
//! acceptable, and whether required fields must have been satisfied. It
//! never mutates the graph; evaluation and validation are separate phases.
//!
//! Cycle failures are policy-dependent: under the default policy they are
//! demoted to plain incompleteness, since a value held up by a cycle may
//! still be completed by unification with more configuration. Only the
//! disallow-cycles policy reports them at cycle severity.

use crate::context::OpContext;
use confit_adt::{ArcType, Bottom, ErrReport, ErrorCode, Value, VertexId};
use serde::Serialize;

/// Validation policy. Controls what counts as an acceptable result, not how
/// evaluation spends its budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    /// Require every regular leaf value to be concrete.
    pub concrete: bool,
    /// Collect every failure instead of only the most severe one.
    pub all_errors: bool,
    /// Report unresolved reference cycles at cycle severity instead of
    /// demoting them to incompleteness.
    pub disallow_cycles: bool,
    /// Final-result checks: required fields must have been satisfied by a
    /// concrete counterpart.
    pub final_: bool,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concrete(mut self, concrete: bool) -> Self {
        self.concrete = concrete;
        self
    }

    pub fn with_all_errors(mut self, all_errors: bool) -> Self {
        self.all_errors = all_errors;
        self
    }

    pub fn with_disallow_cycles(mut self, disallow_cycles: bool) -> Self {
        self.disallow_cycles = disallow_cycles;
        self
    }

    pub fn with_final(mut self, final_: bool) -> Self {
        self.final_ = final_;
        self
    }
}

/// Outcome of one validation walk.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Most severe code among the collected failures, if any.
    pub code: Option<ErrorCode>,
    pub errors: Vec<ErrReport>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The collected failures as a single bottom, if any.
    pub fn bottom(&self) -> Option<Bottom> {
        self.code.map(|code| Bottom {
            code,
            reports: self.errors.clone(),
        })
    }
}

/// Validates the finalized graph under `root` against `config`.
pub fn validate(ctx: &OpContext, root: VertexId, config: Config) -> ValidationReport {
    let mut validator = Validator {
        ctx,
        config,
        in_definition: 0,
        collected: None,
    };
    validator.walk(root);
    match validator.collected {
        Some(bottom) => ValidationReport {
            code: Some(bottom.code),
            errors: bottom.reports,
        },
        None => ValidationReport {
            code: None,
            errors: Vec::new(),
        },
    }
}

struct Validator<'a> {
    ctx: &'a OpContext,
    config: Config,
    /// Depth of enclosing definition and hidden vertices; concreteness is
    /// not required inside a schema.
    in_definition: usize,
    collected: Option<Bottom>,
}

impl Validator<'_> {
    fn walk(&mut self, vertex: VertexId) {
        let vx = self.ctx.vertices.get(vertex);
        let entering_schema = vx.label.is_def() || vx.label.is_hidden();
        if entering_schema {
            self.in_definition += 1;
        }

        if vx.arc_type == ArcType::Optional {
            // Optional constraints are not part of the result; their
            // failures only matter when a concrete counterpart unifies them
            // into a regular field.
            if entering_schema {
                self.in_definition -= 1;
            }
            return;
        }

        if self.config.final_ && vx.arc_type == ArcType::Required && self.in_definition == 0 {
            // Still recoverable: a later unification can provide the field.
            self.report(
                Bottom::incomplete(format!("field {} is required but not present", vx.label))
                    .with_path(self.ctx.path_of(vertex)),
            );
        }

        match vx.value() {
            Some(Value::Bottom(bottom)) => self.report_bottom(bottom.clone()),
            Some(value) => self.check_concrete(vertex, value),
            None => {}
        }

        for &arc in &vx.arcs {
            self.walk(arc);
        }
        if entering_schema {
            self.in_definition -= 1;
        }
    }

    fn report_bottom(&mut self, bottom: Bottom) {
        let bottom = if bottom.code == ErrorCode::Cycle && !self.config.disallow_cycles {
            bottom.demote_cycle()
        } else {
            bottom
        };
        match bottom.code {
            ErrorCode::Eval => self.report(bottom),
            ErrorCode::Cycle => self.report(bottom),
            ErrorCode::Incomplete => {
                // An incomplete value is acceptable unless the caller asked
                // for a concrete or final result.
                if self.concreteness_required() {
                    self.report(bottom);
                }
            }
        }
    }

    fn check_concrete(&mut self, vertex: VertexId, value: &Value) {
        if !self.concreteness_required() {
            return;
        }
        let resolved = value.default();
        if !resolved.is_concrete() {
            self.report(
                Bottom::incomplete(format!("non-concrete value {resolved}"))
                    .with_path(self.ctx.path_of(vertex)),
            );
        }
    }

    fn concreteness_required(&self) -> bool {
        (self.config.concrete || self.config.final_) && self.in_definition == 0
    }

    /// Collects a failure: everything under all-errors, otherwise only the
    /// most severe one seen over the whole walk.
    fn report(&mut self, bottom: Bottom) {
        match self.collected.take() {
            None => self.collected = Some(bottom),
            Some(current) if self.config.all_errors => {
                self.collected = Some(current.combine(bottom));
            }
            Some(current) => {
                self.collected = Some(if bottom.code.severity() > current.code.severity() {
                    bottom
                } else {
                    current
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{validate, Config};
    use crate::context::OpContext;
    use confit_adt::{
        ArcType, Conjunct, Decl, ErrorCode, Expr, Feature, Kind, StructLit,
    };

    fn field(name: &str, value: std::sync::Arc<Expr>) -> Decl {
        Decl::Field {
            label: Feature::ident(name),
            arc: ArcType::Regular,
            value,
        }
    }

    fn evaluated(decls: Vec<Decl>) -> (OpContext, confit_adt::VertexId) {
        let mut ctx = OpContext::new();
        let (root, env) = ctx.new_root();
        ctx.add_conjunct(
            root,
            Conjunct::new(Expr::struct_lit(StructLit::new(decls)), env),
        );
        ctx.finalize_tree(root).expect("finalize");
        (ctx, root)
    }

    #[test]
    fn concrete_graph_passes() {
        let (ctx, root) = evaluated(vec![field("a", Expr::int(1))]);
        let report = validate(&ctx, root, Config::new().with_concrete(true));
        assert!(report.is_valid());
    }

    #[test]
    fn non_concrete_leaf_fails_only_under_concrete() {
        let (ctx, root) = evaluated(vec![field("a", Expr::typ(Kind::INT))]);
        assert!(validate(&ctx, root, Config::new()).is_valid());
        let report = validate(&ctx, root, Config::new().with_concrete(true));
        assert_eq!(report.code, Some(ErrorCode::Incomplete));
    }

    #[test]
    fn definitions_are_exempt_from_concreteness() {
        let inner = StructLit::new(vec![field("port", Expr::typ(Kind::INT))]);
        let (ctx, root) = evaluated(vec![Decl::Field {
            label: Feature::def("Server"),
            arc: ArcType::Regular,
            value: Expr::struct_lit(inner),
        }]);
        let report = validate(&ctx, root, Config::new().with_concrete(true));
        assert!(report.is_valid());
    }

    #[test]
    fn eval_errors_always_reported() {
        let (ctx, root) = evaluated(vec![
            field("a", Expr::int(1)),
            field("a", Expr::int(2)),
        ]);
        let report = validate(&ctx, root, Config::new());
        assert_eq!(report.code, Some(ErrorCode::Eval));
    }

    #[test]
    fn required_field_fails_under_final() {
        let (ctx, root) = evaluated(vec![Decl::Field {
            label: Feature::ident("name"),
            arc: ArcType::Required,
            value: Expr::typ(Kind::STRING),
        }]);
        assert!(validate(&ctx, root, Config::new()).is_valid());
        let report = validate(&ctx, root, Config::new().with_final(true));
        assert_eq!(report.code, Some(ErrorCode::Incomplete));
        assert!(report.errors[0].message.contains("required but not present"));
    }

    #[test]
    fn required_field_inside_definition_is_exempt_under_final() {
        // #Schema: {name!: string} is a schema, not an unfulfilled result.
        let inner = StructLit::new(vec![Decl::Field {
            label: Feature::ident("name"),
            arc: ArcType::Required,
            value: Expr::typ(Kind::STRING),
        }]);
        let (ctx, root) = evaluated(vec![Decl::Field {
            label: Feature::def("Schema"),
            arc: ArcType::Regular,
            value: Expr::struct_lit(inner),
        }]);
        let report = validate(&ctx, root, Config::new().with_final(true));
        assert!(report.is_valid(), "unexpected failures: {:?}", report.errors);
    }

    #[test]
    fn hidden_subtree_is_exempt_from_concreteness() {
        let inner = StructLit::new(vec![field("x", Expr::typ(Kind::INT))]);
        let (ctx, root) = evaluated(vec![Decl::Field {
            label: Feature::hidden("h"),
            arc: ArcType::Regular,
            value: Expr::struct_lit(inner),
        }]);
        let report = validate(&ctx, root, Config::new().with_concrete(true));
        assert!(report.is_valid(), "unexpected failures: {:?}", report.errors);
    }

    #[test]
    fn optional_fields_are_skipped() {
        let (ctx, root) = evaluated(vec![Decl::Field {
            label: Feature::ident("maybe"),
            arc: ArcType::Optional,
            value: Expr::typ(Kind::INT),
        }]);
        let report = validate(
            &ctx,
            root,
            Config::new().with_concrete(true).with_final(true),
        );
        assert!(report.is_valid());
    }

    #[test]
    fn all_errors_collects_every_failure() {
        let (ctx, root) = evaluated(vec![
            field("a", Expr::typ(Kind::INT)),
            field("b", Expr::typ(Kind::STRING)),
        ]);
        let report = validate(
            &ctx,
            root,
            Config::new().with_concrete(true).with_all_errors(true),
        );
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn most_severe_wins_without_all_errors() {
        let (ctx, root) = evaluated(vec![
            field("a", Expr::typ(Kind::INT)),
            field("b", Expr::int(1)),
            field("b", Expr::int(2)),
        ]);
        let report = validate(&ctx, root, Config::new().with_concrete(true));
        assert_eq!(report.code, Some(ErrorCode::Eval));
        assert_eq!(report.errors.len(), 1);
    }
}
