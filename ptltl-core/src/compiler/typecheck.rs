use std::collections::HashMap;

use crate::compiler::ast::{CmpOp, FormulaNode, Spec, Term, TypeAnnotation};
use crate::error::MonitorError;

/// Resolves identifier types: declared variables and enum constants (each
/// constant is registered under its own name, pointing back at its enum).
#[derive(Debug, Clone, Default)]
pub struct TypeContext {
    vars: HashMap<String, TypeAnnotation>,
    /// enum constant name -> owning enum type name
    constants: HashMap<String, String>,
}

impl TypeContext {
    pub fn build(spec: &Spec) -> Result<TypeContext, MonitorError> {
        let mut ctx = TypeContext::default();
        for e in &spec.enums {
            for variant in &e.variants {
                if let Some(existing) = ctx.constants.insert(variant.clone(), e.name.clone()) {
                    if existing != e.name {
                        return Err(MonitorError::Type {
                            formula_index: usize::MAX,
                            reason: format!(
                                "enum constant `{variant}` redeclared in both `{existing}` and `{}`",
                                e.name
                            ),
                        });
                    }
                }
            }
        }
        for v in &spec.vars {
            if let Some(existing) = ctx.vars.insert(v.name.clone(), v.ty.clone()) {
                return Err(MonitorError::Type {
                    formula_index: usize::MAX,
                    reason: format!(
                        "`{}` redeclared with type {} (already declared as {})",
                        v.name, v.ty, existing
                    ),
                });
            }
        }
        Ok(ctx)
    }

    fn type_of_term(&self, t: &Term) -> Option<TypeAnnotation> {
        match t {
            Term::Int(_) => Some(TypeAnnotation::Int),
            Term::Bool(_) => Some(TypeAnnotation::Bool),
            Term::Ident(name) => {
                if let Some(ty) = self.vars.get(name) {
                    return Some(ty.clone());
                }
                if let Some(enum_name) = self.constants.get(name) {
                    return Some(TypeAnnotation::Enum(enum_name.clone()));
                }
                None
            }
        }
    }
}

/// Type-checks every formula in `spec` against `ctx`, returning all errors
/// found (not just the first) so a single bad spec file reports completely.
pub fn typecheck(spec: &Spec, ctx: &TypeContext) -> Result<(), Vec<MonitorError>> {
    let mut errors = Vec::new();
    for (idx, formula) in spec.formulas.iter().enumerate() {
        check_node(&formula.root, idx, ctx, &mut errors);
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_node(node: &FormulaNode, idx: usize, ctx: &TypeContext, errors: &mut Vec<MonitorError>) {
    match node {
        FormulaNode::BoolLiteral { .. } => {}
        FormulaNode::Ident { name, .. } => match ctx.vars.get(name) {
            None => {
                if !ctx.constants.contains_key(name) {
                    errors.push(MonitorError::UnknownVariable {
                        formula_index: idx,
                        name: name.clone(),
                    });
                } else {
                    errors.push(MonitorError::Type {
                        formula_index: idx,
                        reason: format!("enum constant `{name}` cannot be used as a bare boolean atom"),
                    });
                }
            }
            Some(ty) if *ty != TypeAnnotation::Bool => {
                errors.push(MonitorError::Type {
                    formula_index: idx,
                    reason: format!("`{name}` has type {ty}, but is used as a boolean formula atom"),
                });
            }
            Some(_) => {}
        },
        FormulaNode::Predicate { lhs, op, rhs, .. } => {
            let lhs_ty = ctx.type_of_term(lhs);
            let rhs_ty = ctx.type_of_term(rhs);
            match (&lhs_ty, &rhs_ty) {
                (None, _) => errors.push(unknown_var(idx, lhs)),
                (_, None) => errors.push(unknown_var(idx, rhs)),
                (Some(l), Some(r)) => {
                    if l != r {
                        errors.push(MonitorError::Type {
                            formula_index: idx,
                            reason: format!(
                                "comparison `{lhs} {op} {rhs}` mixes types {l} and {r}"
                            ),
                        });
                    } else if matches!(op, CmpOp::Gt | CmpOp::Gte | CmpOp::Lt | CmpOp::Lte)
                        && *l != TypeAnnotation::Int
                    {
                        errors.push(MonitorError::Type {
                            formula_index: idx,
                            reason: format!("ordering operator `{op}` requires int operands, found {l}"),
                        });
                    }
                }
            }
        }
        FormulaNode::Not { operand, .. }
        | FormulaNode::Yesterday { operand, .. }
        | FormulaNode::Once { operand, .. }
        | FormulaNode::Historically { operand, .. } => check_node(operand, idx, ctx, errors),
        FormulaNode::And { left, right, .. }
        | FormulaNode::Or { left, right, .. }
        | FormulaNode::Arrow { left, right, .. }
        | FormulaNode::Since { left, right, .. } => {
            check_node(left, idx, ctx, errors);
            check_node(right, idx, ctx, errors);
        }
    }
}

fn unknown_var(idx: usize, term: &Term) -> MonitorError {
    let name = match term {
        Term::Ident(n) => n.clone(),
        other => other.to_string(),
    };
    MonitorError::UnknownVariable {
        formula_index: idx,
        name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::Parser;

    #[test]
    fn accepts_well_typed_spec() {
        let spec = Parser::parse("int seq;\nf: seq > 0;").unwrap();
        let ctx = TypeContext::build(&spec).unwrap();
        assert!(typecheck(&spec, &ctx).is_ok());
    }

    #[test]
    fn rejects_mixed_type_comparison() {
        let spec = Parser::parse("int seq;\nbool mac_ok;\nf: seq == mac_ok;").unwrap();
        let ctx = TypeContext::build(&spec).unwrap();
        assert!(typecheck(&spec, &ctx).is_err());
    }

    #[test]
    fn rejects_ordering_on_bool() {
        let spec = Parser::parse("bool mac_ok;\nf: mac_ok > false;").unwrap();
        let ctx = TypeContext::build(&spec).unwrap();
        assert!(typecheck(&spec, &ctx).is_err());
    }

    #[test]
    fn rejects_unknown_variable() {
        let spec = Parser::parse("f: unknown_var == 1;").unwrap();
        let ctx = TypeContext::build(&spec).unwrap();
        let errs = typecheck(&spec, &ctx).unwrap_err();
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn accepts_int_literal_on_either_side() {
        let spec = Parser::parse("int seq;\nf: 1 < seq;").unwrap();
        let ctx = TypeContext::build(&spec).unwrap();
        assert!(typecheck(&spec, &ctx).is_ok());
    }

    #[test]
    fn accepts_bare_bool_identifier_atom() {
        let spec = Parser::parse("bool mac_ok;\nf: mac_ok;").unwrap();
        let ctx = TypeContext::build(&spec).unwrap();
        assert!(typecheck(&spec, &ctx).is_ok());
    }

    #[test]
    fn rejects_bare_int_identifier_atom() {
        let spec = Parser::parse("int seq;\nf: seq;").unwrap();
        let ctx = TypeContext::build(&spec).unwrap();
        assert!(typecheck(&spec, &ctx).is_err());
    }

    #[test]
    fn rejects_duplicate_var_name() {
        let spec = Parser::parse("int seq;\nbool seq;\nf: seq == 1;").unwrap();
        assert!(TypeContext::build(&spec).is_err());
    }

    #[test]
    fn enum_constants_compare_by_enum_identity() {
        let src = "enum MessageType { ClientHello, ServerHello };\nMessageType message_type;\nf: message_type == ClientHello;";
        let spec = Parser::parse(src).unwrap();
        let ctx = TypeContext::build(&spec).unwrap();
        assert!(typecheck(&spec, &ctx).is_ok());
    }
}
