pub mod ast;
pub mod lexer;
pub mod parser;
pub mod preprocess;
pub mod typecheck;

use crate::error::MonitorError;
use ast::Spec;
use typecheck::TypeContext;

/// Parses, type-checks, and preprocesses a spec file in one call — the
/// sequence every entry point needs before handing a `Spec` to the
/// evaluator.
pub fn compile(src: &str) -> Result<(Spec, TypeContext), Vec<MonitorError>> {
    let mut spec = parser::Parser::parse(src).map_err(|e| vec![e])?;
    let ctx = TypeContext::build(&spec).map_err(|e| vec![e])?;
    typecheck::typecheck(&spec, &ctx)?;
    preprocess::assign_serials(&mut spec);
    Ok((spec, ctx))
}
