use crate::compiler::ast::Spec;

/// Assigns pre-order serial numbers to every node of every formula, and
/// records each formula's tree size. Serials restart at `0` per formula —
/// they index into that formula's own bitvector pair, not a spec-wide space.
///
/// Pre-order here means the root receives its serial before either child is
/// visited, matching the reference preprocessor this is ported from.
pub fn assign_serials(spec: &mut Spec) {
    for formula in &mut spec.formulas {
        let mut next = 0u32;
        formula.root.walk_pre_order_mut(&mut |node| {
            node.set_serial(next);
            next += 1;
        });
        formula.tree_size = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::FormulaNode;
    use crate::compiler::parser::Parser;

    #[test]
    fn root_gets_serial_zero() {
        let mut spec = Parser::parse("f: Y(a == 1) & b == 2;").unwrap();
        assign_serials(&mut spec);
        let root = &spec.formulas[0].root;
        assert_eq!(root.serial(), 0);
        assert_eq!(spec.formulas[0].tree_size, 4);
    }

    #[test]
    fn pre_order_numbers_parent_before_children() {
        let mut spec = Parser::parse("f: (a == 1) & (b == 2);").unwrap();
        assign_serials(&mut spec);
        match &spec.formulas[0].root {
            FormulaNode::And { left, right, serial } => {
                assert_eq!(*serial, 0);
                assert_eq!(left.serial(), 1);
                assert_eq!(right.serial(), 2);
            }
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn serials_restart_per_formula() {
        let mut spec = Parser::parse("f: a == 1;\ng: b == 2 & c == 3;").unwrap();
        assign_serials(&mut spec);
        assert_eq!(spec.formulas[0].root.serial(), 0);
        assert_eq!(spec.formulas[1].root.serial(), 0);
    }
}
