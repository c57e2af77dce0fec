use std::collections::HashMap;

use crate::bitvector::BitVector;
use crate::compiler::ast::{CmpOp, Formula, FormulaNode, Spec, Term};
use crate::error::MonitorError;
use crate::state::State;

/// The `(old, new)` bitvector pair for one top-level formula, plus the
/// formula's own tree size (the pair's shared width).
#[derive(Debug, Clone)]
struct FormulaBits {
    old: BitVector,
    new: BitVector,
}

impl FormulaBits {
    fn new(tree_size: u32) -> Self {
        FormulaBits {
            old: BitVector::new(tree_size),
            new: BitVector::new(tree_size),
        }
    }

    fn clear(&mut self) {
        self.old.clear();
        self.new.clear();
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    index: u64,
    bits: Vec<FormulaBits>,
}

/// Incremental ptLTL evaluator: owns a `(old, new)` bitvector pair per
/// top-level formula and a step counter, and walks each formula's tree once
/// per event in `evaluate_one_step`.
///
/// Formulas are cloned out of the compiled `Spec` at construction so the
/// evaluator is self-contained — it outlives any particular borrow of the
/// spec that produced it, which is what lets the driver hand it around
/// (and snapshot it) without juggling lifetimes.
#[derive(Debug)]
pub struct Evaluator {
    formulas: Vec<Formula>,
    bits: Vec<FormulaBits>,
    index: u64,
    snapshots: HashMap<u64, Snapshot>,
}

impl Evaluator {
    pub fn new(spec: &Spec) -> Self {
        let bits = spec
            .formulas
            .iter()
            .map(|f| FormulaBits::new(f.tree_size))
            .collect();
        Evaluator {
            formulas: spec.formulas.clone(),
            bits,
            index: 0,
            snapshots: HashMap::new(),
        }
    }

    pub fn formulas(&self) -> &[Formula] {
        &self.formulas
    }

    pub fn step_index(&self) -> u64 {
        self.index
    }

    /// Evaluates every top-level formula against `state`, returning one
    /// verdict per formula in declaration order. Swaps `old`/`new` and
    /// advances the step counter before returning.
    pub fn evaluate_one_step(&mut self, state: &State) -> Result<Vec<bool>, MonitorError> {
        let mut verdicts = Vec::with_capacity(self.formulas.len());
        for (idx, formula) in self.formulas.iter().enumerate() {
            let FormulaBits { old, new } = &mut self.bits[idx];
            new.clear();
            let verdict = eval_node(&formula.root, state, old, new, idx, self.index)?;
            verdicts.push(verdict);
        }
        for bits in &mut self.bits {
            std::mem::swap(&mut bits.old, &mut bits.new);
            bits.new.clear();
        }
        self.index += 1;
        Ok(verdicts)
    }

    /// Zeroes every bitvector pair and resets the step counter. Called by
    /// the driver on `__END_SESSION__`.
    pub fn reset_evaluator(&mut self) {
        for bits in &mut self.bits {
            bits.clear();
        }
        self.index = 0;
    }

    /// Deep-copies the step counter and every bitvector pair under `id`.
    pub fn save(&mut self, id: u64) {
        self.snapshots.insert(
            id,
            Snapshot {
                index: self.index,
                bits: self.bits.clone(),
            },
        );
    }

    /// Restores the step counter and bitvectors saved under `id`. Leaves
    /// the evaluator untouched if `id` was never saved.
    pub fn restore(&mut self, id: u64) -> Result<(), MonitorError> {
        match self.snapshots.get(&id) {
            Some(snap) => {
                self.index = snap.index;
                self.bits = snap.bits.clone();
                Ok(())
            }
            None => Err(MonitorError::SnapshotMissing { id }),
        }
    }
}

fn resolve_int(term: &Term, state: &State, formula_index: usize) -> Result<i64, MonitorError> {
    match term {
        Term::Int(n) => Ok(*n),
        Term::Bool(b) => Ok(*b as i64),
        Term::Ident(name) => {
            let raw = state
                .get_label(name)
                .ok_or_else(|| MonitorError::UnknownVariable {
                    formula_index,
                    name: name.clone(),
                })?;
            raw.parse::<i64>().map_err(|_| MonitorError::UnknownVariable {
                formula_index,
                name: format!("{name} (non-numeric value `{raw}`)"),
            })
        }
    }
}

/// Canonical textual rendering of a term for `==`/`!=`: literals render as
/// their decimal/`true`/`false` spelling, identifiers resolve to the raw
/// state label. This is deliberately a string comparison, not an enum
/// lookup — see `SPEC_FULL.md` §4.4's note on nominal vs. structural enum
/// equality.
fn resolve_str(term: &Term, state: &State, formula_index: usize) -> Result<String, MonitorError> {
    match term {
        Term::Int(n) => Ok(n.to_string()),
        Term::Bool(b) => Ok(b.to_string()),
        Term::Ident(name) => state
            .get_label(name)
            .map(str::to_string)
            .ok_or_else(|| MonitorError::UnknownVariable {
                formula_index,
                name: name.clone(),
            }),
    }
}

/// Evaluates `node` against `state`, setting its bit in `new` (by serial
/// number) whenever it holds. `old` is the previous step's snapshot, read
/// by the past-time operators. Returns the node's own truth value.
fn eval_node(
    node: &FormulaNode,
    state: &State,
    old: &BitVector,
    new: &mut BitVector,
    formula_index: usize,
    step_index: u64,
) -> Result<bool, MonitorError> {
    let result = match node {
        FormulaNode::BoolLiteral { value, .. } => *value,
        FormulaNode::Ident { name, .. } => {
            let raw = state
                .get_label(name)
                .ok_or_else(|| MonitorError::UnknownVariable {
                    formula_index,
                    name: name.clone(),
                })?;
            match raw {
                "true" => true,
                "false" => false,
                other => {
                    return Err(MonitorError::UnknownVariable {
                        formula_index,
                        name: format!("{name} (non-boolean value `{other}`)"),
                    })
                }
            }
        }
        FormulaNode::Predicate { lhs, op, rhs, .. } => match op {
            CmpOp::Eq => resolve_str(lhs, state, formula_index)? == resolve_str(rhs, state, formula_index)?,
            CmpOp::Neq => resolve_str(lhs, state, formula_index)? != resolve_str(rhs, state, formula_index)?,
            CmpOp::Gt => resolve_int(lhs, state, formula_index)? > resolve_int(rhs, state, formula_index)?,
            CmpOp::Gte => resolve_int(lhs, state, formula_index)? >= resolve_int(rhs, state, formula_index)?,
            CmpOp::Lt => resolve_int(lhs, state, formula_index)? < resolve_int(rhs, state, formula_index)?,
            CmpOp::Lte => resolve_int(lhs, state, formula_index)? <= resolve_int(rhs, state, formula_index)?,
        },
        FormulaNode::Not { operand, .. } => {
            !eval_node(operand, state, old, new, formula_index, step_index)?
        }
        FormulaNode::And { left, right, .. } => {
            let r1 = eval_node(left, state, old, new, formula_index, step_index)?;
            let r2 = eval_node(right, state, old, new, formula_index, step_index)?;
            r1 && r2
        }
        FormulaNode::Or { left, right, .. } => {
            let r1 = eval_node(left, state, old, new, formula_index, step_index)?;
            let r2 = eval_node(right, state, old, new, formula_index, step_index)?;
            r1 || r2
        }
        FormulaNode::Arrow { left, right, .. } => {
            let r1 = eval_node(left, state, old, new, formula_index, step_index)?;
            let r2 = eval_node(right, state, old, new, formula_index, step_index)?;
            !r1 || r2
        }
        FormulaNode::Yesterday { operand, .. } => {
            let operand_serial = operand.serial();
            eval_node(operand, state, old, new, formula_index, step_index)?;
            step_index != 0 && old.test(operand_serial)
        }
        FormulaNode::Once { operand, .. } => {
            let r1 = eval_node(operand, state, old, new, formula_index, step_index)?;
            r1 || old.test(node.serial())
        }
        FormulaNode::Historically { operand, .. } => {
            let r1 = eval_node(operand, state, old, new, formula_index, step_index)?;
            let r2 = step_index == 0 || old.test(node.serial());
            r1 && r2
        }
        FormulaNode::Since { left, right, .. } => {
            let r1 = eval_node(left, state, old, new, formula_index, step_index)?;
            let r2 = eval_node(right, state, old, new, formula_index, step_index)?;
            let r3 = old.test(node.serial());
            r2 || (r1 && r3)
        }
    };
    if result {
        new.set(node.serial());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn step(spec: &Spec, ev: &mut Evaluator, labels: &[(&str, &str)]) -> Vec<bool> {
        let mut state = State::new(spec);
        for (k, v) in labels {
            state.add_label(*k, *v);
        }
        ev.evaluate_one_step(&state).unwrap()
    }

    #[test]
    fn since_golden_model() {
        let (spec, _ctx) = compile("bool a;\nbool b;\nf: a S b;\n").unwrap();
        let mut ev = Evaluator::new(&spec);

        assert_eq!(step(&spec, &mut ev, &[("a", "false"), ("b", "true")]), vec![true]);
        assert_eq!(step(&spec, &mut ev, &[("a", "true"), ("b", "false")]), vec![true]);
        assert_eq!(step(&spec, &mut ev, &[("a", "true"), ("b", "false")]), vec![true]);
        assert_eq!(step(&spec, &mut ev, &[("a", "false"), ("b", "false")]), vec![false]);
    }

    #[test]
    fn historically_requires_every_past_step() {
        let (spec, _ctx) = compile("bool flag;\nf: H(flag == true);\n").unwrap();
        let mut ev = Evaluator::new(&spec);

        assert_eq!(step(&spec, &mut ev, &[("flag", "true")]), vec![true]);
        assert_eq!(step(&spec, &mut ev, &[("flag", "true")]), vec![true]);
        assert_eq!(step(&spec, &mut ev, &[("flag", "false")]), vec![false]);
        // Once broken, H never recovers without a reset.
        assert_eq!(step(&spec, &mut ev, &[("flag", "true")]), vec![false]);
    }

    #[test]
    fn once_latches_true_forever_until_reset() {
        let (spec, _ctx) = compile("bool flag;\nf: O(flag == true);\n").unwrap();
        let mut ev = Evaluator::new(&spec);

        assert_eq!(step(&spec, &mut ev, &[("flag", "false")]), vec![false]);
        assert_eq!(step(&spec, &mut ev, &[("flag", "true")]), vec![true]);
        assert_eq!(step(&spec, &mut ev, &[("flag", "false")]), vec![true]);
    }

    #[test]
    fn yesterday_is_false_on_first_step() {
        let (spec, _ctx) = compile("bool flag;\nf: Y(flag == true);\n").unwrap();
        let mut ev = Evaluator::new(&spec);

        assert_eq!(step(&spec, &mut ev, &[("flag", "true")]), vec![false]);
        assert_eq!(step(&spec, &mut ev, &[("flag", "true")]), vec![true]);
        assert_eq!(step(&spec, &mut ev, &[("flag", "false")]), vec![true]);
    }

    #[test]
    fn reset_evaluator_clears_history() {
        let (spec, _ctx) = compile("bool flag;\nf: H(flag == true);\n").unwrap();
        let mut ev = Evaluator::new(&spec);
        step(&spec, &mut ev, &[("flag", "false")]);
        assert_eq!(ev.step_index(), 1);
        ev.reset_evaluator();
        assert_eq!(ev.step_index(), 0);
        assert_eq!(step(&spec, &mut ev, &[("flag", "true")]), vec![true]);
    }

    #[test]
    fn snapshot_round_trip_restores_erased_violation() {
        let (spec, _ctx) = compile("bool flag;\nf: H(flag == true);\n").unwrap();
        let mut ev = Evaluator::new(&spec);
        step(&spec, &mut ev, &[("flag", "true")]);
        ev.save(7);
        assert_eq!(step(&spec, &mut ev, &[("flag", "false")]), vec![false]);
        ev.restore(7).unwrap();
        assert_eq!(step(&spec, &mut ev, &[("flag", "true")]), vec![true]);
    }

    #[test]
    fn restore_unknown_snapshot_fails_without_mutating_state() {
        let (spec, _ctx) = compile("bool flag;\nf: H(flag == true);\n").unwrap();
        let mut ev = Evaluator::new(&spec);
        step(&spec, &mut ev, &[("flag", "true")]);
        let before = ev.step_index();
        assert!(ev.restore(999).is_err());
        assert_eq!(ev.step_index(), before);
    }

    #[test]
    fn bare_bool_identifier_atom_evaluates_directly() {
        let (spec, _ctx) = compile("bool mac_ok;\nf: mac_ok;\n").unwrap();
        let mut ev = Evaluator::new(&spec);
        assert_eq!(step(&spec, &mut ev, &[("mac_ok", "true")]), vec![true]);
        assert_eq!(step(&spec, &mut ev, &[("mac_ok", "false")]), vec![false]);
    }

    #[test]
    fn unknown_variable_is_a_fatal_evaluator_error() {
        let (spec, _ctx) = compile("bool flag;\nf: flag == true;\n").unwrap();
        let mut ev = Evaluator::new(&spec);
        let state = State::new(&spec); // `flag` never bound
        assert!(ev.evaluate_one_step(&state).is_err());
    }
}
