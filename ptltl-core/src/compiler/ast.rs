use std::fmt;

/// Primitive types a declared variable or enum constant can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAnnotation {
    Bool,
    Int,
    Enum(String),
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeAnnotation::Bool => write!(f, "bool"),
            TypeAnnotation::Int => write!(f, "int"),
            TypeAnnotation::Enum(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Neq => "!=",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
        };
        write!(f, "{s}")
    }
}

/// A literal or identifier term appearing on either side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Int(i64),
    Bool(bool),
    Ident(String),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Int(n) => write!(f, "{n}"),
            Term::Bool(b) => write!(f, "{b}"),
            Term::Ident(name) => write!(f, "{name}"),
        }
    }
}

/// A node of a ptLTL formula tree.
///
/// `serial` is assigned by the preprocessor (pre-order, per-formula) and is
/// left at `0` by the parser; nothing downstream of preprocessing should read
/// it before `preprocess::assign_serials` has run.
#[derive(Debug, Clone)]
pub enum FormulaNode {
    /// A bare boolean literal used directly as a formula atom (`true;`),
    /// as opposed to one side of a `Term` inside a `Predicate`.
    BoolLiteral {
        value: bool,
        serial: u32,
    },
    /// A bare bool-typed identifier used directly as a formula atom
    /// (`mac_ok;`), evaluated by interpreting its label as `"true"`/`"false"`.
    Ident {
        name: String,
        serial: u32,
    },
    Predicate {
        lhs: Term,
        op: CmpOp,
        rhs: Term,
        serial: u32,
    },
    Not {
        operand: Box<FormulaNode>,
        serial: u32,
    },
    And {
        left: Box<FormulaNode>,
        right: Box<FormulaNode>,
        serial: u32,
    },
    Or {
        left: Box<FormulaNode>,
        right: Box<FormulaNode>,
        serial: u32,
    },
    Arrow {
        left: Box<FormulaNode>,
        right: Box<FormulaNode>,
        serial: u32,
    },
    Yesterday {
        operand: Box<FormulaNode>,
        serial: u32,
    },
    Once {
        operand: Box<FormulaNode>,
        serial: u32,
    },
    Historically {
        operand: Box<FormulaNode>,
        serial: u32,
    },
    Since {
        left: Box<FormulaNode>,
        right: Box<FormulaNode>,
        serial: u32,
    },
}

impl FormulaNode {
    pub fn serial(&self) -> u32 {
        match self {
            FormulaNode::BoolLiteral { serial, .. }
            | FormulaNode::Ident { serial, .. }
            | FormulaNode::Predicate { serial, .. }
            | FormulaNode::Not { serial, .. }
            | FormulaNode::And { serial, .. }
            | FormulaNode::Or { serial, .. }
            | FormulaNode::Arrow { serial, .. }
            | FormulaNode::Yesterday { serial, .. }
            | FormulaNode::Once { serial, .. }
            | FormulaNode::Historically { serial, .. }
            | FormulaNode::Since { serial, .. } => *serial,
        }
    }

    pub fn set_serial(&mut self, value: u32) {
        match self {
            FormulaNode::BoolLiteral { serial, .. }
            | FormulaNode::Ident { serial, .. }
            | FormulaNode::Predicate { serial, .. }
            | FormulaNode::Not { serial, .. }
            | FormulaNode::And { serial, .. }
            | FormulaNode::Or { serial, .. }
            | FormulaNode::Arrow { serial, .. }
            | FormulaNode::Yesterday { serial, .. }
            | FormulaNode::Once { serial, .. }
            | FormulaNode::Historically { serial, .. }
            | FormulaNode::Since { serial, .. } => *serial = value,
        }
    }

    /// Visits `self` and every descendant in pre-order (node before children).
    pub fn walk_pre_order<'a>(&'a self, f: &mut impl FnMut(&'a FormulaNode)) {
        f(self);
        match self {
            FormulaNode::BoolLiteral { .. } | FormulaNode::Ident { .. } | FormulaNode::Predicate { .. } => {}
            FormulaNode::Not { operand, .. }
            | FormulaNode::Yesterday { operand, .. }
            | FormulaNode::Once { operand, .. }
            | FormulaNode::Historically { operand, .. } => operand.walk_pre_order(f),
            FormulaNode::And { left, right, .. }
            | FormulaNode::Or { left, right, .. }
            | FormulaNode::Arrow { left, right, .. }
            | FormulaNode::Since { left, right, .. } => {
                left.walk_pre_order(f);
                right.walk_pre_order(f);
            }
        }
    }

    pub fn walk_pre_order_mut(&mut self, f: &mut impl FnMut(&mut FormulaNode)) {
        f(self);
        match self {
            FormulaNode::BoolLiteral { .. } | FormulaNode::Ident { .. } | FormulaNode::Predicate { .. } => {}
            FormulaNode::Not { operand, .. }
            | FormulaNode::Yesterday { operand, .. }
            | FormulaNode::Once { operand, .. }
            | FormulaNode::Historically { operand, .. } => operand.walk_pre_order_mut(f),
            FormulaNode::And { left, right, .. }
            | FormulaNode::Or { left, right, .. }
            | FormulaNode::Arrow { left, right, .. }
            | FormulaNode::Since { left, right, .. } => {
                left.walk_pre_order_mut(f);
                right.walk_pre_order_mut(f);
            }
        }
    }
}

impl fmt::Display for FormulaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaNode::BoolLiteral { value, .. } => write!(f, "{value}"),
            FormulaNode::Ident { name, .. } => write!(f, "{name}"),
            FormulaNode::Predicate { lhs, op, rhs, .. } => write!(f, "{lhs} {op} {rhs}"),
            FormulaNode::Not { operand, .. } => write!(f, "!({operand})"),
            FormulaNode::And { left, right, .. } => write!(f, "({left} & {right})"),
            FormulaNode::Or { left, right, .. } => write!(f, "({left} | {right})"),
            FormulaNode::Arrow { left, right, .. } => write!(f, "({left} -> {right})"),
            FormulaNode::Yesterday { operand, .. } => write!(f, "Y({operand})"),
            FormulaNode::Once { operand, .. } => write!(f, "O({operand})"),
            FormulaNode::Historically { operand, .. } => write!(f, "H({operand})"),
            FormulaNode::Since { left, right, .. } => write!(f, "({left} S {right})"),
        }
    }
}

/// One top-level monitored property: `name: formula;`.
#[derive(Debug, Clone)]
pub struct Formula {
    pub name: String,
    pub root: FormulaNode,
    /// Filled in by the preprocessor: number of nodes in `root`'s tree.
    pub tree_size: u32,
}

/// A declared variable: `var_type name;` (e.g. `int seq;`, `bool mac_ok;`,
/// `MessageType message_type;`).
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub ty: TypeAnnotation,
}

/// `enum Name { A, B, C };`
#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<String>,
}

/// A fully parsed (but not yet preprocessed) specification file.
#[derive(Debug, Clone, Default)]
pub struct Spec {
    pub enums: Vec<EnumDecl>,
    pub vars: Vec<VarDecl>,
    pub formulas: Vec<Formula>,
}
