use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Index of a node in the IR arena; operands always precede their users,
/// so arena order is a valid evaluation order.
pub type NodeId = usize;

/// Index into the table set attached to one integral's IR
pub type TableId = usize;

/// Geometric quantities, evaluated once per constituent cell and shared
/// through the arena rather than recomputed per basis function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Geom {
    /// Entry (row, col) of the inverse Jacobian
    JacobianInv(usize, usize),
    FacetNormal(usize),
    Circumradius,
    CellVolume,
}

/// One node of the integrand IR. Terminals reference tabulated basis
/// values, geometric quantities and literals; operators are scalar
/// arithmetic over earlier nodes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Ir {
    /// A literal constant, stored as canonicalized f64 bits so nodes hash
    Lit(u64),
    /// The quadrature weight of the current point
    Weight,
    /// The domain measure scale factor of constituent cell `block`
    Scale(usize),
    Geom {
        q: Geom,
        block: usize,
    },
    /// Basis value of argument `arg` at the current point and local index,
    /// read from `table`
    Basis {
        table: TableId,
        arg: usize,
    },
    /// Coefficient `coeff` evaluated at the current point: the dot product
    /// of `table`'s row with the coefficient's dof block
    Coeff {
        table: TableId,
        coeff: usize,
        block: usize,
    },
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    Div(NodeId, NodeId),
    Neg(NodeId),
}

impl Ir {
    pub fn lit(v: f64) -> Ir {
        // canonicalize -0.0 so value numbering does not split on sign
        let v = if v == 0. { 0. } else { v };
        Ir::Lit(v.to_bits())
    }

    pub fn as_lit(&self) -> Option<f64> {
        match self {
            Ir::Lit(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            Ir::Add(a, b) | Ir::Sub(a, b) | Ir::Mul(a, b) | Ir::Div(a, b) => vec![*a, *b],
            Ir::Neg(a) => vec![*a],
            _ => vec![],
        }
    }

    /// Same operator, new operands
    pub fn with_operands(&self, ops: &[NodeId]) -> Ir {
        match self {
            Ir::Add(..) => Ir::Add(ops[0], ops[1]),
            Ir::Sub(..) => Ir::Sub(ops[0], ops[1]),
            Ir::Mul(..) => Ir::Mul(ops[0], ops[1]),
            Ir::Div(..) => Ir::Div(ops[0], ops[1]),
            Ir::Neg(..) => Ir::Neg(ops[0]),
            x => *x,
        }
    }
}

/// The integrand IR: an arena of nodes hash-consed at insertion, so every
/// distinct subexpression exists at most once and shared subexpressions
/// (Jacobians, tabulations) are shared by construction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IrDag {
    nodes: Vec<Ir>,
    #[serde(skip)]
    memo: HashMap<Ir, NodeId>,
}

impl PartialEq for IrDag {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl IrDag {
    pub fn insert(&mut self, ir: Ir) -> NodeId {
        if let Some(id) = self.memo.get(&ir) {
            return *id;
        }
        let id = self.nodes.len();
        self.nodes.push(ir);
        self.memo.insert(ir, id);
        id
    }

    pub fn lit(&mut self, v: f64) -> NodeId {
        self.insert(Ir::lit(v))
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.insert(Ir::Add(a, b))
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.insert(Ir::Sub(a, b))
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.insert(Ir::Mul(a, b))
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.insert(Ir::Div(a, b))
    }

    pub fn neg(&mut self, a: NodeId) -> NodeId {
        self.insert(Ir::Neg(a))
    }

    /// Sum of an arbitrary number of terms, zero if empty
    pub fn sum(&mut self, terms: &[NodeId]) -> NodeId {
        match terms.split_first() {
            None => self.lit(0.),
            Some((first, rest)) => {
                let mut acc = *first;
                for t in rest {
                    acc = self.add(acc, *t);
                }
                acc
            }
        }
    }

    pub fn node(&self, id: NodeId) -> &Ir {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Ir] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Loop level a node is evaluated at: the outermost loop all its
/// dependencies permit. Levels index the kernel's loop nest.
pub const LEVEL_CELL: u8 = 0;
pub const LEVEL_POINT: u8 = 1;
pub const LEVEL_TEST: u8 = 2;
pub const LEVEL_TRIAL: u8 = 3;

/// An optimized, frozen IR: nodes in canonical topological order with one
/// root and a loop level per node. Byte-identical re-serialization of an
/// already-optimized program is the optimizer's idempotence contract.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Program {
    pub dag: IrDag,
    pub root: NodeId,
    pub levels: Vec<u8>,
}
