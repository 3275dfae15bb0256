use num_traits::{One, Zero};

use crate::ir::{Ir, IrDag, NodeId};
use crate::lowering::LoweredIntegrand;

/// Constant folding and zero pruning, bottom-up in one pass: operands are
/// rewritten before their users, so absorbed zeros propagate all the way
/// to the root without iteration. Basis and coefficient reads whose table
/// vanishes identically (a structurally-zero derivative, say) collapse to
/// a literal zero.
pub fn fold(li: &LoweredIntegrand, epsilon: f64) -> LoweredIntegrand {
    let mut dag = IrDag::default();
    let mut remap: Vec<NodeId> = Vec::with_capacity(li.dag.len());

    for node in li.dag.nodes() {
        let node = node.with_operands(
            &node
                .operands()
                .iter()
                .map(|o| remap[*o])
                .collect::<Vec<_>>(),
        );
        let id = match node {
            Ir::Basis { table, .. } | Ir::Coeff { table, .. }
                if li.tables.is_zero(table, epsilon) =>
            {
                dag.lit(0.)
            }
            Ir::Neg(a) => match dag.node(a) {
                Ir::Neg(inner) => *inner,
                ir => match ir.as_lit() {
                    Some(v) => dag.lit(-v),
                    None => dag.insert(node),
                },
            },
            Ir::Add(a, b) => match (lit_of(&dag, a), lit_of(&dag, b)) {
                (Some(x), Some(y)) => dag.lit(x + y),
                (Some(x), None) if x.is_zero() => b,
                (None, Some(y)) if y.is_zero() => a,
                _ => dag.insert(node),
            },
            Ir::Sub(a, b) => match (lit_of(&dag, a), lit_of(&dag, b)) {
                (Some(x), Some(y)) => dag.lit(x - y),
                (None, Some(y)) if y.is_zero() => a,
                (Some(x), None) if x.is_zero() => dag.neg(b),
                _ if a == b => dag.lit(0.),
                _ => dag.insert(node),
            },
            Ir::Mul(a, b) => match (lit_of(&dag, a), lit_of(&dag, b)) {
                (Some(x), Some(y)) => dag.lit(x * y),
                (Some(x), None) if x.is_zero() => dag.lit(0.),
                (None, Some(y)) if y.is_zero() => dag.lit(0.),
                (Some(x), None) if x.is_one() => b,
                (None, Some(y)) if y.is_one() => a,
                _ => dag.insert(node),
            },
            Ir::Div(a, b) => match (lit_of(&dag, a), lit_of(&dag, b)) {
                (Some(x), Some(y)) if !y.is_zero() => dag.lit(x / y),
                (Some(x), None) if x.is_zero() => dag.lit(0.),
                (None, Some(y)) if y.is_one() => a,
                _ => dag.insert(node),
            },
            _ => dag.insert(node),
        };
        remap.push(id);
    }

    LoweredIntegrand {
        dag,
        root: remap[li.root],
        tables: li.tables.clone(),
    }
}

fn lit_of(dag: &IrDag, id: NodeId) -> Option<f64> {
    dag.node(id).as_lit()
}
