use std::collections::HashMap;

use crate::ir::{Ir, IrDag, NodeId, TableId};
use crate::lowering::LoweredIntegrand;

/// Rebuild the arena keeping only nodes reachable from the root, in the
/// canonical depth-first post-order (operands left to right). Hash
/// consing during the rebuild is the value-numbering step; tables no node
/// references any more are dropped and the survivors renumbered. The
/// output order is a pure function of the DAG structure, which makes the
/// pass idempotent.
pub fn renumber(li: &LoweredIntegrand) -> LoweredIntegrand {
    let mut dag = IrDag::default();
    let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
    let mut used_tables: Vec<TableId> = Vec::new();

    visit(li, li.root, &mut dag, &mut remap, &mut used_tables);

    let mut tables = li.tables.clone();
    let table_remap = tables.retain(&used_tables);

    // rewrite table references to the compacted ids
    let mut rewritten = IrDag::default();
    let mut final_remap: Vec<NodeId> = Vec::with_capacity(dag.len());
    for node in dag.nodes() {
        let node = node.with_operands(
            &node
                .operands()
                .iter()
                .map(|o| final_remap[*o])
                .collect::<Vec<_>>(),
        );
        let node = match node {
            Ir::Basis { table, arg } => Ir::Basis {
                table: table_remap[&table],
                arg,
            },
            Ir::Coeff {
                table,
                coeff,
                block,
            } => Ir::Coeff {
                table: table_remap[&table],
                coeff,
                block,
            },
            x => x,
        };
        final_remap.push(rewritten.insert(node));
    }

    LoweredIntegrand {
        root: final_remap[remap[&li.root]],
        dag: rewritten,
        tables,
    }
}

fn visit(
    li: &LoweredIntegrand,
    id: NodeId,
    dag: &mut IrDag,
    remap: &mut HashMap<NodeId, NodeId>,
    used_tables: &mut Vec<TableId>,
) -> NodeId {
    if let Some(new) = remap.get(&id) {
        return *new;
    }
    let node = li.dag.node(id);
    let ops = node
        .operands()
        .iter()
        .map(|o| visit(li, *o, dag, remap, used_tables))
        .collect::<Vec<_>>();
    match node {
        Ir::Basis { table, .. } | Ir::Coeff { table, .. } => {
            if !used_tables.contains(table) {
                used_tables.push(*table);
            }
        }
        _ => {}
    }
    let new = dag.insert(node.with_operands(&ops));
    remap.insert(id, new);
    new
}
