mod fold;
mod levels;
mod renumber;

pub use fold::fold;
pub use levels::assign_levels;
pub use renumber::renumber;

use log::*;
use serde::{Deserialize, Serialize};

use crate::form::Representation;
use crate::lowering::LoweredIntegrand;

/// Optimized IR plus the loop level of every node. Both passes below are
/// deterministic functions of the DAG structure, so re-optimizing an
/// already-optimized integrand is a byte-identical no-op.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct OptimizedIntegrand {
    pub lowered: LoweredIntegrand,
    pub levels: Vec<u8>,
}

/// Optimize a lowered integrand: constant folding and multiply-by-zero
/// pruning (including structurally-zero tables), value-numbered rebuild
/// in canonical topological order with dead nodes and dead tables swept,
/// then loop-level assignment. Sums and products are only reassociated by
/// exact neutral/absorbing elements, so results stay within the numeric
/// tolerance contract.
pub fn optimize(
    li: &LoweredIntegrand,
    rank: usize,
    representation: Representation,
    epsilon: f64,
) -> OptimizedIntegrand {
    let before = li.dag.len();
    let folded = fold(li, epsilon);
    let lowered = renumber(&folded);
    let levels = assign_levels(&lowered, rank, representation);
    debug!(
        "optimizer: {} -> {} node(s), {} table(s)",
        before,
        lowered.dag.len(),
        lowered.tables.len()
    );
    OptimizedIntegrand { lowered, levels }
}
