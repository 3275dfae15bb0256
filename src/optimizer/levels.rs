use crate::form::Representation;
use crate::ir::{Ir, LEVEL_POINT, LEVEL_TEST};
use crate::lowering::LoweredIntegrand;

/// Assign each node the loop level it is evaluated at. Under the uflacs
/// representation a node sits at the outermost loop its dependencies
/// allow (geometry once per cell, coefficients once per point, basis
/// reads inside the argument loops); plain quadrature representation
/// evaluates everything in the innermost loop.
pub fn assign_levels(
    li: &LoweredIntegrand,
    rank: usize,
    representation: Representation,
) -> Vec<u8> {
    let innermost = LEVEL_POINT + rank as u8;
    match representation {
        Representation::Quadrature => vec![innermost; li.dag.len()],
        Representation::Uflacs => {
            let mut levels = Vec::with_capacity(li.dag.len());
            for node in li.dag.nodes() {
                let level = match node {
                    Ir::Lit(_) | Ir::Scale(_) | Ir::Geom { .. } => 0,
                    Ir::Weight | Ir::Coeff { .. } => LEVEL_POINT,
                    Ir::Basis { arg, .. } => LEVEL_TEST + *arg as u8,
                    op => op
                        .operands()
                        .iter()
                        .map(|o| levels[*o])
                        .max()
                        .unwrap_or(0),
                };
                levels.push(level.min(innermost));
            }
            levels
        }
    }
}
