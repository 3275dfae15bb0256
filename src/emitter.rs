use anyhow::*;

use crate::analysis::ResolvedMetadata;
use crate::errors::ConfigError;
use crate::form::{DomainKind, Form, Integral};
use crate::ir::Program;
use crate::kernel::TabulationKernel;
use crate::optimizer::OptimizedIntegrand;
use crate::quadrature::QuadratureScheme;

/// Freeze an optimized integrand into a runnable kernel. Pure: everything
/// the kernel needs at runtime is copied in here, nothing is shared with
/// the compilation pipeline afterwards.
pub fn emit(
    form: &Form,
    integral: &Integral,
    opt: OptimizedIntegrand,
    scheme: QuadratureScheme,
    metadata: ResolvedMetadata,
) -> Result<TabulationKernel> {
    let kind = integral.measure.kind;
    let num_cells = match kind {
        DomainKind::InteriorFacet => 2,
        DomainKind::Custom => metadata.num_cells,
        _ => 1,
    };

    let space_dim = |e: &crate::form::Element| -> Result<usize> {
        let sd = e.space_dim();
        if sd == 0 {
            Err(ConfigError::UnsupportedElement(e.describe()).into())
        } else {
            Ok(sd)
        }
    };
    let arg_space_dims = form
        .arguments
        .iter()
        .map(space_dim)
        .collect::<Result<Vec<_>>>()?;
    let coeff_space_dims = form
        .coefficients
        .iter()
        .map(space_dim)
        .collect::<Result<Vec<_>>>()?;

    // one output index per argument, spanning all restriction blocks
    let dims: Vec<usize> = arg_space_dims.iter().map(|sd| num_cells * sd).collect();

    Ok(TabulationKernel {
        handle: integral.handle.clone(),
        kind,
        subdomain: integral.measure.subdomain,
        metadata,
        rank: form.rank(),
        dims,
        num_cells,
        cell: form
            .cell()
            .with_context(|| format!("{}: form `{}` carries no element", integral.handle, form.name))?,
        program: Program {
            dag: opt.lowered.dag,
            root: opt.lowered.root,
            levels: opt.levels,
        },
        tables: opt.lowered.tables,
        scheme,
        arg_space_dims,
        coeff_space_dims,
    })
}
