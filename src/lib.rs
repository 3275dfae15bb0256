use anyhow::*;
use either::Either;
use itertools::Itertools;
use log::*;
use logging_timer::time;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub mod analysis;
pub mod classifier;
pub mod emitter;
pub mod errors;
pub mod form;
pub mod ir;
pub mod kernel;
pub mod lowering;
pub mod optimizer;
pub mod quadrature;
mod structs;
pub mod tabulation;

pub use crate::form::{DomainKind, Element, Expr, Form, Measure, Metadata, Representation, Side};
pub use crate::kernel::{Entity, KernelArgs, TabulationKernel};
pub use crate::structs::Handle;
pub use crate::tabulation::{BasisTabulator, LagrangeTabulator};

use crate::form::MetaValue;
use crate::tabulation::Caches;

/// Integrands whose polynomial degree cannot be estimated fall back to
/// this quadrature degree.
pub const DEFAULT_DEGREE_FALLBACK: usize = 6;

/// Tabulated values below this threshold count as structural zeros.
pub const DEFAULT_EPSILON: f64 = 1e-14;

/// Compiler-wide settings; per-form and per-integral metadata overlay the
/// first two.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FormcParameters {
    /// Quadrature degree to use for every integral; `None` means estimate
    /// it per integral from the integrand
    pub quadrature_degree: Option<usize>,
    pub representation: Representation,
    pub degree_fallback: usize,
    pub epsilon: f64,
}

impl Default for FormcParameters {
    fn default() -> Self {
        FormcParameters {
            quadrature_degree: None,
            representation: Representation::default(),
            degree_fallback: DEFAULT_DEGREE_FALLBACK,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl FormcParameters {
    /// The settings as the lowest-priority metadata layer
    pub(crate) fn as_metadata(&self) -> Metadata {
        let mut md = Metadata::default().with(
            "representation",
            MetaValue::from(match self.representation {
                Representation::Quadrature => "quadrature",
                Representation::Uflacs => "uflacs",
            }),
        );
        if let Some(degree) = self.quadrature_degree {
            md = md.with("quadrature_degree", MetaValue::from(degree as i64));
        }
        md
    }
}

/// Compile every integral of `form` into a tabulation kernel, one kernel
/// per integral, in declaration order. Integrals compile independently
/// and in parallel; if any fail, all their errors are reported at once.
#[time("info", "Compiling form")]
pub fn compile_form(
    form: &Form,
    params: &FormcParameters,
    tabulator: &dyn BasisTabulator,
) -> Result<Vec<TabulationKernel>> {
    ensure!(
        !form.integrals.is_empty(),
        "form `{}` defines no integrals",
        form.name
    );
    let groups = classifier::classify(form)?;
    info!(
        "compiling `{}`: {} integral(s) in {} group(s)",
        form.name,
        form.integrals.len(),
        groups.len()
    );

    let caches = Caches::default();
    let (kernels, failures): (Vec<_>, Vec<_>) = form
        .integrals
        .par_iter()
        .map(|integral| compile_integral(form, integral, params, tabulator, &caches))
        .collect::<Vec<_>>()
        .into_iter()
        .partition_map(|r| match r {
            Result::Ok(k) => Either::Left(k),
            Result::Err(e) => Either::Right(e),
        });

    if !failures.is_empty() {
        bail!(
            "unable to compile `{}`:\n{}",
            form.name,
            failures.iter().map(|e| format!("{:#}", e)).join("\n")
        );
    }

    Ok(kernels)
}

/// The per-integral pipeline: resolve metadata, build the quadrature
/// scheme, lower, optimize, emit.
fn compile_integral(
    form: &Form,
    integral: &form::Integral,
    params: &FormcParameters,
    tabulator: &dyn BasisTabulator,
    caches: &Caches,
) -> Result<TabulationKernel> {
    let cell = form
        .cell()
        .with_context(|| format!("{}: form `{}` carries no element", integral.handle, form.name))?;
    let md = analysis::resolve(form, integral, params)?;
    debug!(
        "{}: degree {}, {:?}, {} cell(s)",
        integral.handle, md.quadrature_degree, md.representation, md.num_cells
    );
    let scheme = caches.scheme(
        integral.measure.kind,
        cell,
        md.quadrature_degree,
        md.num_cells,
    );
    let lowered = lowering::lower(form, integral, &scheme, &md, tabulator, caches)?;
    let optimized = optimizer::optimize(&lowered, form.rank(), md.representation, params.epsilon);
    emitter::emit(form, integral, optimized, scheme, md)
}
