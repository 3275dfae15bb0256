use anyhow::*;
use log::*;
use serde::{Deserialize, Serialize};

use crate::classifier;
use crate::errors::ConfigError;
use crate::form::{Expr, Form, Integral, MetaValue, Representation};
use crate::FormcParameters;

/// The effective per-integral options after overlaying compiler defaults,
/// form-level defaults and the integral's own metadata.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct ResolvedMetadata {
    pub quadrature_degree: usize,
    pub representation: Representation,
    pub num_cells: usize,
}

/// Compute the effective metadata of one integral. `quadrature_degree =
/// "auto"` resolves from the total polynomial degree of the integrand:
/// all arguments *and* coefficients count, since an undifferentiated
/// coefficient raises the integrand degree just as well. An integrand
/// whose degree cannot be determined falls back to a conservative ceiling
/// with a warning.
pub fn resolve(
    form: &Form,
    integral: &Integral,
    params: &FormcParameters,
) -> Result<ResolvedMetadata> {
    let mut metadata = params.as_metadata();
    metadata.overlay(&form.metadata);
    metadata.overlay(&integral.measure.metadata);

    let representation = match metadata.get("representation") {
        None => Representation::Quadrature,
        Some(MetaValue::Str(s)) if s == "quadrature" => Representation::Quadrature,
        Some(MetaValue::Str(s)) if s == "uflacs" => Representation::Uflacs,
        Some(v) => {
            return Err(ConfigError::InvalidRepresentation(
                integral.handle.clone(),
                v.to_string(),
            )
            .into())
        }
    };

    let auto_degree = || {
        let degree = match estimate_degree(&integral.integrand, form) {
            Some(d) => d,
            None => {
                warn!(
                    "{}: cannot determine the polynomial degree of the integrand, \
                     falling back to degree {}",
                    integral.handle, params.degree_fallback
                );
                params.degree_fallback
            }
        };
        info!("{}: quadrature_degree: auto --> {}", integral.handle, degree);
        degree
    };
    let quadrature_degree = match metadata.get("quadrature_degree") {
        None => auto_degree(),
        Some(MetaValue::Str(s)) if s == "auto" => auto_degree(),
        Some(MetaValue::Int(d)) if *d >= 0 => *d as usize,
        Some(v) => {
            return Err(ConfigError::InvalidQuadratureDegree(
                integral.handle.clone(),
                v.to_string(),
            )
            .into())
        }
    };

    Ok(ResolvedMetadata {
        quadrature_degree,
        representation,
        num_cells: classifier::num_cells(integral),
    })
}

/// Total polynomial degree of an integrand: sums over products, maxima
/// over sums, derivatives left unreduced (conservative on mapped cells).
/// `None` when the integrand is not polynomial in the basis data, e.g. a
/// division by a non-constant.
pub fn estimate_degree(e: &Expr, form: &Form) -> Option<usize> {
    match e {
        Expr::Argument(n) => Some(form.argument_element(*n)?.degree()),
        Expr::Coefficient(k) => Some(form.coefficient_element(*k)?.degree()),
        Expr::Constant(_) | Expr::FacetNormal | Expr::Circumradius | Expr::CellVolume => Some(0),
        Expr::Grad(e) | Expr::Div(e) => estimate_degree(e, form),
        Expr::Inner(a, b) | Expr::Dot(a, b) | Expr::Outer(a, b) | Expr::Mul(a, b) => {
            Some(estimate_degree(a, form)? + estimate_degree(b, form)?)
        }
        Expr::Add(a, b) | Expr::Sub(a, b) => {
            Some(estimate_degree(a, form)?.max(estimate_degree(b, form)?))
        }
        Expr::Division(a, b) => {
            // polynomial only when dividing by something of degree zero
            let db = estimate_degree(b, form)?;
            if db == 0 {
                estimate_degree(a, form)
            } else {
                None
            }
        }
        Expr::Neg(e) | Expr::Restrict(e, _) | Expr::Avg(e) | Expr::Jump(e) => {
            estimate_degree(e, form)
        }
    }
}
