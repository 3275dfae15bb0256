use std::sync::{Arc, Mutex};

use anyhow::*;
use cached::{Cached, UnboundCache};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::form::{DomainKind, Element, Point, ReferenceCell};
use crate::quadrature::{self, QuadratureScheme, Rule};

/// Which tabulated quantity a table holds: basis values or one reference
/// direction of their first derivatives.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Deriv {
    Value,
    Grad(usize),
}

/// A dense table of basis-function data at quadrature points;
/// `data[ip * ndofs + dof]`.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Grid {
    pub npts: usize,
    pub ndofs: usize,
    pub data: Vec<f64>,
}

impl Grid {
    pub fn zeros(npts: usize, ndofs: usize) -> Self {
        Grid {
            npts,
            ndofs,
            data: vec![0.; npts * ndofs],
        }
    }

    #[inline]
    pub fn get(&self, ip: usize, dof: usize) -> f64 {
        self.data[ip * self.ndofs + dof]
    }

    #[inline]
    pub fn set(&mut self, ip: usize, dof: usize, v: f64) {
        self.data[ip * self.ndofs + dof] = v;
    }

    /// A table every entry of which vanishes contributes nothing to the
    /// element tensor and can be pruned wholesale.
    pub fn is_zero(&self, epsilon: f64) -> bool {
        self.data.iter().all(|v| v.abs() <= epsilon)
    }
}

/// The basis-tabulation collaborator: given an element, a derivative
/// selector, a value component and reference points, produce the table of
/// basis data at those points.
pub trait BasisTabulator: Sync {
    fn tabulate(
        &self,
        element: &Element,
        deriv: Deriv,
        component: usize,
        points: &[Point],
    ) -> Result<Grid>;
}

/// Reference Lagrange tabulator: degrees 1 and 2 on simplices, assembled
/// from barycentric coordinates (whose reference gradients are constant).
pub struct LagrangeTabulator;

impl BasisTabulator for LagrangeTabulator {
    fn tabulate(
        &self,
        element: &Element,
        deriv: Deriv,
        component: usize,
        points: &[Point],
    ) -> Result<Grid> {
        ensure!(
            component < element.value_size(),
            "component {} out of range for {}",
            component,
            element.describe()
        );
        match element {
            Element::Lagrange { cell, degree } => {
                let mut grid = Grid::zeros(points.len(), element.space_dim());
                for (ip, p) in points.iter().enumerate() {
                    for (dof, v) in scalar_basis(*cell, *degree, p, deriv)?.iter().enumerate() {
                        grid.set(ip, dof, *v);
                    }
                }
                Ok(grid)
            }
            Element::Vector {
                cell,
                degree,
                components,
            } => {
                // per-component dof blocks; only the matching block is
                // nonzero for a given value component
                let scalar = Element::lagrange(*cell, *degree);
                let n = scalar.space_dim();
                let mut grid = Grid::zeros(points.len(), components * n);
                for (ip, p) in points.iter().enumerate() {
                    for (dof, v) in scalar_basis(*cell, *degree, p, deriv)?.iter().enumerate() {
                        grid.set(ip, component * n + dof, *v);
                    }
                }
                Ok(grid)
            }
            Element::Mixed { subs } => {
                let mut grid = Grid::zeros(points.len(), element.space_dim());
                let mut dof_offset = 0;
                let mut comp_offset = 0;
                for sub in subs {
                    if component >= comp_offset && component < comp_offset + sub.value_size() {
                        let sub_grid =
                            self.tabulate(sub, deriv, component - comp_offset, points)?;
                        for ip in 0..points.len() {
                            for dof in 0..sub.space_dim() {
                                grid.set(ip, dof_offset + dof, sub_grid.get(ip, dof));
                            }
                        }
                    }
                    dof_offset += sub.space_dim();
                    comp_offset += sub.value_size();
                }
                Ok(grid)
            }
        }
    }
}

/// Barycentric coordinates of a point and their (constant) reference
/// gradients.
fn barycentric(cell: ReferenceCell, p: &Point) -> Vec<(f64, [f64; 3])> {
    let dim = cell.dim();
    let mut lambdas = Vec::with_capacity(dim + 1);
    let l0 = 1. - p[..dim].iter().sum::<f64>();
    let mut g0 = [0.; 3];
    g0[..dim].fill(-1.);
    lambdas.push((l0, g0));
    for d in 0..dim {
        let mut g = [0.; 3];
        g[d] = 1.;
        lambdas.push((p[d], g));
    }
    lambdas
}

/// Scalar Lagrange basis at one point: vertex nodes first, then edge
/// nodes in the cell's edge ordering.
fn scalar_basis(
    cell: ReferenceCell,
    degree: usize,
    p: &Point,
    deriv: Deriv,
) -> Result<Vec<f64>> {
    let lambdas = barycentric(cell, p);
    let pick = |value: f64, grad: [f64; 3]| match deriv {
        Deriv::Value => value,
        Deriv::Grad(d) => grad[d],
    };
    match degree {
        1 => Ok(lambdas.iter().map(|(l, g)| pick(*l, *g)).collect()),
        2 => {
            let mut out = Vec::with_capacity(cell.num_vertices() + cell.edges().len());
            for (l, g) in lambdas.iter() {
                let mut grad = [0.; 3];
                for d in 0..3 {
                    grad[d] = (4. * l - 1.) * g[d];
                }
                out.push(pick(l * (2. * l - 1.), grad));
            }
            for (a, b) in cell.edges() {
                let (la, ga) = lambdas[*a];
                let (lb, gb) = lambdas[*b];
                let mut grad = [0.; 3];
                for d in 0..3 {
                    grad[d] = 4. * (la * gb[d] + lb * ga[d]);
                }
                out.push(pick(4. * la * lb, grad));
            }
            Ok(out)
        }
        _ => Err(ConfigError::UnsupportedElement(format!(
            "Lagrange degree {} on {}",
            degree, cell
        ))
        .into()),
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct TabulationKey {
    element: Element,
    deriv: Deriv,
    component: usize,
    points: Vec<[u64; 3]>,
}

fn point_bits(points: &[Point]) -> Vec<[u64; 3]> {
    points
        .iter()
        .map(|p| [p[0].to_bits(), p[1].to_bits(), p[2].to_bits()])
        .collect()
}

/// Process-wide memoization services, dependency-passed into the
/// per-integral pipelines: many integrals share elements, so identical
/// (element, degree) requests are answered once. Insert-once-per-key
/// under a mutex keeps the pipelines lock-light.
pub struct Caches {
    quadrature: Mutex<UnboundCache<(ReferenceCell, usize), Arc<Rule>>>,
    tabulation: Mutex<UnboundCache<TabulationKey, Arc<Grid>>>,
}

impl Default for Caches {
    fn default() -> Self {
        Caches {
            quadrature: Mutex::new(UnboundCache::new()),
            tabulation: Mutex::new(UnboundCache::new()),
        }
    }
}

impl Caches {
    /// Memoized variant of [`quadrature::build_scheme`]
    pub fn scheme(
        &self,
        kind: DomainKind,
        cell: ReferenceCell,
        degree: usize,
        num_cells: usize,
    ) -> QuadratureScheme {
        match kind {
            DomainKind::Cell | DomainKind::Custom => {
                let rule = self.cell_rule(cell, degree);
                let n = if kind == DomainKind::Custom {
                    num_cells
                } else {
                    1
                };
                QuadratureScheme {
                    kind,
                    cell,
                    degree,
                    rules: (0..n).map(|_| rule.as_ref().clone()).collect(),
                }
            }
            _ => quadrature::build_scheme(kind, cell, degree, num_cells),
        }
    }

    fn cell_rule(&self, cell: ReferenceCell, degree: usize) -> Arc<Rule> {
        let mut cache = self.quadrature.lock().unwrap();
        if let Some(rule) = cache.cache_get(&(cell, degree)) {
            return rule.clone();
        }
        let rule = Arc::new(quadrature::cell_rule(cell, degree));
        cache.cache_set((cell, degree), rule.clone());
        rule
    }

    /// Memoized tabulation through the injected collaborator
    pub fn tabulate(
        &self,
        tabulator: &dyn BasisTabulator,
        element: &Element,
        deriv: Deriv,
        component: usize,
        points: &[Point],
    ) -> Result<Arc<Grid>> {
        let key = TabulationKey {
            element: element.clone(),
            deriv,
            component,
            points: point_bits(points),
        };
        {
            let mut cache = self.tabulation.lock().unwrap();
            if let Some(grid) = cache.cache_get(&key) {
                return Ok(grid.clone());
            }
        }
        // tabulate outside the lock; a racing duplicate insert is benign
        let grid = Arc::new(tabulator.tabulate(element, deriv, component, points)?);
        self.tabulation
            .lock()
            .unwrap()
            .cache_set(key, grid.clone());
        Ok(grid)
    }
}
