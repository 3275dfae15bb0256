use serde::{Deserialize, Serialize};

use crate::form::{DomainKind, Point, ReferenceCell};

/// A quadrature rule on a reference domain: weights sum to the domain
/// measure.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub points: Vec<Point>,
    pub weights: Vec<f64>,
}

impl Rule {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// The quadrature scheme of one integral. For custom domains there is one
/// independent rule per constituent cell; for facet kinds the single rule
/// lives on the reference facet and is mapped into cell coordinates per
/// local facet index; vertex integrals carry a single unit-weight point.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct QuadratureScheme {
    pub kind: DomainKind,
    pub cell: ReferenceCell,
    pub degree: usize,
    pub rules: Vec<Rule>,
}

impl QuadratureScheme {
    pub fn num_points(&self) -> usize {
        self.rules[0].len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.rules[0].weights
    }

    /// How many table variants per restriction block the kernel must
    /// carry: one per local facet for facet integrals, one per vertex for
    /// vertex integrals, a single one otherwise.
    pub fn num_entities(&self) -> usize {
        match self.kind {
            DomainKind::Cell | DomainKind::Custom => 1,
            DomainKind::ExteriorFacet | DomainKind::InteriorFacet => self.cell.num_facets(),
            DomainKind::Vertex => self.cell.num_vertices(),
        }
    }

    /// Quadrature points in the reference coordinates of constituent cell
    /// `block`, for the given local entity index. Because cells order
    /// their vertices by ascending global index, mapping the facet rule
    /// through the facet-vertex lists of the two adjacent cells yields the
    /// same physical points on both sides of an interior facet.
    pub fn mapped_points(&self, entity: usize, block: usize) -> Vec<Point> {
        match self.kind {
            DomainKind::Cell => self.rules[0].points.clone(),
            DomainKind::Custom => self.rules[block].points.clone(),
            DomainKind::Vertex => vec![self.cell.vertices()[entity]],
            DomainKind::ExteriorFacet | DomainKind::InteriorFacet => {
                let vertices = self.cell.vertices();
                let fv = self.cell.facet_vertices(entity);
                self.rules[0]
                    .points
                    .iter()
                    .map(|p| {
                        let mut x = vertices[fv[0]];
                        for (k, fvk) in fv.iter().enumerate().skip(1) {
                            for d in 0..3 {
                                x[d] += p[k - 1] * (vertices[*fvk][d] - vertices[fv[0]][d]);
                            }
                        }
                        x
                    })
                    .collect()
            }
        }
    }
}

/// Build the scheme for (domain kind, degree, cell count): points and
/// weights exact for polynomials up to `degree` on the relevant reference
/// domain(s). Degree 0 still yields at least one point.
pub fn build_scheme(
    kind: DomainKind,
    cell: ReferenceCell,
    degree: usize,
    num_cells: usize,
) -> QuadratureScheme {
    let rules = match kind {
        DomainKind::Cell => vec![cell_rule(cell, degree)],
        DomainKind::Custom => (0..num_cells).map(|_| cell_rule(cell, degree)).collect(),
        DomainKind::ExteriorFacet | DomainKind::InteriorFacet => vec![facet_rule(cell, degree)],
        DomainKind::Vertex => vec![Rule {
            points: vec![[0., 0., 0.]],
            weights: vec![1.],
        }],
    };
    QuadratureScheme {
        kind,
        cell,
        degree,
        rules,
    }
}

/// Rule on the reference facet of `cell`; for intervals the facet is a
/// point.
fn facet_rule(cell: ReferenceCell, degree: usize) -> Rule {
    match cell.facet_cell() {
        Some(fc) => cell_rule(fc, degree),
        None => Rule {
            points: vec![[0., 0., 0.]],
            weights: vec![1.],
        },
    }
}

pub fn cell_rule(cell: ReferenceCell, degree: usize) -> Rule {
    match cell {
        ReferenceCell::Interval => interval_rule(degree),
        ReferenceCell::Triangle => triangle_rule(degree),
        ReferenceCell::Tetrahedron => tetrahedron_rule(degree),
    }
}

fn interval_rule(degree: usize) -> Rule {
    let (xs, ws) = gauss_legendre(degree / 2 + 1);
    Rule {
        points: xs.iter().map(|x| [*x, 0., 0.]).collect(),
        weights: ws,
    }
}

/// Collapsed tensor rule on the reference triangle. The Duffy map
/// x = a, y = b(1-a) introduces a (1-a) factor, so the a-direction order
/// is raised by one degree to stay exact.
fn triangle_rule(degree: usize) -> Rule {
    let (xa, wa) = gauss_legendre((degree + 1) / 2 + 1);
    let (xb, wb) = gauss_legendre(degree / 2 + 1);
    let mut points = Vec::with_capacity(xa.len() * xb.len());
    let mut weights = Vec::with_capacity(xa.len() * xb.len());
    for (a, wa) in xa.iter().zip(wa.iter()) {
        for (b, wb) in xb.iter().zip(wb.iter()) {
            points.push([*a, b * (1. - a), 0.]);
            weights.push(wa * wb * (1. - a));
        }
    }
    Rule { points, weights }
}

/// Collapsed tensor rule on the reference tetrahedron, with the two
/// collapse factors absorbed into raised per-direction orders.
fn tetrahedron_rule(degree: usize) -> Rule {
    let (xa, wa) = gauss_legendre((degree + 2) / 2 + 1);
    let (xb, wb) = gauss_legendre((degree + 1) / 2 + 1);
    let (xc, wc) = gauss_legendre(degree / 2 + 1);
    let mut points = Vec::new();
    let mut weights = Vec::new();
    for (a, wa) in xa.iter().zip(wa.iter()) {
        for (b, wb) in xb.iter().zip(wb.iter()) {
            for (c, wc) in xc.iter().zip(wc.iter()) {
                points.push([*a, b * (1. - a), c * (1. - a) * (1. - b)]);
                weights.push(wa * wb * wc * (1. - a) * (1. - a) * (1. - b));
            }
        }
    }
    Rule { points, weights }
}

/// n-point Gauss-Legendre rule on [0, 1], exact for degree 2n-1.
/// Nodes are found by Newton iteration from the Chebyshev estimate.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    assert!(n >= 1);
    let mut xs = vec![0.; n];
    let mut ws = vec![0.; n];
    for i in 0..n {
        let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        for _ in 0..100 {
            let (p, dp) = legendre(n, x);
            let dx = p / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let (_, dp) = legendre(n, x);
        // map from [-1, 1] to [0, 1]
        xs[i] = 0.5 * (1. + x);
        ws[i] = 1. / ((1. - x * x) * dp * dp);
    }
    (xs, ws)
}

/// Legendre polynomial P_n and its derivative at x, by recurrence
fn legendre(n: usize, x: f64) -> (f64, f64) {
    let mut p0 = 1.;
    let mut p1 = x;
    if n == 0 {
        return (1., 0.);
    }
    for k in 2..=n {
        let k = k as f64;
        let p2 = ((2. * k - 1.) * x * p1 - (k - 1.) * p0) / k;
        p0 = p1;
        p1 = p2;
    }
    let dp = n as f64 * (x * p1 - p0) / (x * x - 1.);
    (p1, dp)
}
