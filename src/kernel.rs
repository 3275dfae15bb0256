use anyhow::*;
use serde::{Deserialize, Serialize};

use crate::analysis::ResolvedMetadata;
use crate::form::{DomainKind, Point, ReferenceCell};
use crate::ir::{Geom, Ir, Program};
use crate::lowering::TableSet;
use crate::quadrature::QuadratureScheme;
use crate::structs::Handle;

/// Which local mesh entity a kernel invocation integrates over, for the
/// domain kinds that need one.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Entity {
    /// Local facet index of the cell
    Facet(usize),
    /// Local facet indices of the `+` and `-` cells at a shared facet
    FacetPair(usize, usize),
    /// Local vertex index of the cell
    Vertex(usize),
}

/// Runtime inputs of a tabulation kernel: one coordinate block per
/// constituent cell, per-cell dof blocks concatenated per coefficient,
/// and the local entity where the domain kind requires one.
pub struct KernelArgs<'a> {
    pub coordinates: &'a [Vec<Point>],
    pub coefficients: &'a [Vec<f64>],
    pub entity: Option<Entity>,
}

/// The compiled artifact of one integral: a frozen, optimized program
/// plus everything needed to run it. Created once by the emitter, never
/// mutated afterwards; the output tensor is dense, row-major by
/// (test index, trial index).
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct TabulationKernel {
    pub handle: Handle,
    pub kind: DomainKind,
    pub subdomain: Option<usize>,
    pub metadata: ResolvedMetadata,
    /// Output tensor rank: one index per argument
    pub rank: usize,
    /// Extent of each output index: restriction blocks x local space dim
    pub dims: Vec<usize>,
    /// Number of constituent cells (coordinate blocks) the kernel reads
    pub num_cells: usize,
    pub(crate) cell: ReferenceCell,
    pub(crate) program: Program,
    pub(crate) tables: TableSet,
    pub(crate) scheme: QuadratureScheme,
    /// Local space dimension per argument (one restriction block)
    pub(crate) arg_space_dims: Vec<usize>,
    /// Local space dimension per coefficient (one restriction block)
    pub(crate) coeff_space_dims: Vec<usize>,
}

impl TabulationKernel {
    /// Number of entries of the output tensor
    pub fn tensor_size(&self) -> usize {
        self.dims.iter().product::<usize>().max(1)
    }

    /// Run the kernel: evaluate the integrand at every quadrature point
    /// and accumulate weight x value into the local tensor.
    pub fn tabulate(&self, args: &KernelArgs) -> Result<Vec<f64>> {
        ensure!(
            args.coordinates.len() == self.num_cells,
            "{}: expected {} coordinate block(s), got {}",
            self.handle,
            self.num_cells,
            args.coordinates.len()
        );
        for coords in args.coordinates.iter() {
            ensure!(
                coords.len() == self.cell.num_vertices(),
                "{}: expected {} vertices per {}, got {}",
                self.handle,
                self.cell.num_vertices(),
                self.cell,
                coords.len()
            );
        }
        ensure!(
            args.coefficients.len() == self.coeff_space_dims.len(),
            "{}: expected {} coefficient(s), got {}",
            self.handle,
            self.coeff_space_dims.len(),
            args.coefficients.len()
        );
        for (k, (w, sd)) in args
            .coefficients
            .iter()
            .zip(self.coeff_space_dims.iter())
            .enumerate()
        {
            ensure!(
                w.len() == self.num_cells * sd,
                "{}: coefficient #{} carries {} dofs, expected {}",
                self.handle,
                k,
                w.len(),
                self.num_cells * sd
            );
        }
        let entities = self.entities(args)?;

        let geometry = args
            .coordinates
            .iter()
            .zip(entities.iter())
            .map(|(coords, entity)| CellGeometry::compute(self.cell, coords, self.kind, *entity))
            .collect::<Result<Vec<_>>>()?;

        // nodes grouped by the loop level they are evaluated at
        let levels = &self.program.levels;
        let by_level: Vec<Vec<usize>> = (0..4)
            .map(|l| {
                (0..self.program.dag.len())
                    .filter(|id| levels[*id] == l as u8)
                    .collect()
            })
            .collect();

        let d0 = self.dims.first().copied().unwrap_or(1);
        let d1 = self.dims.get(1).copied().unwrap_or(1);
        let mut out = vec![0.; self.tensor_size()];
        let mut values = vec![0.; self.program.dag.len()];
        let weights = self.scheme.weights().to_vec();

        for id in by_level[0].iter() {
            self.eval(*id, &mut values, &geometry, &entities, args, &weights, 0, 0, 0);
        }
        for ip in 0..self.scheme.num_points() {
            for id in by_level[1].iter() {
                self.eval(*id, &mut values, &geometry, &entities, args, &weights, ip, 0, 0);
            }
            for i in 0..d0 {
                for id in by_level[2].iter() {
                    self.eval(*id, &mut values, &geometry, &entities, args, &weights, ip, i, 0);
                }
                for j in 0..d1 {
                    for id in by_level[3].iter() {
                        self.eval(
                            *id, &mut values, &geometry, &entities, args, &weights, ip, i, j,
                        );
                    }
                    out[i * d1 + j] += values[self.program.root];
                }
            }
        }
        Ok(out)
    }

    /// The local entity index each constituent cell reads its tables at
    fn entities(&self, args: &KernelArgs) -> Result<Vec<usize>> {
        match (self.kind, args.entity) {
            (DomainKind::Cell, None) | (DomainKind::Custom, None) => {
                Ok(vec![0; self.num_cells])
            }
            (DomainKind::ExteriorFacet, Some(Entity::Facet(f))) => {
                ensure!(
                    f < self.cell.num_facets(),
                    "{}: facet {} out of range",
                    self.handle,
                    f
                );
                Ok(vec![f])
            }
            (DomainKind::InteriorFacet, Some(Entity::FacetPair(fp, fm))) => {
                ensure!(
                    fp < self.cell.num_facets() && fm < self.cell.num_facets(),
                    "{}: facet pair ({}, {}) out of range",
                    self.handle,
                    fp,
                    fm
                );
                Ok(vec![fp, fm])
            }
            (DomainKind::Vertex, Some(Entity::Vertex(v))) => {
                ensure!(
                    v < self.cell.num_vertices(),
                    "{}: vertex {} out of range",
                    self.handle,
                    v
                );
                Ok(vec![v])
            }
            (kind, entity) => bail!(
                "{}: {} kernels cannot be called with entity {:?}",
                self.handle,
                kind,
                entity
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn eval(
        &self,
        id: usize,
        values: &mut [f64],
        geometry: &[CellGeometry],
        entities: &[usize],
        args: &KernelArgs,
        weights: &[f64],
        ip: usize,
        i: usize,
        j: usize,
    ) {
        let v = match self.program.dag.node(id) {
            Ir::Lit(bits) => f64::from_bits(*bits),
            Ir::Weight => weights[ip],
            Ir::Scale(block) => geometry[*block].scale,
            Ir::Geom { q, block } => geometry[*block].quantity(*q),
            Ir::Basis { table, arg } => {
                let key = self.tables.key(*table);
                let sd = self.arg_space_dims[*arg];
                let idx = if *arg == 0 { i } else { j };
                if idx / sd == key.block {
                    self.tables
                        .grid(*table, entities[key.block])
                        .get(ip, idx % sd)
                } else {
                    0.
                }
            }
            Ir::Coeff {
                table,
                coeff,
                block,
            } => {
                let sd = self.coeff_space_dims[*coeff];
                let grid = self.tables.grid(*table, entities[*block]);
                let dofs = &args.coefficients[*coeff][block * sd..(block + 1) * sd];
                dofs.iter()
                    .enumerate()
                    .map(|(dof, w)| grid.get(ip, dof) * w)
                    .sum()
            }
            Ir::Add(a, b) => values[*a] + values[*b],
            Ir::Sub(a, b) => values[*a] - values[*b],
            Ir::Mul(a, b) => values[*a] * values[*b],
            Ir::Div(a, b) => values[*a] / values[*b],
            Ir::Neg(a) => -values[*a],
        };
        values[id] = v;
    }
}

/// Per-cell geometric quantities of an affine simplex, computed once per
/// kernel invocation.
struct CellGeometry {
    inv: [[f64; 3]; 3],
    scale: f64,
    normal: [f64; 3],
    circumradius: f64,
    volume: f64,
}

impl CellGeometry {
    fn compute(
        cell: ReferenceCell,
        coords: &[Point],
        kind: DomainKind,
        entity: usize,
    ) -> Result<CellGeometry> {
        let dim = cell.dim();
        let mut jac = [[0.; 3]; 3];
        for c in 0..dim {
            for r in 0..dim {
                jac[r][c] = coords[c + 1][r] - coords[0][r];
            }
        }
        // pad so the 3x3 determinant equals the dim x dim one
        for d in dim..3 {
            jac[d][d] = 1.;
        }
        let det = det3(&jac);
        ensure!(det.abs() > 0., "degenerate {}", cell);
        let inv = inv3(&jac, det);

        let volume = det.abs() * cell.volume();
        let circumradius = circumradius(cell, coords);

        let (scale, normal) = match kind {
            DomainKind::Cell | DomainKind::Custom => (det.abs(), [0.; 3]),
            DomainKind::Vertex => (1., [0.; 3]),
            DomainKind::ExteriorFacet | DomainKind::InteriorFacet => {
                facet_scale_and_normal(cell, coords, entity)
            }
        };

        Ok(CellGeometry {
            inv,
            scale,
            normal,
            circumradius,
            volume,
        })
    }

    fn quantity(&self, q: Geom) -> f64 {
        match q {
            Geom::JacobianInv(r, c) => self.inv[r][c],
            Geom::FacetNormal(d) => self.normal[d],
            Geom::Circumradius => self.circumradius,
            Geom::CellVolume => self.volume,
        }
    }
}

/// Affine scale factor of the given local facet and the outward unit
/// normal of the cell at it. The scale is the Jacobian norm of the map
/// from the reference facet, not the facet measure: the reference-facet
/// weights already sum to the reference measure.
fn facet_scale_and_normal(
    cell: ReferenceCell,
    coords: &[Point],
    facet: usize,
) -> (f64, [f64; 3]) {
    let fv = cell.facet_vertices(facet);
    let pv: Vec<Point> = fv.iter().map(|v| coords[*v]).collect();
    let centroid = |pts: &[Point]| {
        let mut c = [0.; 3];
        for p in pts {
            for d in 0..3 {
                c[d] += p[d] / pts.len() as f64;
            }
        }
        c
    };
    let cell_centroid = centroid(coords);
    let facet_centroid = centroid(&pv);

    let (measure, mut normal) = match cell {
        ReferenceCell::Interval => (1., [1., 0., 0.]),
        ReferenceCell::Triangle => {
            let t = sub(&pv[1], &pv[0]);
            (norm(&t), [t[1], -t[0], 0.])
        }
        ReferenceCell::Tetrahedron => {
            let e1 = sub(&pv[1], &pv[0]);
            let e2 = sub(&pv[2], &pv[0]);
            let n = cross(&e1, &e2);
            (norm(&n), n)
        }
    };
    let len = norm(&normal);
    for d in 0..3 {
        normal[d] /= len;
    }
    // orient outward
    let outward = sub(&facet_centroid, &cell_centroid);
    if dot(&normal, &outward) < 0. {
        for d in 0..3 {
            normal[d] = -normal[d];
        }
    }
    (measure, normal)
}

fn circumradius(cell: ReferenceCell, coords: &[Point]) -> f64 {
    match cell {
        ReferenceCell::Interval => 0.5 * norm(&sub(&coords[1], &coords[0])),
        ReferenceCell::Triangle => {
            let a = norm(&sub(&coords[1], &coords[0]));
            let b = norm(&sub(&coords[2], &coords[1]));
            let c = norm(&sub(&coords[0], &coords[2]));
            let s = 0.5 * (a + b + c);
            let area = (s * (s - a) * (s - b) * (s - c)).max(0.).sqrt();
            a * b * c / (4. * area)
        }
        ReferenceCell::Tetrahedron => {
            // circumcenter from 2 (v_i - v_0) . c = |v_i|^2 - |v_0|^2
            let mut m = [[0.; 3]; 3];
            let mut rhs = [0.; 3];
            for i in 0..3 {
                let d = sub(&coords[i + 1], &coords[0]);
                for r in 0..3 {
                    m[i][r] = 2. * d[r];
                }
                rhs[i] = dot(&coords[i + 1], &coords[i + 1]) - dot(&coords[0], &coords[0]);
            }
            let det = det3(&m);
            let inv = inv3(&m, det);
            let mut center = [0.; 3];
            for r in 0..3 {
                for c in 0..3 {
                    center[r] += inv[r][c] * rhs[c];
                }
            }
            norm(&sub(&center, &coords[0]))
        }
    }
}

fn sub(a: &Point, b: &Point) -> Point {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: &Point, b: &Point) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: &Point, b: &Point) -> Point {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: &Point) -> f64 {
    dot(a, a).sqrt()
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn inv3(m: &[[f64; 3]; 3], det: f64) -> [[f64; 3]; 3] {
    let mut inv = [[0.; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            let (r1, r2) = ((r + 1) % 3, (r + 2) % 3);
            let (c1, c2) = ((c + 1) % 3, (c + 2) % 3);
            // transposed cofactor
            inv[c][r] = (m[r1][c1] * m[r2][c2] - m[r1][c2] * m[r2][c1]) / det;
        }
    }
    inv
}
