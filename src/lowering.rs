use std::collections::HashMap;

use anyhow::*;
use serde::{Deserialize, Serialize};

use crate::analysis::ResolvedMetadata;
use crate::errors::ParseError;
use crate::form::{DomainKind, Element, Expr, Form, Integral, Side};
use crate::ir::{Geom, Ir, IrDag, NodeId, TableId};
use crate::quadrature::QuadratureScheme;
use crate::structs::Handle;
use crate::tabulation::{BasisTabulator, Caches, Deriv, Grid};

/// Identifies one tabulated table: which element, which derivative
/// direction, which value component, read on which constituent cell.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct TableKey {
    pub element: Element,
    pub deriv: Deriv,
    pub component: usize,
    pub block: usize,
}

/// The tables one integral's IR references. Each table holds one grid per
/// local entity (facet or vertex) so the kernel can switch on the runtime
/// entity index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TableSet {
    keys: Vec<TableKey>,
    grids: Vec<Vec<Grid>>,
    #[serde(skip)]
    by_key: HashMap<TableKey, TableId>,
}

impl PartialEq for TableSet {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys && self.grids == other.grids
    }
}

impl TableSet {
    pub fn ensure<F>(&mut self, key: TableKey, build: F) -> Result<TableId>
    where
        F: FnOnce() -> Result<Vec<Grid>>,
    {
        if let Some(id) = self.by_key.get(&key) {
            return Ok(*id);
        }
        let id = self.keys.len();
        self.grids.push(build()?);
        self.keys.push(key.clone());
        self.by_key.insert(key, id);
        Ok(id)
    }

    pub fn key(&self, id: TableId) -> &TableKey {
        &self.keys[id]
    }

    pub fn grid(&self, id: TableId, entity: usize) -> &Grid {
        &self.grids[id][entity]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// True iff the table vanishes identically on every entity variant
    pub fn is_zero(&self, id: TableId, epsilon: f64) -> bool {
        self.grids[id].iter().all(|g| g.is_zero(epsilon))
    }

    /// Keep only the listed tables, in order; returns old id -> new id
    pub fn retain(&mut self, used: &[TableId]) -> HashMap<TableId, TableId> {
        let mut remap = HashMap::new();
        let mut keys = Vec::new();
        let mut grids = Vec::new();
        for id in used {
            remap.insert(*id, keys.len());
            keys.push(self.keys[*id].clone());
            grids.push(self.grids[*id].clone());
        }
        self.by_key = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        self.keys = keys;
        self.grids = grids;
        remap
    }
}

/// The lowered integrand of one integral: a scalar IR rooted at `root`
/// (already folded with the quadrature weight and the measure scale
/// factor) plus the tables it references.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct LoweredIntegrand {
    pub dag: IrDag,
    pub root: NodeId,
    pub tables: TableSet,
}

/// A value under lowering: a (possibly empty) shape and one IR node per
/// scalar component, row-major.
#[derive(Clone, Debug)]
struct Val {
    shape: Vec<usize>,
    ids: Vec<NodeId>,
}

impl Val {
    fn scalar(id: NodeId) -> Val {
        Val {
            shape: vec![],
            ids: vec![id],
        }
    }

    fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    fn shape_str(&self) -> String {
        format!("{:?}", self.shape)
    }
}

/// Lower the symbolic integrand into scalar IR referencing concrete
/// tabulated basis values. Restrictions resolve which constituent cell's
/// data a sub-expression reads; differential operators are expanded with
/// the chain rule against the inverse Jacobian, which enters the arena
/// once and is shared.
pub fn lower(
    form: &Form,
    integral: &Integral,
    scheme: &QuadratureScheme,
    md: &ResolvedMetadata,
    tabulator: &dyn BasisTabulator,
    caches: &Caches,
) -> Result<LoweredIntegrand> {
    let num_blocks = match integral.measure.kind {
        DomainKind::InteriorFacet => 2,
        DomainKind::Custom => md.num_cells,
        _ => 1,
    };
    let mut ctx = Ctx {
        handle: &integral.handle,
        form,
        kind: integral.measure.kind,
        num_blocks,
        gdim: scheme.cell.dim(),
        scheme,
        tabulator,
        caches,
        dag: IrDag::default(),
        tables: TableSet::default(),
    };

    let integrand = ctx.lower_expr(&integral.integrand, None)?;
    if !integrand.is_scalar() {
        return Err(ParseError::InvalidShape(
            integral.handle.clone(),
            "scalar",
            format!("{} (shape {})", integral.integrand, integrand.shape_str()),
        )
        .into());
    }

    // weight x scale x integrand is what the kernel accumulates; the
    // measure scale is always cell 0's, which for interior facets is the
    // `+` side and for custom domains the cell whose rule carries the
    // weights
    let weight = ctx.dag.insert(Ir::Weight);
    let scale = ctx.dag.insert(Ir::Scale(0));
    let weighted = ctx.dag.mul(integrand.ids[0], weight);
    let root = ctx.dag.mul(weighted, scale);

    Ok(LoweredIntegrand {
        dag: ctx.dag,
        root,
        tables: ctx.tables,
    })
}

struct Ctx<'a> {
    handle: &'a Handle,
    form: &'a Form,
    kind: DomainKind,
    num_blocks: usize,
    gdim: usize,
    scheme: &'a QuadratureScheme,
    tabulator: &'a dyn BasisTabulator,
    caches: &'a Caches,
    dag: IrDag,
    tables: TableSet,
}

impl<'a> Ctx<'a> {
    fn multi_cell(&self) -> bool {
        self.kind.is_multi_cell(self.num_blocks)
    }

    /// The constituent-cell block a terminal reads, enforcing that
    /// restrictions are present exactly where they are required
    fn block_for(&self, what: &Expr, restriction: Option<usize>) -> Result<usize> {
        match restriction {
            Some(b) => Ok(b),
            None if self.multi_cell() => Err(ParseError::MissingRestriction(
                self.handle.clone(),
                what.to_string(),
                self.kind,
            )
            .into()),
            None => Ok(0),
        }
    }

    fn table(
        &mut self,
        element: &Element,
        deriv: Deriv,
        component: usize,
        block: usize,
    ) -> Result<TableId> {
        let key = TableKey {
            element: element.clone(),
            deriv,
            component,
            block,
        };
        let (scheme, tabulator, caches) = (self.scheme, self.tabulator, self.caches);
        self.tables.ensure(key, || {
            (0..scheme.num_entities())
                .map(|entity| {
                    let points = scheme.mapped_points(entity, block);
                    caches
                        .tabulate(tabulator, element, deriv, component, &points)
                        .map(|g| g.as_ref().clone())
                })
                .collect()
        })
    }

    fn argument_element(&self, n: usize) -> Result<&'a Element> {
        self.form.argument_element(n).ok_or_else(|| {
            ParseError::NotLowerable(self.handle.clone(), format!("argument #{}", n)).into()
        })
    }

    fn coefficient_element(&self, k: usize) -> Result<&'a Element> {
        self.form.coefficient_element(k).ok_or_else(|| {
            ParseError::NotLowerable(self.handle.clone(), format!("coefficient #{}", k)).into()
        })
    }

    fn lower_expr(&mut self, e: &Expr, restriction: Option<usize>) -> Result<Val> {
        match e {
            Expr::Argument(n) => {
                let element = self.argument_element(*n)?;
                let block = self.block_for(e, restriction)?;
                let vs = element.value_size();
                let ids = (0..vs)
                    .map(|c| {
                        let table = self.table(element, Deriv::Value, c, block)?;
                        Ok(self.dag.insert(Ir::Basis { table, arg: *n }))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Val {
                    shape: if vs == 1 { vec![] } else { vec![vs] },
                    ids,
                })
            }
            Expr::Coefficient(k) => {
                let element = self.coefficient_element(*k)?;
                let block = self.block_for(e, restriction)?;
                let vs = element.value_size();
                let ids = (0..vs)
                    .map(|c| {
                        let table = self.table(element, Deriv::Value, c, block)?;
                        Ok(self.dag.insert(Ir::Coeff {
                            table,
                            coeff: *k,
                            block,
                        }))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Val {
                    shape: if vs == 1 { vec![] } else { vec![vs] },
                    ids,
                })
            }
            Expr::Constant(c) => Ok(Val::scalar(self.dag.lit(*c))),
            Expr::FacetNormal => {
                if !matches!(
                    self.kind,
                    DomainKind::ExteriorFacet | DomainKind::InteriorFacet
                ) {
                    return Err(ParseError::NotOnAFacet(
                        self.handle.clone(),
                        e.to_string(),
                    )
                    .into());
                }
                let block = self.block_for(e, restriction)?;
                let ids = (0..self.gdim)
                    .map(|d| {
                        self.dag.insert(Ir::Geom {
                            q: Geom::FacetNormal(d),
                            block,
                        })
                    })
                    .collect();
                Ok(Val {
                    shape: vec![self.gdim],
                    ids,
                })
            }
            Expr::Circumradius => {
                let block = self.block_for(e, restriction)?;
                Ok(Val::scalar(self.dag.insert(Ir::Geom {
                    q: Geom::Circumradius,
                    block,
                })))
            }
            Expr::CellVolume => {
                let block = self.block_for(e, restriction)?;
                Ok(Val::scalar(self.dag.insert(Ir::Geom {
                    q: Geom::CellVolume,
                    block,
                })))
            }
            Expr::Grad(inner) => self.lower_grad(inner, restriction),
            Expr::Div(inner) => {
                let g = self.lower_grad(inner, restriction)?;
                // trace of the gradient: requires a square shape
                if g.shape != vec![self.gdim, self.gdim] {
                    return Err(ParseError::InvalidShape(
                        self.handle.clone(),
                        "vector",
                        inner.to_string(),
                    )
                    .into());
                }
                let terms = (0..self.gdim)
                    .map(|d| g.ids[d * self.gdim + d])
                    .collect::<Vec<_>>();
                Ok(Val::scalar(self.dag.sum(&terms)))
            }
            Expr::Inner(a, b) => {
                let va = self.lower_expr(a, restriction)?;
                let vb = self.lower_expr(b, restriction)?;
                if va.shape != vb.shape {
                    return Err(ParseError::ShapeMismatch(
                        self.handle.clone(),
                        "inner",
                        va.shape_str(),
                        vb.shape_str(),
                    )
                    .into());
                }
                let terms = va
                    .ids
                    .iter()
                    .zip(vb.ids.iter())
                    .map(|(x, y)| self.dag.mul(*x, *y))
                    .collect::<Vec<_>>();
                Ok(Val::scalar(self.dag.sum(&terms)))
            }
            Expr::Dot(a, b) => {
                let va = self.lower_expr(a, restriction)?;
                let vb = self.lower_expr(b, restriction)?;
                self.contract(va, vb)
            }
            Expr::Outer(a, b) => {
                let va = self.lower_expr(a, restriction)?;
                let vb = self.lower_expr(b, restriction)?;
                let shape = va
                    .shape
                    .iter()
                    .chain(vb.shape.iter())
                    .copied()
                    .collect::<Vec<_>>();
                let mut ids = Vec::with_capacity(va.ids.len() * vb.ids.len());
                for x in va.ids.iter() {
                    for y in vb.ids.iter() {
                        ids.push(self.dag.mul(*x, *y));
                    }
                }
                Ok(Val { shape, ids })
            }
            Expr::Add(a, b) | Expr::Sub(a, b) => {
                let va = self.lower_expr(a, restriction)?;
                let vb = self.lower_expr(b, restriction)?;
                if va.shape != vb.shape {
                    return Err(ParseError::ShapeMismatch(
                        self.handle.clone(),
                        if matches!(e, Expr::Add(..)) { "+" } else { "-" },
                        va.shape_str(),
                        vb.shape_str(),
                    )
                    .into());
                }
                let ids = va
                    .ids
                    .iter()
                    .zip(vb.ids.iter())
                    .map(|(x, y)| {
                        if matches!(e, Expr::Add(..)) {
                            self.dag.add(*x, *y)
                        } else {
                            self.dag.sub(*x, *y)
                        }
                    })
                    .collect();
                Ok(Val {
                    shape: va.shape,
                    ids,
                })
            }
            Expr::Mul(a, b) => {
                let va = self.lower_expr(a, restriction)?;
                let vb = self.lower_expr(b, restriction)?;
                let (scalar, tensor) = if va.is_scalar() {
                    (va, vb)
                } else if vb.is_scalar() {
                    (vb, va)
                } else {
                    return Err(ParseError::InvalidShape(
                        self.handle.clone(),
                        "scalar",
                        e.to_string(),
                    )
                    .into());
                };
                let s = scalar.ids[0];
                let ids = tensor.ids.iter().map(|x| self.dag.mul(s, *x)).collect();
                Ok(Val {
                    shape: tensor.shape,
                    ids,
                })
            }
            Expr::Division(a, b) => {
                let va = self.lower_expr(a, restriction)?;
                let vb = self.lower_expr(b, restriction)?;
                if !vb.is_scalar() {
                    return Err(ParseError::InvalidShape(
                        self.handle.clone(),
                        "scalar",
                        b.to_string(),
                    )
                    .into());
                }
                let den = vb.ids[0];
                let ids = va.ids.iter().map(|x| self.dag.div(*x, den)).collect();
                Ok(Val {
                    shape: va.shape,
                    ids,
                })
            }
            Expr::Neg(inner) => {
                let v = self.lower_expr(inner, restriction)?;
                let ids = v.ids.iter().map(|x| self.dag.neg(*x)).collect();
                Ok(Val {
                    shape: v.shape,
                    ids,
                })
            }
            Expr::Restrict(inner, side) => {
                self.check_restriction(e, *side)?;
                self.lower_expr(inner, Some(side.block()))
            }
            Expr::Avg(inner) => {
                self.check_restriction(e, Side::Minus)?;
                let plus = self.lower_expr(inner, Some(Side::Plus.block()))?;
                let minus = self.lower_expr(inner, Some(Side::Minus.block()))?;
                let half = self.dag.lit(0.5);
                let ids = plus
                    .ids
                    .iter()
                    .zip(minus.ids.iter())
                    .map(|(p, m)| {
                        let s = self.dag.add(*p, *m);
                        self.dag.mul(half, s)
                    })
                    .collect();
                Ok(Val {
                    shape: plus.shape,
                    ids,
                })
            }
            Expr::Jump(inner) => {
                self.check_restriction(e, Side::Minus)?;
                let plus = self.lower_expr(inner, Some(Side::Plus.block()))?;
                let minus = self.lower_expr(inner, Some(Side::Minus.block()))?;
                let ids = plus
                    .ids
                    .iter()
                    .zip(minus.ids.iter())
                    .map(|(p, m)| self.dag.sub(*p, *m))
                    .collect();
                Ok(Val {
                    shape: plus.shape,
                    ids,
                })
            }
        }
    }

    /// A restriction is only admissible where there is more than one cell
    /// to choose from
    fn check_restriction(&self, e: &Expr, side: Side) -> Result<()> {
        if !self.multi_cell() || (side == Side::Minus && self.num_blocks < 2) {
            return Err(ParseError::SpuriousRestriction(
                self.handle.clone(),
                e.to_string(),
                self.kind,
            )
            .into());
        }
        Ok(())
    }

    /// dot: contract the last index of `a` with the first index of `b`
    fn contract(&mut self, a: Val, b: Val) -> Result<Val> {
        if a.is_scalar() || b.is_scalar() {
            let (scalar, tensor) = if a.is_scalar() { (a, b) } else { (b, a) };
            let s = scalar.ids[0];
            let ids = tensor.ids.iter().map(|x| self.dag.mul(s, *x)).collect();
            return Ok(Val {
                shape: tensor.shape,
                ids,
            });
        }
        let k = *a.shape.last().unwrap();
        if b.shape[0] != k {
            return Err(ParseError::ShapeMismatch(
                self.handle.clone(),
                "dot",
                a.shape_str(),
                b.shape_str(),
            )
            .into());
        }
        let rows = a.ids.len() / k;
        let cols = b.ids.len() / k;
        let shape = a.shape[..a.shape.len() - 1]
            .iter()
            .chain(b.shape[1..].iter())
            .copied()
            .collect::<Vec<_>>();
        let mut ids = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                let terms = (0..k)
                    .map(|i| self.dag.mul(a.ids[r * k + i], b.ids[i * cols + c]))
                    .collect::<Vec<_>>();
                ids.push(self.dag.sum(&terms));
            }
        }
        Ok(Val { shape, ids })
    }

    /// Lower the gradient of an expression; the result has one trailing
    /// index of extent `gdim`. Physical derivatives come from the chain
    /// rule: d(phi)/dx_d = sum_r Kinv[r][d] d(phi)/dX_r.
    fn lower_grad(&mut self, e: &Expr, restriction: Option<usize>) -> Result<Val> {
        match e {
            Expr::Argument(n) => {
                let element = self.argument_element(*n)?;
                let block = self.block_for(e, restriction)?;
                let vs = element.value_size();
                let mut ids = Vec::with_capacity(vs * self.gdim);
                for c in 0..vs {
                    for d in 0..self.gdim {
                        let terms = (0..self.gdim)
                            .map(|r| {
                                let table = self.table(element, Deriv::Grad(r), c, block)?;
                                let dref = self.dag.insert(Ir::Basis { table, arg: *n });
                                let k = self.dag.insert(Ir::Geom {
                                    q: Geom::JacobianInv(r, d),
                                    block,
                                });
                                Ok(self.dag.mul(k, dref))
                            })
                            .collect::<Result<Vec<_>>>()?;
                        ids.push(self.dag.sum(&terms));
                    }
                }
                Ok(Val {
                    shape: grad_shape(vs, self.gdim),
                    ids,
                })
            }
            Expr::Coefficient(kk) => {
                let element = self.coefficient_element(*kk)?;
                let block = self.block_for(e, restriction)?;
                let vs = element.value_size();
                let mut ids = Vec::with_capacity(vs * self.gdim);
                for c in 0..vs {
                    for d in 0..self.gdim {
                        let terms = (0..self.gdim)
                            .map(|r| {
                                let table = self.table(element, Deriv::Grad(r), c, block)?;
                                let dref = self.dag.insert(Ir::Coeff {
                                    table,
                                    coeff: *kk,
                                    block,
                                });
                                let k = self.dag.insert(Ir::Geom {
                                    q: Geom::JacobianInv(r, d),
                                    block,
                                });
                                Ok(self.dag.mul(k, dref))
                            })
                            .collect::<Result<Vec<_>>>()?;
                        ids.push(self.dag.sum(&terms));
                    }
                }
                Ok(Val {
                    shape: grad_shape(vs, self.gdim),
                    ids,
                })
            }
            Expr::Constant(_) => {
                let zero = self.dag.lit(0.);
                Ok(Val {
                    shape: vec![self.gdim],
                    ids: vec![zero; self.gdim],
                })
            }
            Expr::Add(a, b) | Expr::Sub(a, b) => {
                let va = self.lower_grad(a, restriction)?;
                let vb = self.lower_grad(b, restriction)?;
                if va.shape != vb.shape {
                    return Err(ParseError::ShapeMismatch(
                        self.handle.clone(),
                        "grad",
                        va.shape_str(),
                        vb.shape_str(),
                    )
                    .into());
                }
                let ids = va
                    .ids
                    .iter()
                    .zip(vb.ids.iter())
                    .map(|(x, y)| {
                        if matches!(e, Expr::Add(..)) {
                            self.dag.add(*x, *y)
                        } else {
                            self.dag.sub(*x, *y)
                        }
                    })
                    .collect();
                Ok(Val {
                    shape: va.shape,
                    ids,
                })
            }
            Expr::Neg(inner) => {
                let v = self.lower_grad(inner, restriction)?;
                let ids = v.ids.iter().map(|x| self.dag.neg(*x)).collect();
                Ok(Val {
                    shape: v.shape,
                    ids,
                })
            }
            Expr::Mul(a, b) => {
                // only scaling by a literal survives the algebra layer
                let (c, inner) = match (a.as_ref(), b.as_ref()) {
                    (Expr::Constant(c), inner) | (inner, Expr::Constant(c)) => (*c, inner),
                    _ => {
                        return Err(ParseError::NotLowerable(
                            self.handle.clone(),
                            format!("grad({})", e),
                        )
                        .into())
                    }
                };
                let v = self.lower_grad(inner, restriction)?;
                let lit = self.dag.lit(c);
                let ids = v.ids.iter().map(|x| self.dag.mul(lit, *x)).collect();
                Ok(Val {
                    shape: v.shape,
                    ids,
                })
            }
            Expr::Restrict(inner, side) => {
                self.check_restriction(e, *side)?;
                self.lower_grad(inner, Some(side.block()))
            }
            Expr::Avg(inner) => {
                self.check_restriction(e, Side::Minus)?;
                let plus = self.lower_grad(inner, Some(Side::Plus.block()))?;
                let minus = self.lower_grad(inner, Some(Side::Minus.block()))?;
                let half = self.dag.lit(0.5);
                let ids = plus
                    .ids
                    .iter()
                    .zip(minus.ids.iter())
                    .map(|(p, m)| {
                        let s = self.dag.add(*p, *m);
                        self.dag.mul(half, s)
                    })
                    .collect();
                Ok(Val {
                    shape: plus.shape,
                    ids,
                })
            }
            Expr::Jump(inner) => {
                self.check_restriction(e, Side::Minus)?;
                let plus = self.lower_grad(inner, Some(Side::Plus.block()))?;
                let minus = self.lower_grad(inner, Some(Side::Minus.block()))?;
                let ids = plus
                    .ids
                    .iter()
                    .zip(minus.ids.iter())
                    .map(|(p, m)| self.dag.sub(*p, *m))
                    .collect();
                Ok(Val {
                    shape: plus.shape,
                    ids,
                })
            }
            _ => Err(ParseError::NotLowerable(
                self.handle.clone(),
                format!("grad({})", e),
            )
            .into()),
        }
    }
}

fn grad_shape(value_size: usize, gdim: usize) -> Vec<usize> {
    if value_size == 1 {
        vec![gdim]
    } else {
        vec![value_size, gdim]
    }
}
