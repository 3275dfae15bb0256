use serde::{Deserialize, Serialize};

/// Which side of a shared facet a restricted quantity reads
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Side {
    Plus,
    Minus,
}
impl Side {
    /// The constituent-cell block a restriction selects
    pub fn block(&self) -> usize {
        match self {
            Side::Plus => 0,
            Side::Minus => 1,
        }
    }
}
impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Plus => write!(f, "+"),
            Side::Minus => write!(f, "-"),
        }
    }
}

/// The symbolic integrand surface handed over by the form algebra layer.
/// Differentiation proper (e.g. Gateaux derivatives) happens there; by the
/// time an expression reaches the compiler, `Grad` only wraps terminals
/// and linear combinations thereof.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum Expr {
    /// Trial/test function #n (0 = test, 1 = trial)
    Argument(usize),
    /// Coefficient function #k of the owning form
    Coefficient(usize),
    Constant(f64),
    FacetNormal,
    Circumradius,
    CellVolume,

    Grad(Box<Expr>),
    Div(Box<Expr>),
    Inner(Box<Expr>, Box<Expr>),
    Dot(Box<Expr>, Box<Expr>),
    Outer(Box<Expr>, Box<Expr>),

    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Division(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),

    Restrict(Box<Expr>, Side),
    Avg(Box<Expr>),
    Jump(Box<Expr>),
}

impl Expr {
    pub fn grad(e: Expr) -> Expr {
        Expr::Grad(Box::new(e))
    }
    pub fn div(e: Expr) -> Expr {
        Expr::Div(Box::new(e))
    }
    pub fn inner(a: Expr, b: Expr) -> Expr {
        Expr::Inner(Box::new(a), Box::new(b))
    }
    pub fn dot(a: Expr, b: Expr) -> Expr {
        Expr::Dot(Box::new(a), Box::new(b))
    }
    pub fn outer(a: Expr, b: Expr) -> Expr {
        Expr::Outer(Box::new(a), Box::new(b))
    }
    pub fn add(a: Expr, b: Expr) -> Expr {
        Expr::Add(Box::new(a), Box::new(b))
    }
    pub fn sub(a: Expr, b: Expr) -> Expr {
        Expr::Sub(Box::new(a), Box::new(b))
    }
    pub fn mul(a: Expr, b: Expr) -> Expr {
        Expr::Mul(Box::new(a), Box::new(b))
    }
    pub fn division(a: Expr, b: Expr) -> Expr {
        Expr::Division(Box::new(a), Box::new(b))
    }
    pub fn neg(e: Expr) -> Expr {
        Expr::Neg(Box::new(e))
    }
    pub fn restrict(e: Expr, side: Side) -> Expr {
        Expr::Restrict(Box::new(e), side)
    }
    pub fn avg(e: Expr) -> Expr {
        Expr::Avg(Box::new(e))
    }
    pub fn jump(e: Expr) -> Expr {
        Expr::Jump(Box::new(e))
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Argument(n) => write!(f, "v_{}", n),
            Expr::Coefficient(k) => write!(f, "w_{}", k),
            Expr::Constant(c) => write!(f, "{}", c),
            Expr::FacetNormal => write!(f, "n"),
            Expr::Circumradius => write!(f, "circumradius"),
            Expr::CellVolume => write!(f, "volume"),
            Expr::Grad(e) => write!(f, "grad({})", e),
            Expr::Div(e) => write!(f, "div({})", e),
            Expr::Inner(a, b) => write!(f, "inner({}, {})", a, b),
            Expr::Dot(a, b) => write!(f, "dot({}, {})", a, b),
            Expr::Outer(a, b) => write!(f, "outer({}, {})", a, b),
            Expr::Add(a, b) => write!(f, "({} + {})", a, b),
            Expr::Sub(a, b) => write!(f, "({} - {})", a, b),
            Expr::Mul(a, b) => write!(f, "({} * {})", a, b),
            Expr::Division(a, b) => write!(f, "({} / {})", a, b),
            Expr::Neg(e) => write!(f, "-{}", e),
            Expr::Restrict(e, side) => write!(f, "{}('{}')", e, side),
            Expr::Avg(e) => write!(f, "avg({})", e),
            Expr::Jump(e) => write!(f, "jump({})", e),
        }
    }
}
