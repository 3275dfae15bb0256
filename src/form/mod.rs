use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::structs::Handle;

mod element;
mod expr;

pub use element::{Element, Point, ReferenceCell};
pub use expr::{Expr, Side};

lazy_static::lazy_static! {
    /// The metadata keys the compiler understands; anything else on a
    /// measure is rejected outright.
    pub static ref METADATA_KEYS: std::collections::HashSet<&'static str> = maplit::hashset!{
        "quadrature_degree",
        "representation",
        "num_cells",
    };
}

/// The closed set of integration-domain kinds. The original system
/// dispatched on strings here; the set is fixed and exhaustively
/// enumerable, so it becomes a tagged union.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum DomainKind {
    Cell,
    ExteriorFacet,
    InteriorFacet,
    Vertex,
    Custom,
}

impl DomainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainKind::Cell => "cell",
            DomainKind::ExteriorFacet => "exterior_facet",
            DomainKind::InteriorFacet => "interior_facet",
            DomainKind::Vertex => "vertex",
            DomainKind::Custom => "custom",
        }
    }

    /// Whether integrals of this kind read data from more than one cell,
    /// so that restrictions are required to disambiguate
    pub fn is_multi_cell(&self, num_cells: usize) -> bool {
        matches!(self, DomainKind::InteriorFacet) || (*self == DomainKind::Custom && num_cells > 1)
    }
}

impl std::fmt::Display for DomainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum MetaValue {
    Str(String),
    Int(i64),
}
impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_owned())
    }
}
impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}
impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaValue::Str(s) => write!(f, "{}", s),
            MetaValue::Int(i) => write!(f, "{}", i),
        }
    }
}

/// Per-integral options, as an ordered key/value overlay fragment.
/// Recognized keys: `quadrature_degree`, `representation`, `num_cells`.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, MetaValue>);

impl Metadata {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with<V: Into<MetaValue>>(mut self, key: &str, value: V) -> Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Later fragments win over earlier ones
    pub fn overlay(&mut self, over: &Metadata) {
        for (k, v) in over.0.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

/// The representation strategy driving optimization of an integral.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum Representation {
    /// Evaluate the whole integrand inside the innermost loop
    #[default]
    Quadrature,
    /// Tensor-free representation with loop-invariant hoisting
    Uflacs,
}

/// Tags the integration domain of one integral.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Measure {
    pub kind: DomainKind,
    pub subdomain: Option<usize>,
    pub metadata: Metadata,
}

impl Measure {
    pub fn new(kind: DomainKind) -> Self {
        Measure {
            kind,
            subdomain: None,
            metadata: Metadata::new(),
        }
    }

    /// `dx`: integration over cells
    pub fn dx() -> Self {
        Measure::new(DomainKind::Cell)
    }
    /// `ds`: integration over exterior facets
    pub fn ds() -> Self {
        Measure::new(DomainKind::ExteriorFacet)
    }
    /// `dS`: integration over interior facets
    pub fn ds_interior() -> Self {
        Measure::new(DomainKind::InteriorFacet)
    }
    /// `dP`: point evaluation at vertices
    pub fn dp() -> Self {
        Measure::new(DomainKind::Vertex)
    }
    /// `dc`: integration over a user-defined domain spanning
    /// `num_cells` cells; the cell count must be supplied via metadata
    pub fn dc() -> Self {
        Measure::new(DomainKind::Custom)
    }

    pub fn on(mut self, subdomain: usize) -> Self {
        self.subdomain = Some(subdomain);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One integral: an integrand expression tree, a measure, and a handle
/// locating it within its form. Immutable once the form is built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Integral {
    pub handle: Handle,
    pub integrand: Expr,
    pub measure: Measure,
}

/// A variational form: an ordered set of integrals over a fixed list of
/// arguments (test/trial functions) and coefficients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Form {
    pub name: String,
    /// Elements of the arguments, by argument number (0 = test)
    pub arguments: Vec<Element>,
    /// Elements of the coefficients, by coefficient index
    pub coefficients: Vec<Element>,
    /// Form-level metadata defaults, overridden per integral
    pub metadata: Metadata,
    pub integrals: Vec<Integral>,
}

#[buildstructor::buildstructor]
impl Form {
    #[builder(entry = "builder", exit = "build", visibility = "pub")]
    fn new(
        name: String,
        arguments: Vec<Element>,
        coefficients: Vec<Element>,
        metadata: Option<Metadata>,
    ) -> Form {
        Form {
            name,
            arguments,
            coefficients,
            metadata: metadata.unwrap_or_default(),
            integrals: Vec::new(),
        }
    }
}

impl Form {
    /// Rank of the output tensor: 2 for bilinear forms, 1 for linear
    /// forms, 0 for functionals
    pub fn rank(&self) -> usize {
        self.arguments.len()
    }

    pub fn argument_element(&self, n: usize) -> Option<&Element> {
        self.arguments.get(n)
    }

    pub fn coefficient_element(&self, k: usize) -> Option<&Element> {
        self.coefficients.get(k)
    }

    /// The common reference cell of the form, taken from its elements
    pub fn cell(&self) -> Option<ReferenceCell> {
        self.arguments
            .iter()
            .chain(self.coefficients.iter())
            .map(Element::cell)
            .next()
    }

    /// Append an integral; its handle is derived from the measure's
    /// domain kind and the running count of same-kind integrals.
    pub fn integral(mut self, integrand: Expr, measure: Measure) -> Self {
        let i = self
            .integrals
            .iter()
            .filter(|it| it.measure.kind == measure.kind)
            .count();
        let handle = Handle::ith(&self.name, measure.kind.as_str(), i);
        self.integrals.push(Integral {
            handle,
            integrand,
            measure,
        });
        self
    }
}
