use serde::{Deserialize, Serialize};

/// A point in reference coordinates, padded to three dimensions so that
/// lower-dimensional cells share one representation.
pub type Point = [f64; 3];

/// The supported reference cells. The facet of a simplex `i` is the
/// sub-simplex spanned by all vertices but `i`, listed in ascending local
/// order; combined with cells whose vertices are ordered by ascending
/// global index, this makes facet parameterizations agree between the two
/// cells sharing an interior facet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum ReferenceCell {
    Interval,
    Triangle,
    Tetrahedron,
}

impl ReferenceCell {
    pub fn dim(&self) -> usize {
        match self {
            ReferenceCell::Interval => 1,
            ReferenceCell::Triangle => 2,
            ReferenceCell::Tetrahedron => 3,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.dim() + 1
    }

    pub fn num_facets(&self) -> usize {
        self.dim() + 1
    }

    /// Measure of the reference cell itself
    pub fn volume(&self) -> f64 {
        match self {
            ReferenceCell::Interval => 1.,
            ReferenceCell::Triangle => 0.5,
            ReferenceCell::Tetrahedron => 1. / 6.,
        }
    }

    /// The cell of which facets of this cell are instances; `None` for
    /// intervals, whose facets are single points.
    pub fn facet_cell(&self) -> Option<ReferenceCell> {
        match self {
            ReferenceCell::Interval => None,
            ReferenceCell::Triangle => Some(ReferenceCell::Interval),
            ReferenceCell::Tetrahedron => Some(ReferenceCell::Triangle),
        }
    }

    pub fn vertices(&self) -> &'static [Point] {
        match self {
            ReferenceCell::Interval => &[[0., 0., 0.], [1., 0., 0.]],
            ReferenceCell::Triangle => &[[0., 0., 0.], [1., 0., 0.], [0., 1., 0.]],
            ReferenceCell::Tetrahedron => &[
                [0., 0., 0.],
                [1., 0., 0.],
                [0., 1., 0.],
                [0., 0., 1.],
            ],
        }
    }

    /// Local vertex indices of the given facet, in ascending order
    pub fn facet_vertices(&self, facet: usize) -> Vec<usize> {
        assert!(facet < self.num_facets());
        (0..self.num_vertices()).filter(|v| *v != facet).collect()
    }

    /// Local vertex pairs making up the cell edges, in the ordering used
    /// for degree-2 Lagrange nodes: the edge list is sorted
    /// lexicographically in reverse, i.e. the edge opposite the lowest
    /// vertices comes first.
    pub fn edges(&self) -> &'static [(usize, usize)] {
        match self {
            ReferenceCell::Interval => &[(0, 1)],
            ReferenceCell::Triangle => &[(1, 2), (0, 2), (0, 1)],
            ReferenceCell::Tetrahedron => &[(2, 3), (1, 3), (1, 2), (0, 3), (0, 2), (0, 1)],
        }
    }
}

impl std::fmt::Display for ReferenceCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceCell::Interval => write!(f, "interval"),
            ReferenceCell::Triangle => write!(f, "triangle"),
            ReferenceCell::Tetrahedron => write!(f, "tetrahedron"),
        }
    }
}

/// A finite element description, as handed over by the form algebra layer.
/// Vector elements lay their degrees of freedom out in per-component
/// blocks; mixed elements concatenate their sub-elements' blocks, both in
/// dof and in value-component order.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Element {
    Lagrange {
        cell: ReferenceCell,
        degree: usize,
    },
    Vector {
        cell: ReferenceCell,
        degree: usize,
        components: usize,
    },
    Mixed {
        subs: Vec<Element>,
    },
}

impl Element {
    pub fn lagrange(cell: ReferenceCell, degree: usize) -> Element {
        Element::Lagrange { cell, degree }
    }

    /// A vector-valued Lagrange element with one component per geometric
    /// dimension
    pub fn vector(cell: ReferenceCell, degree: usize) -> Element {
        Element::Vector {
            cell,
            degree,
            components: cell.dim(),
        }
    }

    pub fn mixed(subs: Vec<Element>) -> Element {
        Element::Mixed { subs }
    }

    pub fn cell(&self) -> ReferenceCell {
        match self {
            Element::Lagrange { cell, .. } | Element::Vector { cell, .. } => *cell,
            Element::Mixed { subs } => subs[0].cell(),
        }
    }

    /// Polynomial degree; for mixed elements the maximum over sub-elements
    pub fn degree(&self) -> usize {
        match self {
            Element::Lagrange { degree, .. } | Element::Vector { degree, .. } => *degree,
            Element::Mixed { subs } => subs.iter().map(Element::degree).max().unwrap_or(0),
        }
    }

    /// Number of scalar value components
    pub fn value_size(&self) -> usize {
        match self {
            Element::Lagrange { .. } => 1,
            Element::Vector { components, .. } => *components,
            Element::Mixed { subs } => subs.iter().map(Element::value_size).sum(),
        }
    }

    /// Number of scalar Lagrange nodes of the underlying scalar space
    pub fn num_nodes(&self) -> usize {
        match self {
            Element::Lagrange { cell, degree } | Element::Vector { cell, degree, .. } => {
                match degree {
                    1 => cell.num_vertices(),
                    2 => cell.num_vertices() + cell.edges().len(),
                    _ => 0,
                }
            }
            Element::Mixed { .. } => 0,
        }
    }

    /// Dimension of the local function space
    pub fn space_dim(&self) -> usize {
        match self {
            Element::Lagrange { .. } => self.num_nodes(),
            Element::Vector { components, .. } => components * self.num_nodes(),
            Element::Mixed { subs } => subs.iter().map(Element::space_dim).sum(),
        }
    }

    pub fn sub_elements(&self) -> &[Element] {
        match self {
            Element::Mixed { subs } => subs,
            _ => std::slice::from_ref(self),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Element::Lagrange { cell, degree } => format!("P{} on {}", degree, cell),
            Element::Vector {
                cell,
                degree,
                components,
            } => format!("[P{}]^{} on {}", degree, components, cell),
            Element::Mixed { subs } => format!(
                "({})",
                subs.iter()
                    .map(Element::describe)
                    .collect::<Vec<_>>()
                    .join(" x ")
            ),
        }
    }
}
