//! Description of a quantized circuit in terms of symbolic coefficients.
//!
//! [`CircuitModel`] is the interface through which the numerical layer reads a
//! circuit: its topology, the symbols naming each degree of freedom, and the
//! symbolic matrices and vectors multiplying them in the Hamiltonian.
//! [`SymbolicCircuit`] is a plain-data implementation, filled in directly or by
//! an external symbolic front end.

use std::fmt;
use indexmap::IndexMap;
use ndarray as nd;
use crate::{
    error::{ CqedError, CqedResult },
    expr::{ Expr, SymMatrix, SymVector },
};

/// Node label. Node [`GROUND`] is the reference and carries no degree of
/// freedom.
pub type NodeId = usize;

pub const GROUND: NodeId = 0;

/// A branch between two nodes. The third field distinguishes parallel
/// branches between the same pair of nodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge(pub NodeId, pub NodeId, pub usize);

impl Edge {
    pub fn new(n1: NodeId, n2: NodeId) -> Self { Self(n1, n2, 0) }

    pub fn nodes(&self) -> (NodeId, NodeId) { (self.0, self.1) }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0, self.1, self.2)
    }
}

/// Dominant element on a branch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Capacitive,
    Inductive,
    Junction,
}

/// Role of a degree-of-freedom symbol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DofKind {
    Charge,
    Flux,
    Disp,
    DispAdj,
}

/// Entry of a displacement-operator vector: either the symbol of a mode's
/// displacement operator or no degree of freedom at all, which acts as the
/// scalar 1.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DofEntry {
    Symbol(String),
    Open,
}

/// Node or branch representation of a circuit matrix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MatrixForm {
    Node,
    Branch,
}

/// Parameter names and coupling expressions of an auxiliary resonator
/// capacitively attached to a node.
#[derive(Clone, Debug, PartialEq)]
pub struct Resonator {
    /// Bare frequency.
    pub fr: String,
    /// Bare impedance.
    pub zr: String,
    /// Derived capacitance.
    pub cr: String,
    /// Derived inductance.
    pub lr: String,
    /// Coupling strength.
    pub gc: String,
    /// Loaded frequency.
    pub frl: String,
    /// Loaded impedance.
    pub zrl: String,
    pub gc_expr: Expr,
    pub frl_expr: Expr,
    pub zrl_expr: Expr,
}

impl Resonator {
    /// Use the conventional `f{n}r`, `Z{n}r`, `C{n}r`, `L{n}r`, `g{n}r`,
    /// `f{n}rl`, `Z{n}rl` parameter names for a resonator on node `n`.
    pub fn on_node(node: NodeId, gc_expr: Expr, frl_expr: Expr, zrl_expr: Expr)
        -> Self
    {
        Self {
            fr: format!("f{node}r"),
            zr: format!("Z{node}r"),
            cr: format!("C{node}r"),
            lr: format!("L{node}r"),
            gc: format!("g{node}r"),
            frl: format!("f{node}rl"),
            zrl: format!("Z{node}rl"),
            gc_expr,
            frl_expr,
            zrl_expr,
        }
    }

    /// Names of the parameters computed from [`Self::fr`] and [`Self::zr`].
    pub fn derived_names(&self) -> [&str; 5] {
        [&self.cr, &self.lr, &self.gc, &self.frl, &self.zrl]
    }
}

/// Read access to a circuit description.
pub trait CircuitModel {
    /// Non-ground nodes, in the order used for tensor products.
    fn nodes(&self) -> &[NodeId];

    /// All branches, in the order used by branch-form matrices and the
    /// Josephson vector.
    fn edges(&self) -> &[Edge];

    fn edge_kind(&self, edge: &Edge) -> Option<EdgeKind>;

    /// Symbol of each node's degree of freedom of a given kind.
    fn dof_symbols(&self, kind: DofKind) -> &IndexMap<NodeId, String>;

    /// Charge symbols in degree-of-freedom order.
    fn charge_vector(&self) -> &[String];

    /// Flux symbols in degree-of-freedom order.
    fn flux_vector(&self) -> &[String];

    /// Displacement operators on the right side of each Josephson term.
    fn right_disp_vector(&self, adjoint: bool) -> &[DofEntry];

    /// Displacement operators on the left side of each Josephson term.
    fn left_disp_vector(&self, adjoint: bool) -> &[DofEntry];

    fn inverse_capacitance(&self) -> &SymMatrix;

    fn inverse_inductance(&self, form: MatrixForm) -> &SymMatrix;

    /// Josephson energy of each branch.
    fn josephson_vector(&self) -> &SymVector;

    /// Offset charge of each node.
    fn charge_bias_vector(&self) -> &SymVector;

    /// Diagonal matrix of external flux through each branch.
    fn flux_bias_matrix(&self) -> &SymMatrix;

    /// Every parameter with its default value.
    fn parameters(&self) -> &IndexMap<String, f64>;

    fn resonators(&self) -> &IndexMap<NodeId, Resonator>;
}

/// Plain-data circuit description.
///
/// [`Self::new`] fills in conventional symbol names (`Q{n}`, `Φ{n}`, `D{n}`,
/// `D{n}†`) and zero matrices of the right shapes; the coefficient setters
/// check shapes against the topology.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolicCircuit {
    nodes: Vec<NodeId>,
    edges: Vec<Edge>,
    edge_kinds: Vec<EdgeKind>,
    charge_syms: IndexMap<NodeId, String>,
    flux_syms: IndexMap<NodeId, String>,
    disp_syms: IndexMap<NodeId, String>,
    disp_adj_syms: IndexMap<NodeId, String>,
    charge_vec: Vec<String>,
    flux_vec: Vec<String>,
    disp_r: Vec<DofEntry>,
    disp_r_adj: Vec<DofEntry>,
    disp_l: Vec<DofEntry>,
    disp_l_adj: Vec<DofEntry>,
    Cinv: SymMatrix,
    Linv: SymMatrix,
    Linv_b: SymMatrix,
    Jvec: SymVector,
    Qb: SymVector,
    Pb: SymMatrix,
    params: IndexMap<String, f64>,
    resonators: IndexMap<NodeId, Resonator>,
}

impl SymbolicCircuit {
    /// Create a circuit on the given nodes and branches.
    ///
    /// Each Josephson term of a branch `(n1, n2)` couples `D{n1}†` on the
    /// left to `D{n2}` on the right; a ground end contributes no operator.
    pub fn new<I, J>(nodes: I, edges: J) -> CqedResult<Self>
    where
        I: IntoIterator<Item = NodeId>,
        J: IntoIterator<Item = (Edge, EdgeKind)>,
    {
        let nodes: Vec<NodeId> = nodes.into_iter().collect();
        if nodes.contains(&GROUND) {
            return Err(CqedError::config(
                "the ground node cannot be a degree of freedom"));
        }
        let (edges, edge_kinds): (Vec<Edge>, Vec<EdgeKind>)
            = edges.into_iter().unzip();
        for e in edges.iter() {
            let (n1, n2) = e.nodes();
            for n in [n1, n2] {
                if n != GROUND && !nodes.contains(&n) {
                    return Err(CqedError::config(
                        format!("edge {e} refers to unknown node {n}")));
                }
            }
        }
        let named = |f: fn(NodeId) -> String| -> IndexMap<NodeId, String> {
            nodes.iter().map(|&n| (n, f(n))).collect()
        };
        let charge_syms = named(|n| format!("Q{n}"));
        let flux_syms = named(|n| format!("Φ{n}"));
        let disp_syms = named(|n| format!("D{n}"));
        let disp_adj_syms = named(|n| format!("D{n}†"));
        let entry = |n: NodeId, syms: &IndexMap<NodeId, String>| -> DofEntry {
            syms.get(&n).map(|s| DofEntry::Symbol(s.clone()))
                .unwrap_or(DofEntry::Open)
        };
        let disp_r: Vec<DofEntry>
            = edges.iter().map(|e| entry(e.1, &disp_syms)).collect();
        let disp_r_adj: Vec<DofEntry>
            = edges.iter().map(|e| entry(e.1, &disp_adj_syms)).collect();
        let disp_l: Vec<DofEntry>
            = edges.iter().map(|e| entry(e.0, &disp_adj_syms)).collect();
        let disp_l_adj: Vec<DofEntry>
            = edges.iter().map(|e| entry(e.0, &disp_syms)).collect();
        let n = nodes.len();
        let m = edges.len();
        Ok(Self {
            charge_vec: charge_syms.values().cloned().collect(),
            flux_vec: flux_syms.values().cloned().collect(),
            nodes,
            edges,
            edge_kinds,
            charge_syms,
            flux_syms,
            disp_syms,
            disp_adj_syms,
            disp_r,
            disp_r_adj,
            disp_l,
            disp_l_adj,
            Cinv: SymMatrix::default((n, n)),
            Linv: SymMatrix::default((n, n)),
            Linv_b: SymMatrix::default((m, m)),
            Jvec: SymVector::default(m),
            Qb: SymVector::default(n),
            Pb: SymMatrix::default((m, m)),
            params: IndexMap::new(),
            resonators: IndexMap::new(),
        })
    }

    fn check_shape(what: &str, got: &[usize], expected: &[usize])
        -> CqedResult<()>
    {
        if got != expected {
            return Err(CqedError::config(format!(
                "{what} has shape {got:?}, expected {expected:?}")));
        }
        Ok(())
    }

    /// Register a parameter with its default value.
    pub fn with_parameter<S>(mut self, name: S, value: f64) -> Self
    where S: Into<String>
    {
        self.params.insert(name.into(), value);
        self
    }

    pub fn with_inverse_capacitance(mut self, Cinv: SymMatrix)
        -> CqedResult<Self>
    {
        let n = self.nodes.len();
        Self::check_shape("inverse capacitance", Cinv.shape(), &[n, n])?;
        self.Cinv = Cinv;
        Ok(self)
    }

    pub fn with_inverse_inductance(mut self, Linv: SymMatrix)
        -> CqedResult<Self>
    {
        let n = self.nodes.len();
        Self::check_shape("inverse inductance", Linv.shape(), &[n, n])?;
        self.Linv = Linv;
        Ok(self)
    }

    pub fn with_branch_inverse_inductance(mut self, Linv_b: SymMatrix)
        -> CqedResult<Self>
    {
        let m = self.edges.len();
        Self::check_shape(
            "branch inverse inductance", Linv_b.shape(), &[m, m])?;
        self.Linv_b = Linv_b;
        Ok(self)
    }

    pub fn with_josephson_vector(mut self, Jvec: SymVector) -> CqedResult<Self> {
        let m = self.edges.len();
        Self::check_shape("Josephson vector", Jvec.shape(), &[m])?;
        self.Jvec = Jvec;
        Ok(self)
    }

    pub fn with_charge_bias(mut self, Qb: SymVector) -> CqedResult<Self> {
        let n = self.nodes.len();
        Self::check_shape("charge bias vector", Qb.shape(), &[n])?;
        self.Qb = Qb;
        Ok(self)
    }

    /// Set the external flux through each branch.
    pub fn with_flux_bias(mut self, Pb: SymVector) -> CqedResult<Self> {
        let m = self.edges.len();
        Self::check_shape("flux bias vector", Pb.shape(), &[m])?;
        self.Pb = SymMatrix::default((m, m));
        self.Pb.diag_mut().assign(&Pb);
        Ok(self)
    }

    pub fn with_resonator(mut self, node: NodeId, res: Resonator)
        -> CqedResult<Self>
    {
        if !self.nodes.contains(&node) {
            return Err(CqedError::config(
                format!("cannot attach a resonator to unknown node {node}")));
        }
        self.resonators.insert(node, res);
        Ok(self)
    }
}

impl CircuitModel for SymbolicCircuit {
    fn nodes(&self) -> &[NodeId] { &self.nodes }

    fn edges(&self) -> &[Edge] { &self.edges }

    fn edge_kind(&self, edge: &Edge) -> Option<EdgeKind> {
        self.edges.iter().position(|e| e == edge).map(|k| self.edge_kinds[k])
    }

    fn dof_symbols(&self, kind: DofKind) -> &IndexMap<NodeId, String> {
        match kind {
            DofKind::Charge => &self.charge_syms,
            DofKind::Flux => &self.flux_syms,
            DofKind::Disp => &self.disp_syms,
            DofKind::DispAdj => &self.disp_adj_syms,
        }
    }

    fn charge_vector(&self) -> &[String] { &self.charge_vec }

    fn flux_vector(&self) -> &[String] { &self.flux_vec }

    fn right_disp_vector(&self, adjoint: bool) -> &[DofEntry] {
        if adjoint { &self.disp_r_adj } else { &self.disp_r }
    }

    fn left_disp_vector(&self, adjoint: bool) -> &[DofEntry] {
        if adjoint { &self.disp_l_adj } else { &self.disp_l }
    }

    fn inverse_capacitance(&self) -> &SymMatrix { &self.Cinv }

    fn inverse_inductance(&self, form: MatrixForm) -> &SymMatrix {
        match form {
            MatrixForm::Node => &self.Linv,
            MatrixForm::Branch => &self.Linv_b,
        }
    }

    fn josephson_vector(&self) -> &SymVector { &self.Jvec }

    fn charge_bias_vector(&self) -> &SymVector { &self.Qb }

    fn flux_bias_matrix(&self) -> &SymMatrix { &self.Pb }

    fn parameters(&self) -> &IndexMap<String, f64> { &self.params }

    fn resonators(&self) -> &IndexMap<NodeId, Resonator> { &self.resonators }
}

/// Single-island transmon: one node grounded through a Josephson junction and
/// a capacitance `C`, with offset charge `ng` and Josephson energy `EJ`.
pub fn transmon(C: f64, EJ: f64, ng: f64) -> CqedResult<SymbolicCircuit> {
    SymbolicCircuit::new([1], [(Edge::new(GROUND, 1), EdgeKind::Junction)])?
        .with_parameter("C", C)
        .with_parameter("EJ", EJ)
        .with_parameter("ng", ng)
        .with_inverse_capacitance(nd::array![[Expr::sym("C").recip()]])?
        .with_josephson_vector(nd::array![Expr::sym("EJ")])?
        .with_charge_bias(nd::array![Expr::sym("ng")])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventional_symbols() {
        let c = SymbolicCircuit::new(
            [1, 2],
            [
                (Edge::new(GROUND, 1), EdgeKind::Junction),
                (Edge::new(1, 2), EdgeKind::Inductive),
            ],
        ).unwrap();
        assert_eq!(c.charge_vector(), &["Q1".to_string(), "Q2".to_string()]);
        assert_eq!(c.left_disp_vector(false)[0], DofEntry::Open);
        assert_eq!(
            c.left_disp_vector(false)[1], DofEntry::Symbol("D1†".into()));
        assert_eq!(c.right_disp_vector(true)[1], DofEntry::Symbol("D2†".into()));
        assert_eq!(c.edge_kind(&Edge::new(1, 2)), Some(EdgeKind::Inductive));
        assert_eq!(c.flux_bias_matrix().shape(), &[2, 2]);
    }

    #[test]
    fn bad_topology_rejected() {
        assert!(SymbolicCircuit::new([0], Vec::new()).is_err());
        assert!(
            SymbolicCircuit::new([1], [(Edge::new(1, 2), EdgeKind::Junction)])
                .is_err()
        );
    }

    #[test]
    fn shape_mismatch_rejected() {
        let c = transmon(1.0, 1.0, 0.0).unwrap();
        let res = c.with_charge_bias(nd::array![Expr::sym("a"), Expr::sym("b")]);
        assert!(matches!(res, Err(CqedError::Configuration(_))));
    }
}
