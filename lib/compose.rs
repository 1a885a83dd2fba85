//! Embedding of single-mode operators into the joint Hilbert space.

use indexmap::IndexMap;
use ndarray::{ self as nd, linalg::kron };
use num_complex::Complex64 as C64;
use rustc_hash::FxHashMap as HashMap;
use crate::{
    circuit::{ CircuitModel, DofEntry, DofKind, NodeId },
    error::{ CqedError, CqedResult },
    operators::OperatorBundle,
};

/// Expand an operator acting on the `idx`-th mode of a product space with
/// mode dimensions `dims` as `I ⊗ ... ⊗ op ⊗ ... ⊗ I`.
pub fn expand_op(dims: &[usize], idx: usize, op: &nd::Array2<C64>)
    -> nd::Array2<C64>
{
    let eyesize1: usize = dims.iter().take(idx).product();
    let eyesize2: usize = dims.iter().skip(idx + 1).product();
    let eye1: nd::Array2<C64> = nd::Array2::eye(eyesize1);
    let eye2: nd::Array2<C64> = nd::Array2::eye(eyesize2);
    kron(&kron(&eye1, op), &eye2)
}

/// Mode operators embedded in the joint space.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeOps {
    pub charge: nd::Array2<C64>,
    pub flux: nd::Array2<C64>,
    pub disp: nd::Array2<C64>,
    pub disp_adj: nd::Array2<C64>,
}

/// Composite operators of every mode, keyed by node.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeMap {
    dims: Vec<usize>,
    ops: IndexMap<NodeId, CompositeOps>,
}

impl CompositeMap {
    /// Embed every node's operator bundle, with tensor factors ordered as in
    /// `nodes`.
    pub fn build(nodes: &[NodeId], bundles: &IndexMap<NodeId, OperatorBundle>)
        -> CqedResult<Self>
    {
        let dims: Vec<usize>
            = nodes.iter()
            .map(|n| {
                bundles.get(n).map(|b| b.dim())
                    .ok_or_else(|| CqedError::config(
                        format!("node {n} has no configured operators")))
            })
            .collect::<CqedResult<_>>()?;
        let ops: IndexMap<NodeId, CompositeOps>
            = nodes.iter().enumerate()
            .map(|(k, &node)| {
                let b = &bundles[&node];
                let ops = CompositeOps {
                    charge: expand_op(&dims, k, &b.charge),
                    flux: expand_op(&dims, k, &b.flux),
                    disp: expand_op(&dims, k, &b.disp),
                    disp_adj: expand_op(&dims, k, &b.disp_adj),
                };
                (node, ops)
            })
            .collect();
        Ok(Self { dims, ops })
    }

    /// Total Hilbert space dimension.
    pub fn dim(&self) -> usize { self.dims.iter().product() }

    /// Dimension of each mode.
    pub fn dims(&self) -> &[usize] { &self.dims }

    pub fn get(&self, node: NodeId) -> Option<&CompositeOps> {
        self.ops.get(&node)
    }

    fn require(&self, node: NodeId) -> CqedResult<&CompositeOps> {
        self.ops.get(&node).ok_or_else(|| CqedError::config(
            format!("node {node} has no configured operators")))
    }
}

/// An operator or the scalar 1.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Unit,
    Op(nd::Array2<C64>),
}

impl Operand {
    pub fn is_unit(&self) -> bool { matches!(self, Self::Unit) }

    /// Matrix product, with [`Operand::Unit`] acting as the identity.
    pub fn dot(&self, rhs: &Self) -> Self {
        match (self, rhs) {
            (Self::Unit, Self::Unit) => Self::Unit,
            (Self::Unit, Self::Op(b)) => Self::Op(b.clone()),
            (Self::Op(a), Self::Unit) => Self::Op(a.clone()),
            (Self::Op(a), Self::Op(b)) => Self::Op(a.dot(b)),
        }
    }

    pub fn to_matrix(&self, dim: usize) -> nd::Array2<C64> {
        match self {
            Self::Unit => nd::Array2::eye(dim),
            Self::Op(a) => a.clone(),
        }
    }
}

/// Composite operators arranged in the circuit's degree-of-freedom order.
#[derive(Clone, Debug, PartialEq)]
pub struct OpVectors {
    pub dim: usize,
    pub charge: Vec<nd::Array2<C64>>,
    pub flux: Vec<nd::Array2<C64>>,
    pub disp_r: Vec<Operand>,
    pub disp_r_adj: Vec<Operand>,
    pub disp_l: Vec<Operand>,
    pub disp_l_adj: Vec<Operand>,
}

fn reverse_lookup(syms: &IndexMap<NodeId, String>) -> HashMap<&str, NodeId> {
    syms.iter().map(|(n, s)| (s.as_str(), *n)).collect()
}

impl OpVectors {
    /// Resolve every symbol in the circuit's operator vectors.
    ///
    /// Displacement symbols are looked up first among the forward and then
    /// among the adjoint displacement symbols, so either may appear in any of
    /// the four displacement vectors. [`DofEntry::Open`] resolves to
    /// [`Operand::Unit`].
    pub fn build<C>(circuit: &C, map: &CompositeMap) -> CqedResult<Self>
    where C: CircuitModel + ?Sized
    {
        let charge_rev = reverse_lookup(circuit.dof_symbols(DofKind::Charge));
        let flux_rev = reverse_lookup(circuit.dof_symbols(DofKind::Flux));
        let disp_rev = reverse_lookup(circuit.dof_symbols(DofKind::Disp));
        let disp_adj_rev
            = reverse_lookup(circuit.dof_symbols(DofKind::DispAdj));

        let unknown = |sym: &str| CqedError::config(
            format!("unknown degree-of-freedom symbol '{sym}'"));

        let charge: Vec<nd::Array2<C64>>
            = circuit.charge_vector().iter()
            .map(|s| {
                let node = *charge_rev.get(s.as_str())
                    .ok_or_else(|| unknown(s))?;
                Ok(map.require(node)?.charge.clone())
            })
            .collect::<CqedResult<_>>()?;
        let flux: Vec<nd::Array2<C64>>
            = circuit.flux_vector().iter()
            .map(|s| {
                let node = *flux_rev.get(s.as_str())
                    .ok_or_else(|| unknown(s))?;
                Ok(map.require(node)?.flux.clone())
            })
            .collect::<CqedResult<_>>()?;

        let disp = |entries: &[DofEntry]| -> CqedResult<Vec<Operand>> {
            entries.iter()
                .map(|entry| match entry {
                    DofEntry::Open => Ok(Operand::Unit),
                    DofEntry::Symbol(s) => {
                        if let Some(&node) = disp_rev.get(s.as_str()) {
                            Ok(Operand::Op(map.require(node)?.disp.clone()))
                        } else if let Some(&node) = disp_adj_rev.get(s.as_str()) {
                            Ok(Operand::Op(map.require(node)?.disp_adj.clone()))
                        } else {
                            Err(unknown(s))
                        }
                    },
                })
                .collect()
        };
        Ok(Self {
            dim: map.dim(),
            charge,
            flux,
            disp_r: disp(circuit.right_disp_vector(false))?,
            disp_r_adj: disp(circuit.right_disp_vector(true))?,
            disp_l: disp(circuit.left_disp_vector(false))?,
            disp_l_adj: disp(circuit.left_disp_vector(true))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use crate::{
        circuit::{ Edge, EdgeKind, GROUND, SymbolicCircuit },
        operators::Basis,
        units::Units,
    };

    #[test]
    fn expanded_operator_reduces_to_factor() {
        let dims = [3, 2, 4];
        let op = nd::array![
            [C64::new(1.0, 0.0), C64::new(0.5, -2.0)],
            [C64::new(0.0, 3.0), C64::new(-1.0, 0.25)],
        ];
        let big = expand_op(&dims, 1, &op);
        assert_eq!(big.shape(), &[24, 24]);
        let index = |i: usize, a: usize, k: usize| (i * 2 + a) * 4 + k;
        for (i, k, i2, k2) in (0..3).cartesian_product(0..4)
            .cartesian_product((0..3).cartesian_product(0..4))
            .map(|((i, k), (i2, k2))| (i, k, i2, k2))
        {
            for (a, b) in (0..2).cartesian_product(0..2) {
                let x = big[[index(i, a, k), index(i2, b, k2)]];
                if i == i2 && k == k2 {
                    assert_eq!(x, op[[a, b]]);
                } else {
                    assert_eq!(x, C64::new(0.0, 0.0));
                }
            }
        }
    }

    #[test]
    fn operator_vectors_follow_dof_order() {
        let circuit = SymbolicCircuit::new(
            [1, 2],
            [
                (Edge::new(GROUND, 1), EdgeKind::Junction),
                (Edge::new(1, 2), EdgeKind::Junction),
            ],
        ).unwrap();
        let units = Units::default();
        let bundles: IndexMap<NodeId, OperatorBundle>
            = [
                (1, Basis::Charge.bundle(1, None, &units).unwrap()),
                (2, Basis::Charge.bundle(2, None, &units).unwrap()),
            ]
            .into_iter()
            .collect();
        let map = CompositeMap::build(circuit.nodes(), &bundles).unwrap();
        assert_eq!(map.dim(), 15);
        let ops = OpVectors::build(&circuit, &map).unwrap();
        assert_eq!(ops.charge.len(), 2);
        assert_eq!(ops.flux.len(), 2);
        assert_eq!(ops.disp_r.len(), 2);
        assert!(ops.disp_l[0].is_unit());
        // the left operator of the (1, 2) branch is the adjoint of node 1's
        assert_eq!(ops.disp_l[1], Operand::Op(map.get(1).unwrap().disp_adj.clone()));
        assert_eq!(ops.disp_l_adj[1], Operand::Op(map.get(1).unwrap().disp.clone()));
        assert_eq!(ops.charge[1], map.get(2).unwrap().charge);
    }

    #[test]
    fn missing_mode_is_rejected() {
        let bundles: IndexMap<NodeId, OperatorBundle> = IndexMap::new();
        assert!(matches!(
            CompositeMap::build(&[1], &bundles),
            Err(CqedError::Configuration(_)),
        ));
    }
}
