//! Assembly of the Hamiltonian and derived observables from composite
//! operators and numerical coefficients.
//!
//! With charge operators `Q`, flux operators `P`, and displacement operators
//! `Dl`, `Dr` on either side of each Josephson branch, the Hamiltonian is
//! `H = Hq + Hp + Hj` where
//! - `Hq = Ec/2 · (Q + Qb)ᵗ · Cinv · (Q + Qb)`
//! - `Hp = El/2 · Pᵗ · Linv · P`
//! - `Hj = -Ej/2 · Σ_e Jvec[e] · (Pexp*[e] Dl†[e] Dr†[e] + Pexp[e] Dl[e] Dr[e])`

use std::f64::consts::TAU;
use indexmap::IndexMap;
use ndarray as nd;
use ndarray_linalg::{ EigValsh, Inverse, UPLO };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::{
    circuit::{ CircuitModel, Edge, EdgeKind, NodeId },
    compose::OpVectors,
    error::{ CqedError, CqedResult },
    operators::Basis,
    substitution::NumericSnapshot,
    units::Units,
};

fn check_len(what: &str, got: usize, expected: usize) -> CqedResult<()> {
    if got != expected {
        return Err(CqedError::config(format!(
            "{what} has {got} entries but the operator vectors have {expected}"
        )));
    }
    Ok(())
}

fn check_square(what: &str, M: &nd::Array2<f64>, n: usize) -> CqedResult<()> {
    if M.shape() != [n, n] {
        return Err(CqedError::config(format!(
            "{what} has shape {:?} but the operator vectors have {n} entries",
            M.shape(),
        )));
    }
    Ok(())
}

/// `Σ_ij M[i, j] X_i X_j`.
fn quadratic_form(X: &[nd::Array2<C64>], M: &nd::Array2<f64>, dim: usize)
    -> nd::Array2<C64>
{
    let mut acc: nd::Array2<C64> = nd::Array2::zeros((dim, dim));
    for ((i, j), &m) in M.indexed_iter() {
        if m == 0.0 { continue; }
        acc.scaled_add(C64::from(m), &X[i].dot(&X[j]));
    }
    acc
}

/// Charge operators shifted by their offset charges.
fn biased_charges(ops: &OpVectors, num: &NumericSnapshot)
    -> CqedResult<Vec<nd::Array2<C64>>>
{
    check_len("charge bias vector", num.Qb.len(), ops.charge.len())?;
    let eye: nd::Array2<C64> = nd::Array2::eye(ops.dim);
    let Qt: Vec<nd::Array2<C64>>
        = ops.charge.iter().zip(num.Qb.iter())
        .map(|(Q, &qb)| {
            if qb == 0.0 {
                Q.clone()
            } else {
                let mut Qt = Q.clone();
                Qt.scaled_add(C64::from(qb), &eye);
                Qt
            }
        })
        .collect();
    Ok(Qt)
}

/// Forward and backward Josephson tunneling operators of every branch,
/// `Pexp[e] Dl[e] Dr[e]` and `Pexp*[e] Dl†[e] Dr†[e]`.
fn tunneling_terms(ops: &OpVectors, num: &NumericSnapshot)
    -> CqedResult<Vec<(nd::Array2<C64>, nd::Array2<C64>)>>
{
    let m = num.Jvec.len();
    check_len("right displacement vector", ops.disp_r.len(), m)?;
    check_len("right adjoint displacement vector", ops.disp_r_adj.len(), m)?;
    check_len("left displacement vector", ops.disp_l.len(), m)?;
    check_len("left adjoint displacement vector", ops.disp_l_adj.len(), m)?;
    check_len("flux bias vector", num.Pexp.len(), m)?;
    let terms: Vec<(nd::Array2<C64>, nd::Array2<C64>)>
        = (0..m)
        .map(|e| {
            let fwd = ops.disp_l[e].dot(&ops.disp_r[e]).to_matrix(ops.dim)
                * num.Pexp[e];
            let bwd
                = ops.disp_l_adj[e].dot(&ops.disp_r_adj[e]).to_matrix(ops.dim)
                * num.Pexp_conj[e];
            (fwd, bwd)
        })
        .collect();
    Ok(terms)
}

/// Charging part of the Hamiltonian.
pub fn charging_term(ops: &OpVectors, num: &NumericSnapshot, units: &Units)
    -> CqedResult<nd::Array2<C64>>
{
    check_square("inverse capacitance", &num.Cinv, ops.charge.len())?;
    let Qt = biased_charges(ops, num)?;
    Ok(quadratic_form(&Qt, &num.Cinv, ops.dim) * C64::from(0.5 * units.ec))
}

/// Inductive part of the Hamiltonian.
pub fn inductive_term(ops: &OpVectors, num: &NumericSnapshot, units: &Units)
    -> CqedResult<nd::Array2<C64>>
{
    check_square("inverse inductance", &num.Linv, ops.flux.len())?;
    Ok(quadratic_form(&ops.flux, &num.Linv, ops.dim)
        * C64::from(0.5 * units.el))
}

/// Josephson part of the Hamiltonian.
pub fn josephson_term(ops: &OpVectors, num: &NumericSnapshot, units: &Units)
    -> CqedResult<nd::Array2<C64>>
{
    let mut Hj: nd::Array2<C64> = nd::Array2::zeros((ops.dim, ops.dim));
    for (&J, (fwd, bwd)) in num.Jvec.iter().zip(tunneling_terms(ops, num)?) {
        if J == 0.0 { continue; }
        Hj.scaled_add(C64::from(J), &(fwd + bwd));
    }
    Ok(Hj * C64::from(-0.5 * units.ej))
}

/// Full Hamiltonian.
pub fn hamiltonian(ops: &OpVectors, num: &NumericSnapshot, units: &Units)
    -> CqedResult<nd::Array2<C64>>
{
    let mut H = charging_term(ops, num, units)?;
    H += &inductive_term(ops, num, units)?;
    H += &josephson_term(ops, num, units)?;
    Ok(H)
}

/// Flux operator of a node, or zero for the ground node.
fn node_flux<'a>(
    nodes: &[NodeId],
    ops: &'a OpVectors,
    zero: &'a nd::Array2<C64>,
    n: NodeId,
) -> CqedResult<&'a nd::Array2<C64>>
{
    match nodes.iter().position(|&k| k == n) {
        None => Ok(zero),
        Some(k) => ops.flux.get(k).ok_or_else(|| CqedError::config(
            format!("no flux operator for node {n}"))),
    }
}

/// Current operator of every branch.
///
/// Inductive branches carry `IopL · (P2 - P1) · Linv_b[e, e]`, with the flux of
/// the ground node taken to be zero; every other branch carries the Josephson
/// current `IopJ · Jvec[e] · i/2 · (Pexp*[e] Dl†[e] Dr†[e] - Pexp[e] Dl[e] Dr[e])`.
pub fn branch_currents<C>(
    circuit: &C,
    ops: &OpVectors,
    num: &NumericSnapshot,
    units: &Units,
) -> CqedResult<IndexMap<Edge, nd::Array2<C64>>>
where C: CircuitModel + ?Sized
{
    let edges = circuit.edges();
    check_len("Josephson vector", num.Jvec.len(), edges.len())?;
    check_square("branch inverse inductance", &num.Linv_b, edges.len())?;
    let nodes = circuit.nodes();
    let zero: nd::Array2<C64> = nd::Array2::zeros((ops.dim, ops.dim));
    let flux_of = |n: NodeId| node_flux(nodes, ops, &zero, n);
    let terms = tunneling_terms(ops, num)?;
    let mut currents: IndexMap<Edge, nd::Array2<C64>> = IndexMap::new();
    for (e, (edge, (fwd, bwd))) in edges.iter().zip(terms).enumerate() {
        let I = match circuit.edge_kind(edge) {
            Some(EdgeKind::Inductive) => {
                let (n1, n2) = edge.nodes();
                (flux_of(n2)? - flux_of(n1)?)
                    * C64::from(units.iop_l * num.Linv_b[[e, e]])
            },
            _ => {
                (bwd - fwd)
                    * (0.5 * C64::i() * units.iop_j * num.Jvec[e])
            },
        };
        currents.insert(*edge, I);
    }
    Ok(currents)
}

/// Voltage operator of every node, `Vop · (Q + Qb)[i] · Cinv[i, i]`.
pub fn node_voltages<C>(
    circuit: &C,
    ops: &OpVectors,
    num: &NumericSnapshot,
    units: &Units,
) -> CqedResult<IndexMap<NodeId, nd::Array2<C64>>>
where C: CircuitModel + ?Sized
{
    check_square("inverse capacitance", &num.Cinv, ops.charge.len())?;
    check_len("node list", circuit.nodes().len(), ops.charge.len())?;
    let Qt = biased_charges(ops, num)?;
    let voltages: IndexMap<NodeId, nd::Array2<C64>>
        = circuit.nodes().iter().zip(Qt).enumerate()
        .map(|(i, (&node, Q))| {
            (node, Q * C64::from(units.vop * num.Cinv[[i, i]]))
        })
        .collect();
    Ok(voltages)
}

/// Charging energy of every degree of freedom, `Ec/2 · Cinv[i, i]`.
pub fn charging_energies(num: &NumericSnapshot, units: &Units)
    -> nd::Array1<f64>
{
    num.Cinv.diag().mapv(|c| 0.5 * c * units.ec)
}

/// Inductive energy of every degree of freedom, `El/2 · Linv[i, i]`.
pub fn flux_energies(num: &NumericSnapshot, units: &Units) -> nd::Array1<f64> {
    num.Linv.diag().mapv(|l| 0.5 * l * units.el)
}

/// Josephson energy of every branch, `Ej · Jvec[e]`.
pub fn josephson_energies(num: &NumericSnapshot, units: &Units)
    -> nd::Array1<f64>
{
    num.Jvec.mapv(|j| j * units.ej)
}

/// Compute `⟨l|O|r⟩`.
pub fn expectation(O: &nd::Array2<C64>, l: &nd::Array1<C64>, r: &nd::Array1<C64>)
    -> CqedResult<C64>
{
    if O.shape() != [l.len(), r.len()] {
        return Err(CqedError::incompatible(format!(
            "operator of shape {:?} between states of length {} and {}",
            O.shape(), l.len(), r.len(),
        )));
    }
    Ok(l.mapv(|a| a.conj()).dot(&O.dot(r)))
}

/// One operator or a list of them.
#[derive(Copy, Clone, Debug)]
pub enum Operators<'a> {
    One(&'a nd::Array2<C64>),
    Many(&'a [nd::Array2<C64>]),
}

/// One state or a list of them.
#[derive(Copy, Clone, Debug)]
pub enum States<'a> {
    One(&'a nd::Array1<C64>),
    Many(&'a [nd::Array1<C64>]),
}

/// Expectation values for every supported combination of operators and
/// states.
///
/// - one operator, one state pair: a single value
/// - many operators, one state pair: one value per operator
/// - many operators, many state pairs: operators and pairs matched by index
/// - one operator, many state pairs: one value per pair
///
/// The left and right states must both be single or both be lists of the
/// same length.
pub fn expectation_values(O: Operators<'_>, l: States<'_>, r: States<'_>)
    -> CqedResult<nd::Array1<C64>>
{
    use Operators as Ops;
    use States as St;
    match (O, l, r) {
        (Ops::One(O), St::One(l), St::One(r))
            => Ok(nd::array![expectation(O, l, r)?]),
        (Ops::Many(Os), St::One(l), St::One(r))
            => Os.iter().map(|O| expectation(O, l, r)).collect(),
        (Ops::Many(Os), St::Many(ls), St::Many(rs)) => {
            if Os.len() != ls.len() || ls.len() != rs.len() {
                return Err(CqedError::incompatible(format!(
                    "{} operators for {} left and {} right states",
                    Os.len(), ls.len(), rs.len(),
                )));
            }
            Os.iter().zip(ls).zip(rs)
                .map(|((O, l), r)| expectation(O, l, r))
                .collect()
        },
        (Ops::One(O), St::Many(ls), St::Many(rs)) => {
            if ls.len() != rs.len() {
                return Err(CqedError::incompatible(format!(
                    "{} left states for {} right states", ls.len(), rs.len())));
            }
            ls.iter().zip(rs).map(|(l, r)| expectation(O, l, r)).collect()
        },
        _ => Err(CqedError::incompatible(
            "left and right states must both be single states or both be lists"
        )),
    }
}

/// Fraction of zero elements, `1 - nnz / dim²`.
pub fn sparsity(O: &nd::Array2<C64>) -> f64 {
    let nnz = O.iter().filter(|a| !a.is_zero()).count();
    1.0 - nnz as f64 / O.len() as f64
}

/// Commutator `[P, Q]` of a mode's flux and charge operators.
///
/// In the charge basis the flux operator is in units of the flux quantum and
/// the charge operator in Cooper pairs, so the result is scaled by
/// `2e·Φ0/ħ = 2π`.
///
/// In the oscillator basis the truncation spoils the last diagonal element;
/// this is undone by multiplying with the inverse of `I - N |N-1⟩⟨N-1|`, so the
/// result is `i` times the identity for any truncation above 1.
pub fn commutator(Q: &nd::Array2<C64>, P: &nd::Array2<C64>, basis: &Basis)
    -> CqedResult<nd::Array2<C64>>
{
    if Q.shape() != P.shape() || !Q.is_square() {
        return Err(CqedError::incompatible(format!(
            "cannot commute operators of shapes {:?} and {:?}",
            Q.shape(), P.shape(),
        )));
    }
    let comm = P.dot(Q) - Q.dot(P);
    match basis {
        Basis::Oscillator => {
            let n = Q.nrows();
            let mut corr: nd::Array2<C64> = nd::Array2::eye(n);
            corr[[n - 1, n - 1]] -= C64::from(n as f64);
            Ok(comm.dot(&corr.inv()?))
        },
        Basis::Charge => Ok(comm * C64::from(TAU)),
        Basis::Flux { .. } => Ok(comm),
    }
}

/// Dressed energies of a qubit coupled to a resonator in the rotating-wave
/// approximation.
///
/// `E` and `V` hold the qubit's eigenvalues and eigenvectors (as columns) and
/// `op` the operator through which it couples. For each total excitation
/// number `n`, the strip of states `|i, n - i⟩` with bare energies
/// `(n - i) wr + E[i]` coupled by `g_i sqrt(n - i)` is diagonalized, where `g_i`
/// is `gc` times the matrix element `⟨i|op|i+1⟩` relative to `⟨0|op|1⟩`. Row
/// `n` of the result holds the strip's eigenvalues, each column following the
/// bare state it connects to; bare states are matched by the rank of `E[i] -
/// i wr`, with ties broken by index.
pub fn resonator_response(
    E: &nd::Array1<f64>,
    V: &nd::Array2<C64>,
    op: &nd::Array2<C64>,
    gc: f64,
    wr: f64,
    nmax: usize,
) -> CqedResult<nd::Array2<f64>>
{
    let tmax = E.len();
    if tmax < 2 || V.ncols() < tmax || V.nrows() != op.nrows() {
        return Err(CqedError::incompatible(format!(
            "need at least two eigenpairs matching a {}x{} operator, got {} \
            eigenvalues and eigenvectors of shape {:?}",
            op.nrows(), op.ncols(), tmax, V.shape(),
        )));
    }
    let E = E - E[0];
    let nstrip = nmax + 1 + tmax;
    let element = |i: usize, j: usize| -> C64 {
        V.column(i).mapv(|a| a.conj()).dot(&op.dot(&V.column(j)))
    };
    let norm = element(0, 1);
    if norm.is_zero() {
        return Err(CqedError::incompatible(
            "coupling operator has no matrix element between the two lowest \
            states"
        ));
    }
    let g: Vec<f64>
        = (0..tmax - 1).map(|i| gc * (element(i, i + 1) / norm).norm()).collect();

    let bare: Vec<f64> = (0..tmax).map(|i| E[i] - i as f64 * wr).collect();
    let mut ranked: Vec<usize> = (0..tmax).collect();
    ranked.sort_by(|&a, &b| bare[a].total_cmp(&bare[b]).then(a.cmp(&b)));
    let mut order: Vec<usize> = vec![0; tmax];
    ranked.iter().enumerate().for_each(|(rank, &i)| { order[i] = rank; });

    let mut response: nd::Array2<f64> = nd::Array2::zeros((nstrip, tmax));
    let mut strip: nd::Array2<f64> = nd::Array2::zeros((tmax, tmax));
    for n in 0..nstrip {
        strip.fill(0.0);
        for i in 0..tmax {
            strip[[i, i]] = (n as f64 - i as f64) * wr + E[i];
        }
        for i in 0..tmax - 1 {
            let photons = if n > i { ((n - i) as f64).sqrt() } else { 0.0 };
            strip[[i, i + 1]] = g[i] * photons;
            strip[[i + 1, i]] = g[i] * photons;
        }
        let e = strip.eigvalsh(UPLO::Lower)?;
        response.row_mut(n).iter_mut().zip(order.iter())
            .for_each(|(r, &k)| { *r = e[k]; });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::operators::adjoint;

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    #[test]
    fn expectation_shapes() {
        let O = nd::array![[c(1.0, 0.0), c(0.0, 1.0)], [c(0.0, -1.0), c(2.0, 0.0)]];
        let up = nd::array![c(1.0, 0.0), c(0.0, 0.0)];
        let down = nd::array![c(0.0, 0.0), c(1.0, 0.0)];
        let x = expectation(&O, &up, &down).unwrap();
        assert_eq!(x, c(0.0, 1.0));

        let Os = [O.clone(), O.clone() * c(2.0, 0.0)];
        let kets = [up.clone(), down.clone()];
        let v = expectation_values(
            Operators::Many(&Os), States::One(&down), States::One(&down)).unwrap();
        assert_eq!(v, nd::array![c(2.0, 0.0), c(4.0, 0.0)]);
        let v = expectation_values(
            Operators::One(&O), States::Many(&kets), States::Many(&kets)).unwrap();
        assert_eq!(v, nd::array![c(1.0, 0.0), c(2.0, 0.0)]);
        let v = expectation_values(
            Operators::Many(&Os), States::Many(&kets), States::Many(&kets))
            .unwrap();
        assert_eq!(v, nd::array![c(1.0, 0.0), c(4.0, 0.0)]);

        let short = [up.clone()];
        assert!(matches!(
            expectation_values(
                Operators::Many(&Os), States::Many(&short), States::Many(&short)),
            Err(CqedError::IncompatibleOperand(_)),
        ));
        assert!(matches!(
            expectation_values(
                Operators::One(&O), States::One(&up), States::Many(&kets)),
            Err(CqedError::IncompatibleOperand(_)),
        ));
        let long = nd::array![c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0)];
        assert!(expectation(&O, &long, &up).is_err());
    }

    #[test]
    fn sparsity_counts_zeros() {
        let O: nd::Array2<C64> = nd::Array2::eye(4);
        assert_abs_diff_eq!(sparsity(&O), 0.75);
    }

    #[test]
    fn oscillator_commutator_is_corrected() {
        let ops = Basis::Oscillator
            .bundle(5, Some(1.3), &Units::default()).unwrap();
        let comm = commutator(&ops.charge, &ops.flux, &Basis::Oscillator)
            .unwrap();
        for ((i, j), x) in comm.indexed_iter() {
            let expected = if i == j { c(0.0, 1.0) } else { c(0.0, 0.0) };
            assert_abs_diff_eq!((x - expected).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn resonator_response_uncoupled() {
        // with zero coupling the strips are diagonal
        let E = nd::array![0.0, 1.0, 2.5];
        let V: nd::Array2<C64> = nd::Array2::eye(3);
        let mut op: nd::Array2<C64> = nd::Array2::zeros((3, 3));
        op[[0, 1]] = c(1.0, 0.0);
        op[[1, 2]] = c(1.0, 0.0);
        let op = &op + &adjoint(&op);
        let wr = 10.0;
        let R = resonator_response(&E, &V, &op, 0.0, wr, 2).unwrap();
        assert_eq!(R.shape(), &[6, 3]);
        for n in 0..6 {
            for i in 0..3 {
                let expected = (n as f64 - i as f64) * wr + E[i];
                assert_abs_diff_eq!(R[[n, i]], expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn resonator_response_needs_two_states() {
        let E = nd::array![0.0];
        let V: nd::Array2<C64> = nd::Array2::eye(1);
        let op: nd::Array2<C64> = nd::Array2::eye(1);
        assert!(resonator_response(&E, &V, &op, 1.0, 1.0, 3).is_err());
    }
}
