//! Single-mode operator bundles.
//!
//! A mode is described in one of three bases, each producing the same four
//! operators: charge, flux, and the forward and adjoint displacement operators
//! used to build Josephson terms.
//!
//! - **Charge**: dimension `2n + 1`; the charge operator is diagonal with
//!   eigenvalues `n, n - 1, ..., -n`, and the flux operator is its discrete
//!   Fourier conjugate.
//! - **Flux**: dimension `2n + 1`; the flux operator is diagonal on an even grid
//!   over `[-flux_max, flux_max]`, and the charge operator is the discrete
//!   Fourier conjugate divided by the grid spacing.
//! - **Oscillator**: dimension `n`; charge and flux are the usual ladder
//!   operator combinations for a mode of impedance `Z`.

use std::f64::consts::TAU;
use log::debug;
use ndarray as nd;
use ndarray_linalg::{ Eigh, UPLO };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::{
    circuit::NodeId,
    error::{ CqedError, CqedResult },
    expr::{ Expr, Subs },
    units::Units,
};

/// Default half-width of the flux grid in the flux basis.
pub const DEFAULT_FLUX_MAX: f64 = 4.0;

/// Representation used for a single mode.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Basis {
    Charge,
    Flux { flux_max: f64 },
    Oscillator,
}

impl Basis {
    /// Flux basis with the default grid width.
    pub fn flux() -> Self { Self::Flux { flux_max: DEFAULT_FLUX_MAX } }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Charge => "charge",
            Self::Flux { .. } => "flux",
            Self::Oscillator => "oscillator",
        }
    }

    /// Hilbert space dimension for a truncation.
    pub fn dim(&self, truncation: usize) -> usize {
        match self {
            Self::Oscillator => truncation,
            Self::Charge | Self::Flux { .. } => 2 * truncation + 1,
        }
    }

    /// Check that a truncation gives a usable operator set.
    pub fn check_truncation(&self, truncation: usize) -> CqedResult<()> {
        match self {
            Self::Charge => Ok(()),
            Self::Flux { flux_max } => {
                if truncation == 0 {
                    return Err(CqedError::config(
                        "flux basis needs a truncation of at least 1"));
                }
                if !(flux_max.is_finite() && *flux_max > 0.0) {
                    return Err(CqedError::config(format!(
                        "flux basis grid half-width must be positive, got \
                        {flux_max}"
                    )));
                }
                Ok(())
            },
            Self::Oscillator => {
                if truncation == 0 {
                    return Err(CqedError::config(
                        "oscillator basis needs a truncation of at least 1"));
                }
                Ok(())
            },
        }
    }

    /// Generate the operators for a truncation. `impedance` is only used by
    /// the oscillator basis, which requires it.
    pub fn bundle(&self, truncation: usize, impedance: Option<f64>, units: &Units)
        -> CqedResult<OperatorBundle>
    {
        self.check_truncation(truncation)?;
        match self {
            Self::Charge => charge_basis(truncation),
            Self::Flux { flux_max } => flux_basis(truncation, *flux_max),
            Self::Oscillator => {
                let Z = impedance.ok_or_else(|| CqedError::config(
                    "oscillator basis needs an impedance"))?;
                oscillator_basis(truncation, Z, units)
            },
        }
    }
}

/// Charge, flux, and displacement operators for a single mode.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorBundle {
    pub charge: nd::Array2<C64>,
    pub flux: nd::Array2<C64>,
    pub disp: nd::Array2<C64>,
    pub disp_adj: nd::Array2<C64>,
}

impl OperatorBundle {
    pub fn dim(&self) -> usize { self.charge.nrows() }
}

/// Basis and truncation chosen for a mode.
#[derive(Clone, Debug, PartialEq)]
pub struct ModeConfig {
    pub truncation: usize,
    pub basis: Basis,
    /// Characteristic impedance, `sqrt(Cinv[i, i] / Linv[i, i])`.
    pub impedance: Option<Expr>,
}

impl ModeConfig {
    pub fn dim(&self) -> usize { self.basis.dim(self.truncation) }

    /// Evaluate the characteristic impedance of an oscillator mode, scaled by
    /// the impedance prefactor.
    pub fn resolve_impedance(&self, node: NodeId, subs: &Subs, units: &Units)
        -> CqedResult<Option<f64>>
    {
        if self.basis != Basis::Oscillator { return Ok(None); }
        let unset = || CqedError::config(format!(
            "impedance of oscillator mode on node {node} does not resolve to a \
            finite, non-zero value; check that its capacitance and inductance \
            parameters are set"
        ));
        let Z = self.impedance.as_ref()
            .ok_or_else(unset)?
            .eval(subs)
            .map_err(|_| unset())?
            * units.impe;
        if !Z.is_finite() || Z == 0.0 { return Err(unset()); }
        Ok(Some(Z))
    }

    /// Generate the mode's operators with parameters taken from `subs`.
    pub fn bundle(&self, node: NodeId, subs: &Subs, units: &Units)
        -> CqedResult<OperatorBundle>
    {
        let Z = self.resolve_impedance(node, subs, units)?;
        debug!(
            "generating {} basis operators for node {node} (truncation {}, \
            dimension {})",
            self.basis.name(), self.truncation, self.dim(),
        );
        self.basis.bundle(self.truncation, Z, units)
    }
}

/// Conjugate transpose.
pub fn adjoint(A: &nd::Array2<C64>) -> nd::Array2<C64> {
    A.t().mapv(|a| a.conj())
}

/// Compute the outer product `|a⟩⟨b|`.
pub fn outer_prod(a: &nd::Array1<C64>, b: &nd::Array1<C64>) -> nd::Array2<C64>
{
    let n = a.len();
    let m = b.len();
    nd::Array2::from_shape_fn((n, m), |(i, j)| a[i] * b[j].conj())
}

fn diag_op<I>(vals: I) -> nd::Array2<C64>
where I: IntoIterator<Item = f64>
{
    let d: nd::Array1<C64> = vals.into_iter().map(C64::from).collect();
    nd::Array2::from_diag(&d)
}

/// Basis indices of a diagonal operator, ordered by ascending eigenvalue.
fn diagonal_eigenstates(op: &nd::Array2<C64>) -> Vec<usize> {
    let d = op.diag();
    let mut order: Vec<usize> = (0..d.len()).collect();
    order.sort_by(|&a, &b| d[a].re.total_cmp(&d[b].re));
    order
}

/// Build the discrete Fourier conjugate of a diagonal operator of dimension
/// `2n + 1`.
///
/// The eigenstates `|q⟩`, labeled by `q = -n, ..., n` in order of ascending
/// eigenvalue, are transformed into `|k⟩ = Σ_q exp(2πi k q / N) |q⟩ / sqrt(N)`
/// and the conjugate is `Σ_k (k / N) |k⟩⟨k|`.
fn fourier_conjugate(op: &nd::Array2<C64>, n: usize) -> nd::Array2<C64> {
    let dim = 2 * n + 1;
    let N = dim as f64;
    let order = diagonal_eigenstates(op);
    let labels: Vec<f64> = (0..dim).map(|j| j as f64 - n as f64).collect();
    let mut conj: nd::Array2<C64> = nd::Array2::zeros((dim, dim));
    for &k in labels.iter() {
        let mut phik: nd::Array1<C64> = nd::Array1::zeros(dim);
        for (&idx, &q) in order.iter().zip(labels.iter()) {
            phik[idx] += C64::from_polar(N.recip().sqrt(), TAU * k * q / N);
        }
        conj.scaled_add(C64::from(k / N), &outer_prod(&phik, &phik));
    }
    conj
}

/// Compute `exp(c A)` for Hermitian `A` from its eigendecomposition.
fn exp_hermitian(A: &nd::Array2<C64>, c: C64) -> CqedResult<nd::Array2<C64>> {
    let (E, V) = A.eigh(UPLO::Lower)?;
    let expE: nd::Array1<C64> = E.mapv(|e| (c * e).exp());
    Ok((&V * &expE).dot(&adjoint(&V)))
}

/// Rank-1 correction on the element connecting the last and first basis
/// states, pinning the wrap-around amplitude of a displacement operator to
/// unit modulus (or zero, if there is none).
///
/// The amplitude is pinned rather than removed, so a displacement by a full
/// period wraps around and `D` stays unitary. For the exact exponential this
/// only cleans up rounding in that element.
fn periodic_correction(D: &mut nd::Array2<C64>) {
    let last = D.nrows() - 1;
    let w = D[[last, 0]];
    let target = if w.norm() > 0.5 { w / w.norm() } else { C64::zero() };
    D[[last, 0]] += target - w;
}

fn displacement(flux: &nd::Array2<C64>)
    -> CqedResult<(nd::Array2<C64>, nd::Array2<C64>)>
{
    let mut D = exp_hermitian(flux, -C64::i() * TAU)?;
    periodic_correction(&mut D);
    let Dadj = adjoint(&D);
    Ok((D, Dadj))
}

fn charge_basis(n: usize) -> CqedResult<OperatorBundle> {
    let dim = 2 * n + 1;
    let charge = diag_op((0..dim).map(|m| n as f64 - m as f64));
    let flux = fourier_conjugate(&charge, n);
    let (disp, disp_adj) = displacement(&flux)?;
    Ok(OperatorBundle { charge, flux, disp, disp_adj })
}

fn flux_basis(n: usize, flux_max: f64) -> CqedResult<OperatorBundle> {
    let dim = 2 * n + 1;
    let grid: nd::Array1<f64> = nd::Array1::linspace(-flux_max, flux_max, dim);
    let dx = grid[1] - grid[0];
    let flux = diag_op(grid.iter().copied());
    let charge = fourier_conjugate(&flux, n) / C64::from(dx);
    let (disp, disp_adj) = displacement(&flux)?;
    Ok(OperatorBundle { charge, flux, disp, disp_adj })
}

/// Truncated annihilation operator.
fn destroy(n: usize) -> nd::Array2<C64> {
    let mut a: nd::Array2<C64> = nd::Array2::zeros((n, n));
    (1..n).for_each(|k| { a[[k - 1, k]] = C64::from((k as f64).sqrt()); });
    a
}

fn oscillator_basis(n: usize, Z: f64, units: &Units)
    -> CqedResult<OperatorBundle>
{
    let a = destroy(n);
    let ad = adjoint(&a);
    let charge
        = (&ad - &a) * (C64::i() * (0.5 / Z).sqrt() * units.chg_osc);
    let flux = (&ad + &a) * C64::from((0.5 * Z).sqrt() * units.flx_osc);
    let phase = &flux * C64::from(units.osc_phase / units.flx_osc);
    let disp = exp_hermitian(&phase, C64::i())?;
    let disp_adj = adjoint(&disp);
    Ok(OperatorBundle { charge, flux, disp, disp_adj })
}
