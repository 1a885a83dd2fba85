//! Dense and sparse diagonalization of Hamiltonians.

use std::str::FromStr;
use log::debug;
use ndarray as nd;
use ndarray_linalg::{ Eigh, EigValsh, UPLO };
use num_complex::Complex64 as C64;
use serde::{ Deserialize, Serialize };
use crate::{
    error::{ CqedError, CqedResult },
    lanczos::{ CsrMatrix, lanczos },
};

/// Which part of the spectrum the sparse solver targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Which {
    /// Smallest algebraic.
    #[default]
    SA,
    /// Largest algebraic.
    LA,
    /// Smallest magnitude.
    SM,
    /// Largest magnitude.
    LM,
}

impl FromStr for Which {
    type Err = CqedError;

    fn from_str(s: &str) -> CqedResult<Self> {
        match s {
            "SA" => Ok(Self::SA),
            "LA" => Ok(Self::LA),
            "SM" => Ok(Self::SM),
            "LM" => Ok(Self::LM),
            _ => Err(CqedError::config(format!(
                "unknown eigenvalue selection '{s}'; expected one of SA, LA, \
                SM, LM"
            ))),
        }
    }
}

fn default_tol() -> f64 { 1e-3 }

/// Options for the sparse solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseOpts {
    /// Shift; eigenvalues closest to `sigma` are returned when set.
    #[serde(default)]
    pub sigma: Option<f64>,
    #[serde(default)]
    pub which: Which,
    #[serde(default)]
    pub max_iter: Option<usize>,
    #[serde(default = "default_tol")]
    pub tol: f64,
}

impl Default for SparseOpts {
    fn default() -> Self {
        Self { sigma: None, which: Which::SA, max_iter: None, tol: default_tol() }
    }
}

fn default_eigvalues() -> usize { 5 }

/// Diagonalizer settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagConfig {
    /// Number of eigenpairs requested from the sparse solver.
    #[serde(default = "default_eigvalues")]
    pub eigvalues: usize,
    #[serde(default)]
    pub get_vectors: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default)]
    pub sparse_opts: SparseOpts,
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            eigvalues: default_eigvalues(),
            get_vectors: false,
            sparse: false,
            sparse_opts: SparseOpts::default(),
        }
    }
}

/// Result of a diagonalization.
#[derive(Clone, Debug, PartialEq)]
pub enum Spectrum {
    Values(nd::Array1<f64>),
    /// Eigenvalues with eigenvectors as columns.
    Pairs(nd::Array1<f64>, nd::Array2<C64>),
}

impl Spectrum {
    pub fn energies(&self) -> &nd::Array1<f64> {
        match self {
            Self::Values(E) => E,
            Self::Pairs(E, _) => E,
        }
    }

    pub fn states(&self) -> Option<&nd::Array2<C64>> {
        match self {
            Self::Values(_) => None,
            Self::Pairs(_, V) => Some(V),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Solver {
    Dense,
    Sparse,
}

impl Solver {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Sparse => "sparse",
        }
    }
}

impl DiagConfig {
    pub fn solver(&self) -> Solver {
        if self.sparse { Solver::Sparse } else { Solver::Dense }
    }

    /// Diagonalize a Hermitian matrix with the configured solver.
    pub fn diagonalize(&self, H: &nd::Array2<C64>) -> CqedResult<Spectrum> {
        if H.nrows() != H.ncols() {
            return Err(CqedError::incompatible(format!(
                "cannot diagonalize a non-square matrix of shape {:?}",
                H.shape(),
            )));
        }
        match self.solver() {
            Solver::Dense => self.dense(H),
            Solver::Sparse => self.sparse(H),
        }
    }

    fn dense(&self, H: &nd::Array2<C64>) -> CqedResult<Spectrum> {
        if self.get_vectors {
            let (E, V) = H.eigh(UPLO::Lower)?;
            Ok(Spectrum::Pairs(E, V))
        } else {
            Ok(Spectrum::Values(H.eigvalsh(UPLO::Lower)?))
        }
    }

    fn sparse(&self, H: &nd::Array2<C64>) -> CqedResult<Spectrum> {
        let dim = H.nrows();
        let k = self.eigvalues.min(dim);
        if k == 0 {
            return Err(CqedError::config(
                "sparse diagonalization needs at least one eigenvalue of a \
                non-empty matrix"
            ));
        }
        let opts = &self.sparse_opts;
        let max_iter
            = opts.max_iter
            .unwrap_or_else(|| (20 * k).max(100))
            .min(dim);
        let csr = CsrMatrix::from_dense(H, 0.0);
        debug!(
            "sparse diagonalization: dim={dim}, k={k}, max_iter={max_iter}, \
            nnz={}",
            csr.nnz(),
        );
        let shift = opts.sigma
            .or_else(|| (opts.which == Which::SM).then_some(0.0));
        let (_, V) = match (shift, opts.which) {
            (Some(sigma), _) => {
                let shifted = |v: &nd::Array1<C64>| {
                    let w = csr.matvec(v) - v.mapv(|vk| vk * sigma);
                    csr.matvec(&w) - w.mapv(|wk| wk * sigma)
                };
                lanczos(shifted, dim, k, max_iter, opts.tol)?
            },
            (None, Which::LA) => {
                let neg = |v: &nd::Array1<C64>| -csr.matvec(v);
                lanczos(neg, dim, k, max_iter, opts.tol)?
            },
            (None, Which::LM) => {
                let neg_sq = |v: &nd::Array1<C64>| -csr.matvec(&csr.matvec(v));
                lanczos(neg_sq, dim, k, max_iter, opts.tol)?
            },
            (None, _) => {
                lanczos(|v| csr.matvec(v), dim, k, max_iter, opts.tol)?
            },
        };

        let rayleigh: Vec<f64>
            = V.columns().into_iter()
            .map(|v| {
                let Hv = csr.matvec(&v.to_owned());
                v.iter().zip(&Hv).map(|(a, b)| a.conj() * b).sum::<C64>().re
            })
            .collect();
        let mut order: Vec<usize> = (0..rayleigh.len()).collect();
        order.sort_by(|&a, &b| rayleigh[a].total_cmp(&rayleigh[b]));
        let E: nd::Array1<f64> = order.iter().map(|&j| rayleigh[j]).collect();
        if self.get_vectors {
            let V = V.select(nd::Axis(1), &order);
            Ok(Spectrum::Pairs(E, V))
        } else {
            Ok(Spectrum::Values(E))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::operators::adjoint;

    /// Charge-basis transmon with truncation 6.
    fn transmon_matrix() -> nd::Array2<C64> {
        let n = 6_i32;
        let dim = (2 * n + 1) as usize;
        let ng = 0.2;
        nd::Array2::from_shape_fn((dim, dim), |(i, j)| {
            let q = i as f64 - n as f64;
            if i == j {
                C64::from(4.0 * (q - ng).powi(2))
            } else if i + 1 == j || j + 1 == i {
                C64::from(-7.5)
            } else {
                C64::from(0.0)
            }
        })
    }

    /// Free charge island with truncation 3; every level above the lowest is
    /// doubly degenerate.
    fn free_island() -> nd::Array2<C64> {
        let d: nd::Array1<C64>
            = (-3_i32..=3).map(|q| C64::from(0.5 * f64::from(q * q))).collect();
        nd::Array2::from_diag(&d)
    }

    fn sparse(eigvalues: usize, which: Which) -> DiagConfig {
        DiagConfig {
            eigvalues,
            get_vectors: true,
            sparse: true,
            sparse_opts: SparseOpts { which, tol: 1e-10, ..SparseOpts::default() },
        }
    }

    #[test]
    fn which_parses_known_names() {
        assert_eq!("LM".parse::<Which>().unwrap(), Which::LM);
        assert!(matches!(
            "XX".parse::<Which>(),
            Err(CqedError::Configuration(_)),
        ));
    }

    #[test]
    fn dense_returns_full_spectrum() {
        let H = transmon_matrix();
        let mut diag = DiagConfig::default();
        let spec = diag.diagonalize(&H).unwrap();
        assert_eq!(spec.energies().len(), 13);
        assert!(spec.states().is_none());
        diag.get_vectors = true;
        let spec = diag.diagonalize(&H).unwrap();
        assert_eq!(spec.states().unwrap().shape(), &[13, 13]);
    }

    #[test]
    fn sparse_matches_dense_lowest() {
        let H = transmon_matrix();
        let exact = DiagConfig::default().diagonalize(&H).unwrap();
        let diag = DiagConfig {
            eigvalues: 3,
            get_vectors: true,
            sparse: true,
            sparse_opts: SparseOpts { tol: 1e-10, ..SparseOpts::default() },
        };
        let spec = diag.diagonalize(&H).unwrap();
        assert_eq!(spec.energies().len(), 3);
        assert_eq!(spec.states().unwrap().shape(), &[13, 3]);
        for (a, b) in spec.energies().iter().zip(exact.energies()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
    }

    #[test]
    fn sparse_largest_algebraic() {
        let H = transmon_matrix();
        let exact = DiagConfig::default().diagonalize(&H).unwrap();
        let diag = DiagConfig {
            eigvalues: 2,
            get_vectors: false,
            sparse: true,
            sparse_opts: SparseOpts {
                which: Which::LA,
                tol: 1e-10,
                ..SparseOpts::default()
            },
        };
        let spec = diag.diagonalize(&H).unwrap();
        let E = exact.energies();
        assert_abs_diff_eq!(spec.energies()[0], E[11], epsilon = 1e-8);
        assert_abs_diff_eq!(spec.energies()[1], E[12], epsilon = 1e-8);
    }

    #[test]
    fn sparse_resolves_degenerate_levels() {
        let H = free_island();
        let exact = DiagConfig::default().diagonalize(&H).unwrap();
        for k in [3, 5] {
            let spec = sparse(k, Which::SA).diagonalize(&H).unwrap();
            assert_eq!(spec.energies().len(), k);
            for (a, b) in spec.energies().iter().zip(exact.energies()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
            }
            let V = spec.states().unwrap();
            let overlaps = adjoint(V).dot(V);
            for ((i, j), x) in overlaps.indexed_iter() {
                let delta = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(x.re, delta, epsilon = 1e-8);
                assert_abs_diff_eq!(x.im, 0.0, epsilon = 1e-8);
            }
        }
        let top = sparse(2, Which::LA).diagonalize(&H).unwrap();
        assert_abs_diff_eq!(top.energies()[0], 4.5, epsilon = 1e-8);
        assert_abs_diff_eq!(top.energies()[1], 4.5, epsilon = 1e-8);
    }
}
