//! Lanczos eigensolver for Hermitian operators.
//!
//! Finds the lowest eigenvalues and eigenvectors of a complex Hermitian matrix
//! given only its action on a vector, with full reorthogonalization of the
//! Krylov basis. The operator is stored in compressed sparse row form when
//! built from a dense matrix.

use log::debug;
use ndarray as nd;
use ndarray_linalg::{ Eigh, EigValsh, UPLO };
use num_complex::Complex64 as C64;
use rand::{ Rng, SeedableRng, rngs::StdRng };
use crate::error::{ CqedError, CqedResult };

const SEED: u64 = 10546;

/// Norm below which the Krylov space is taken to be exhausted.
const BREAKDOWN: f64 = 1e-12;

/// Norm below which a projected start vector is taken to be zero.
const EXHAUSTED: f64 = 1e-8;

/// Sparse matrix in compressed sparse row format.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix {
    pub nrows: usize,
    pub row_ptr: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub values: Vec<C64>,
}

impl CsrMatrix {
    /// Keep all entries of `A` with modulus greater than `threshold`.
    pub fn from_dense(A: &nd::Array2<C64>, threshold: f64) -> Self {
        let nrows = A.nrows();
        let mut row_ptr: Vec<usize> = Vec::with_capacity(nrows + 1);
        let mut col_indices: Vec<usize> = Vec::new();
        let mut values: Vec<C64> = Vec::new();
        row_ptr.push(0);
        for row in A.rows() {
            for (j, a) in row.iter().enumerate() {
                if a.norm() > threshold {
                    col_indices.push(j);
                    values.push(*a);
                }
            }
            row_ptr.push(values.len());
        }
        Self { nrows, row_ptr, col_indices, values }
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize { self.values.len() }

    /// Compute `A x`.
    pub fn matvec(&self, x: &nd::Array1<C64>) -> nd::Array1<C64> {
        (0..self.nrows)
            .map(|i| {
                let start = self.row_ptr[i];
                let end = self.row_ptr[i + 1];
                (start..end)
                    .map(|k| self.values[k] * x[self.col_indices[k]])
                    .sum::<C64>()
            })
            .collect()
    }
}

fn vdot(a: &nd::Array1<C64>, b: &nd::Array1<C64>) -> C64 {
    a.iter().zip(b).map(|(ak, bk)| ak.conj() * bk).sum()
}

fn norm(a: &nd::Array1<C64>) -> f64 {
    a.iter().map(|ak| ak.norm_sqr()).sum::<f64>().sqrt()
}

fn tridiagonal(alpha: &[f64], beta: &[f64]) -> nd::Array2<f64> {
    let m = alpha.len();
    let mut T: nd::Array2<f64> = nd::Array2::zeros((m, m));
    for i in 0..m {
        T[[i, i]] = alpha[i];
        if i > 0 {
            T[[i, i - 1]] = beta[i - 1];
            T[[i - 1, i]] = beta[i - 1];
        }
    }
    T
}

fn ritz_values(alpha: &[f64], beta: &[f64], k: usize)
    -> CqedResult<Vec<f64>>
{
    let mut vals: Vec<f64>
        = tridiagonal(alpha, beta).eigvalsh(UPLO::Lower)?.to_vec();
    vals.sort_by(|a, b| a.total_cmp(b));
    vals.truncate(k);
    Ok(vals)
}

/// Lowest `k` Ritz values with their Ritz vectors.
fn ritz_pairs(alpha: &[f64], beta: &[f64], basis: &[nd::Array1<C64>], k: usize)
    -> CqedResult<(Vec<f64>, Vec<nd::Array1<C64>>)>
{
    let m = alpha.len();
    // eigh returns eigenvalues in ascending order
    let (vals, S) = tridiagonal(alpha, beta).eigh(UPLO::Lower)?;
    let k = k.min(m);
    let vectors: Vec<nd::Array1<C64>>
        = S.columns().into_iter().take(k)
        .map(|s| {
            let mut v: nd::Array1<C64> = nd::Array1::zeros(basis[0].len());
            for (q, &sj) in basis.iter().take(m).zip(s) {
                v.scaled_add(C64::from(sj), q);
            }
            let n = norm(&v);
            if n > BREAKDOWN { v.mapv_inplace(|c| c / n); }
            v
        })
        .collect();
    Ok((vals.iter().take(k).copied().collect(), vectors))
}

fn project_out(w: &mut nd::Array1<C64>, basis: &[nd::Array1<C64>]) {
    for qi in basis.iter() {
        let overlap = vdot(qi, w);
        w.scaled_add(-overlap, qi);
    }
}

/// Random unit vector orthogonal to every vector in `locked`, or `None` if
/// `locked` already spans the space.
fn start_vector(rng: &mut StdRng, dim: usize, locked: &[nd::Array1<C64>])
    -> Option<nd::Array1<C64>>
{
    let mut q: nd::Array1<C64>
        = (0..dim)
        .map(|_| C64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5))
        .collect();
    let n0 = norm(&q);
    q.mapv_inplace(|qk| qk / n0);
    project_out(&mut q, locked);
    project_out(&mut q, locked);
    let n = norm(&q);
    (n > EXHAUSTED).then(|| q.mapv(|qk| qk / n))
}

/// One Lanczos run from `start` in the orthogonal complement of `locked`.
fn lanczos_run<F>(
    matvec: &F,
    start: nd::Array1<C64>,
    locked: &[nd::Array1<C64>],
    m: usize,
    k: usize,
    tol: f64,
) -> CqedResult<(Vec<f64>, Vec<nd::Array1<C64>>)>
where F: Fn(&nd::Array1<C64>) -> nd::Array1<C64>
{
    let k = k.min(m);
    let mut basis: Vec<nd::Array1<C64>> = Vec::with_capacity(m + 1);
    basis.push(start);
    let mut alpha: Vec<f64> = Vec::with_capacity(m);
    let mut beta: Vec<f64> = Vec::with_capacity(m);
    let mut prev: Vec<f64> = vec![f64::MAX; k];

    for j in 0..m {
        let mut w = matvec(&basis[j]);
        let a = vdot(&basis[j], &w).re;
        alpha.push(a);
        w.scaled_add(C64::from(-a), &basis[j]);
        if j > 0 {
            w.scaled_add(C64::from(-beta[j - 1]), &basis[j - 1]);
        }
        project_out(&mut w, locked);
        project_out(&mut w, &basis);
        let b = norm(&w);

        if (j + 1) % 10 == 0 || j + 1 == m || b < BREAKDOWN {
            let vals = ritz_values(&alpha, &beta, k)?;
            let change
                = vals.iter().zip(prev.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0_f64, f64::max);
            if vals.len() == k && change < tol {
                debug!("lanczos converged at iteration {} (change {change:.2e})",
                    j + 1);
                return ritz_pairs(&alpha, &beta, &basis, k);
            }
            prev = vals;
        }
        if b < BREAKDOWN {
            debug!("lanczos found an invariant subspace at iteration {}", j + 1);
            return ritz_pairs(&alpha, &beta, &basis, k);
        }
        if j + 1 < m {
            beta.push(b);
            basis.push(w.mapv(|wk| wk / b));
        }
    }
    debug!("lanczos reached the iteration limit ({m})");
    ritz_pairs(&alpha, &beta, &basis, k)
}

/// Lanczos iteration with full reorthogonalization and deflated restarts.
///
/// `matvec` computes `H v` for a Hermitian `H` of dimension `dim`. Within a
/// run, the `k` lowest Ritz values are checked every ten iterations, and the
/// run stops when none of them moves by more than `tol` or the Krylov space
/// is exhausted. A single run only sees one copy of each degenerate
/// eigenvalue, so its Ritz pairs are locked and the iteration restarts in
/// their orthogonal complement. Restarts stop once the lowest value found in
/// the complement is no lower than the `k`-th lowest locked value, or the
/// locked vectors span the space.
///
/// Returns the `k` lowest Ritz values in ascending order with the
/// corresponding Ritz vectors as columns.
pub fn lanczos<F>(matvec: F, dim: usize, k: usize, max_iter: usize, tol: f64)
    -> CqedResult<(nd::Array1<f64>, nd::Array2<C64>)>
where F: Fn(&nd::Array1<C64>) -> nd::Array1<C64>
{
    let k = k.min(dim);
    if k == 0 {
        return Ok((nd::Array1::zeros(0), nd::Array2::zeros((dim, 0))));
    }
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut values: Vec<f64> = Vec::new();
    let mut vectors: Vec<nd::Array1<C64>> = Vec::new();
    let mut runs: usize = 0;
    while let Some(start) = start_vector(&mut rng, dim, &vectors) {
        let m = max_iter.clamp(1, dim.saturating_sub(vectors.len()).max(1));
        let (vals, vecs) = lanczos_run(&matvec, start, &vectors, m, k, tol)?;
        runs += 1;
        let Some(&lowest) = vals.first() else { break; };
        values.extend(vals);
        vectors.extend(vecs);
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        if sorted.len() >= k && lowest >= sorted[k - 1] - tol {
            break;
        }
    }
    debug!("lanczos locked {} vectors in {runs} runs", vectors.len());
    if values.len() < k {
        return Err(CqedError::Eigensolver(format!(
            "found {} of {k} requested eigenpairs", values.len())));
    }

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    order.truncate(k);
    let E: nd::Array1<f64> = order.iter().map(|&j| values[j]).collect();
    let mut V: nd::Array2<C64> = nd::Array2::zeros((dim, k));
    for (mut col, &j) in V.columns_mut().into_iter().zip(order.iter()) {
        col.assign(&vectors[j]);
    }
    Ok((E, V))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn hermitian(n: usize) -> nd::Array2<C64> {
        nd::Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                C64::from(i as f64 * 0.75 - 2.0)
            } else if i + 1 == j {
                C64::new(0.3, 0.1 * i as f64)
            } else if j + 1 == i {
                C64::new(0.3, -0.1 * j as f64)
            } else {
                C64::from(0.0)
            }
        })
    }

    #[test]
    fn csr_matvec_matches_dense() {
        let H = hermitian(12);
        let csr = CsrMatrix::from_dense(&H, 1e-15);
        assert_eq!(csr.nnz(), 12 + 2 * 11);
        let x: nd::Array1<C64>
            = (0..12).map(|k| C64::new(k as f64, 1.0)).collect();
        let y = csr.matvec(&x);
        let y0 = H.dot(&x);
        for (a, b) in y.iter().zip(&y0) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-12);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn lowest_eigenpairs_match_dense() {
        let H = hermitian(40);
        let csr = CsrMatrix::from_dense(&H, 0.0);
        let (vals, V)
            = lanczos(|v| csr.matvec(v), 40, 4, 40, 1e-12).unwrap();
        let exact = H.eigvalsh(UPLO::Lower).unwrap();
        assert_eq!(V.shape(), &[40, 4]);
        for (k, v) in vals.iter().enumerate() {
            assert_abs_diff_eq!(*v, exact[k], epsilon = 1e-8);
            let x = V.column(k).to_owned();
            let r = H.dot(&x) - x.mapv(|xk| xk * *v);
            assert!(norm(&r) < 1e-6);
        }
    }

    #[test]
    fn degenerate_pairs_are_all_found() {
        let block = hermitian(6);
        let mut H: nd::Array2<C64> = nd::Array2::zeros((12, 12));
        H.slice_mut(nd::s![..6, ..6]).assign(&block);
        H.slice_mut(nd::s![6.., 6..]).assign(&block);
        let csr = CsrMatrix::from_dense(&H, 0.0);
        let (vals, V)
            = lanczos(|v| csr.matvec(v), 12, 4, 12, 1e-12).unwrap();
        let exact = block.eigvalsh(UPLO::Lower).unwrap();
        assert_eq!(V.shape(), &[12, 4]);
        for (k, v) in vals.iter().enumerate() {
            assert_abs_diff_eq!(*v, exact[k / 2], epsilon = 1e-8);
        }
    }

    #[test]
    fn exhausted_space_returns_every_pair() {
        let H: nd::Array2<C64> = nd::Array2::from_diag(
            &nd::array![C64::from(1.0), C64::from(1.0), C64::from(1.0)]);
        let (vals, V) = lanczos(|v| H.dot(v), 3, 3, 10, 1e-10).unwrap();
        assert_eq!(vals.len(), 3);
        assert_eq!(V.shape(), &[3, 3]);
        vals.iter().for_each(|v| assert_abs_diff_eq!(*v, 1.0, epsilon = 1e-12));
    }
}
