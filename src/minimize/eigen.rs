use crate::error::MinimizerError;
use ndarray::prelude::*;

const MAX_SWEEPS: usize = 100;

/// Eigendecomposition of a symmetric matrix using the cyclic Jacobi method.
///
/// Only the upper triangle of `matrix` is read. Returns the eigenvalues in
/// ascending order and the matching eigenvectors as the columns of the
/// second array.
pub fn symmetric_eigen(
    matrix: ArrayView2<f64>,
) -> Result<(Array1<f64>, Array2<f64>), MinimizerError> {
    let n = matrix.nrows();
    if n == 0 || matrix.ncols() != n {
        return Err(MinimizerError::LinearAlgebraError(format!(
            "Matrix is not square: {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(MinimizerError::LinearAlgebraError(
            "Matrix has non-finite entries".to_string(),
        ));
    }

    let mut a = matrix.to_owned();
    let mut v = Array2::<f64>::eye(n);
    let mut d: Array1<f64> = a.diag().to_owned();
    let mut b = d.clone();
    let mut z = Array1::<f64>::zeros(n);

    let mut converged = false;
    for sweep in 0..MAX_SWEEPS {
        let off_diagonal: f64 = (0..n)
            .flat_map(|p| (p + 1..n).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]].abs())
            .sum();
        if off_diagonal == 0.0 {
            converged = true;
            break;
        }

        // Skip small rotations during the first sweeps
        let threshold = if sweep < 3 {
            0.2 * off_diagonal / (n * n) as f64
        } else {
            0.0
        };

        for p in 0..n - 1 {
            for q in p + 1..n {
                let g = 100.0 * a[[p, q]].abs();
                if sweep > 3 && d[p].abs() + g == d[p].abs() && d[q].abs() + g == d[q].abs() {
                    a[[p, q]] = 0.0;
                } else if a[[p, q]].abs() > threshold {
                    let h = d[q] - d[p];
                    let t = if h.abs() + g == h.abs() {
                        a[[p, q]] / h
                    } else {
                        let theta = 0.5 * h / a[[p, q]];
                        let t = 1.0 / (theta.abs() + (1.0 + theta * theta).sqrt());
                        if theta < 0.0 { -t } else { t }
                    };
                    let c = 1.0 / (1.0 + t * t).sqrt();
                    let s = t * c;
                    let tau = s / (1.0 + c);
                    let h = t * a[[p, q]];

                    z[p] -= h;
                    z[q] += h;
                    d[p] -= h;
                    d[q] += h;
                    a[[p, q]] = 0.0;

                    for j in 0..p {
                        rotate(&mut a, s, tau, (j, p), (j, q));
                    }
                    for j in p + 1..q {
                        rotate(&mut a, s, tau, (p, j), (j, q));
                    }
                    for j in q + 1..n {
                        rotate(&mut a, s, tau, (p, j), (q, j));
                    }
                    for j in 0..n {
                        rotate(&mut v, s, tau, (j, p), (j, q));
                    }
                }
            }
        }

        b += &z;
        d.assign(&b);
        z.fill(0.0);
    }

    if !converged {
        return Err(MinimizerError::LinearAlgebraError(format!(
            "Jacobi eigendecomposition did not converge in {} sweeps",
            MAX_SWEEPS
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&i, &j| d[i].total_cmp(&d[j]));

    let eigenvalues: Array1<f64> = indices.iter().map(|&i| d[i]).collect();
    let eigenvectors = Array2::from_shape_fn((n, n), |(row, col)| v[[row, indices[col]]]);

    Ok((eigenvalues, eigenvectors))
}

fn rotate(m: &mut Array2<f64>, s: f64, tau: f64, ij: (usize, usize), kl: (usize, usize)) {
    let g = m[[ij.0, ij.1]];
    let h = m[[kl.0, kl.1]];
    m[[ij.0, ij.1]] = g - s * (h + g * tau);
    m[[kl.0, kl.1]] = h + s * (g - h * tau);
}

/// Ratio of the largest to the smallest eigenvalue magnitude.
pub fn condition_number(eigenvalues: ArrayView1<f64>) -> f64 {
    let max_eig = eigenvalues.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
    let min_eig = eigenvalues
        .iter()
        .fold(f64::INFINITY, |acc, x| acc.min(x.abs()));
    if min_eig > 0.0 {
        max_eig / min_eig
    } else {
        f64::INFINITY
    }
}
