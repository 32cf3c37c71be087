//! Small dense symmetric solvers shared by the GLM and dispersion code.
//!
//! Matrices are flat row-major `Vec<f64>`: element (i, j) is `a[i * n + j]`.

use ndarray::Array2;

/// Ridge penalty added to the diagonal of X'WX (1e-6 on the log2 scale)
pub fn ridge_lambda() -> f64 {
    let ln2 = std::f64::consts::LN_2;
    1e-6 / (ln2 * ln2)
}

/// X'WX for a design with one weight per row
pub fn weighted_cross_product(design: &Array2<f64>, weights: &[f64]) -> Vec<f64> {
    let n_coefs = design.ncols();
    let mut xtwx = vec![0.0; n_coefs * n_coefs];
    for (i, &w) in weights.iter().enumerate().take(design.nrows()) {
        for j in 0..n_coefs {
            let xij = design[[i, j]];
            if xij == 0.0 {
                continue;
            }
            for k in 0..n_coefs {
                xtwx[j * n_coefs + k] += w * xij * design[[i, k]];
            }
        }
    }
    xtwx
}

/// Lower Cholesky factor. Non-positive pivots are replaced by 1e-12.
fn cholesky(a: &[f64], n: usize) -> Vec<f64> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= 0.0 {
                    sum = 1e-12;
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    l
}

/// Solve `A x = b` for symmetric positive (semi-)definite `A`
pub fn solve_symmetric_system(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let l = cholesky(a, n);

    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

/// Inverse of a symmetric matrix, solved column by column
pub fn invert_symmetric_matrix(a: &[f64], n: usize) -> Vec<f64> {
    let mut result = vec![0.0; n * n];
    for i in 0..n {
        let mut e = vec![0.0; n];
        e[i] = 1.0;
        let col = solve_symmetric_system(a, &e, n);
        for j in 0..n {
            result[j * n + i] = col[j];
        }
    }
    result
}

/// log|A| from the Cholesky factor
pub fn log_determinant(a: &[f64], n: usize) -> f64 {
    let l = cholesky(a, n);
    (0..n).map(|i| 2.0 * l[i * n + i].ln()).sum()
}

/// Row-major product of two square matrices
pub fn mat_mul(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n * n];
    for i in 0..n {
        for k in 0..n {
            let aik = a[i * n + k];
            for j in 0..n {
                out[i * n + j] += aik * b[k * n + j];
            }
        }
    }
    out
}

/// Quadratic form c' A c
pub fn quadratic_form(a: &[f64], c: &[f64]) -> f64 {
    let n = c.len();
    let mut total = 0.0;
    for i in 0..n {
        if c[i] == 0.0 {
            continue;
        }
        for j in 0..n {
            total += c[i] * a[i * n + j] * c[j];
        }
    }
    total
}
