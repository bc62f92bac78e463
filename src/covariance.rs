use crate::error::{Result, UkfError};

/// Weighted within or cross covariance of sigma points about supplied means.
///
/// `P = Σ wc[i] (a[:, i] - mean_a)(b[:, i] - mean_b)^T + noise`
///
/// With `cross = None` the second set is `a` itself. The means are the
/// unscented means, which in general differ from the arithmetic column mean,
/// so this is not a sample covariance.
pub fn covariance(
    a: &na::DMatrix<f64>,
    mean_a: &na::DVector<f64>,
    wc: &na::DVector<f64>,
    cross: Option<(&na::DMatrix<f64>, &na::DVector<f64>)>,
    noise: Option<&na::DMatrix<f64>>,
) -> Result<na::DMatrix<f64>> {
    let (b, mean_b) = cross.unwrap_or((a, mean_a));
    check_len("sigma point count", wc.len(), a.ncols())?;
    check_len("sigma point count", wc.len(), b.ncols())?;
    check_len("mean length", a.nrows(), mean_a.len())?;
    check_len("mean length", b.nrows(), mean_b.len())?;

    let mut ra = a.clone();
    for mut col in ra.column_iter_mut() {
        col -= mean_a;
    }
    let mut rb = b.clone();
    for (mut col, w) in rb.column_iter_mut().zip(wc.iter()) {
        col -= mean_b;
        col *= *w;
    }
    let mut p = ra * rb.transpose();

    if let Some(noise) = noise {
        if noise.shape() != p.shape() {
            return Err(UkfError::DimensionMismatch {
                what: "additive noise rows",
                expected: p.nrows(),
                actual: noise.nrows(),
            });
        }
        p += noise;
    }
    Ok(p)
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(UkfError::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// `(P + P^T) / 2`
pub fn symmetrize(p: &na::DMatrix<f64>) -> na::DMatrix<f64> {
    (p + p.transpose()) * 0.5
}

/// Inverse of `m`; `what` names the matrix in the error.
pub fn inverse(m: &na::DMatrix<f64>, what: &'static str) -> Result<na::DMatrix<f64>> {
    let inv = m
        .clone()
        .try_inverse()
        .ok_or(UkfError::SingularMatrix(what))?;
    if inv.iter().any(|v| !v.is_finite()) {
        return Err(UkfError::SingularMatrix(what));
    }
    Ok(inv)
}
