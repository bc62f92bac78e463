use crate::error::{Result, UkfError};

/// Merwe scaled sigma-point weights.
///
/// `lambda = α^2 (n + κ) - n` and `gamma = sqrt(n + λ)`; both are fixed for
/// the lifetime of a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SigmaWeights {
    pub wm: na::DVector<f64>,
    pub wc: na::DVector<f64>,
    pub lambda: f64,
    pub gamma: f64,
}

impl SigmaWeights {
    pub fn new(n: usize, alpha: f64, beta: f64, kappa: f64) -> Result<Self> {
        if n == 0 {
            return Err(UkfError::Configuration("state dimension is zero".into()));
        }
        if !(alpha.is_finite() && beta.is_finite() && kappa.is_finite()) {
            return Err(UkfError::Configuration(format!(
                "non-finite tuning scalars a={alpha}, b={beta}, k={kappa}"
            )));
        }
        let n_f = n as f64;
        let lambda = alpha * alpha * (n_f + kappa) - n_f;
        // C := N + LAMBDA
        let c = n_f + lambda;
        if c <= 0.0 || !c.is_finite() {
            return Err(UkfError::Configuration(format!(
                "n + lambda = {c} must be positive (a={alpha}, k={kappa}, n={n})"
            )));
        }

        let m = 2 * n + 1;
        let mut wm = na::DVector::from_element(m, 1.0 / (2.0 * c));
        let mut wc = na::DVector::from_element(m, 1.0 / (2.0 * c));
        wm[0] = lambda / c;
        wc[0] = lambda / c + 1.0 - alpha.powi(2) + beta;

        Ok(Self {
            wm,
            wc,
            lambda,
            gamma: c.sqrt(),
        })
    }

    /// Number of sigma points, `2n + 1`.
    pub fn len(&self) -> usize {
        self.wm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wm.is_empty()
    }
}

/// Sigma points around `mean` for covariance `p`, one point per column.
///
/// Column 0 is the mean, columns `1..=n` are `mean + gamma * S[:, i]` and
/// columns `n+1..=2n` are `mean - gamma * S[:, i]` where `S` is the lower
/// Cholesky factor of `p`.
pub fn sigma_points(
    mean: &na::DVector<f64>,
    p: &na::DMatrix<f64>,
    gamma: f64,
) -> Result<na::DMatrix<f64>> {
    let n = mean.len();
    if p.nrows() != n || p.ncols() != n {
        return Err(UkfError::DimensionMismatch {
            what: "covariance rows",
            expected: n,
            actual: p.nrows().max(p.ncols()),
        });
    }
    let l = p
        .clone()
        .cholesky()
        .ok_or(UkfError::Numerical("state covariance"))?
        .unpack();

    let mut sigmas = na::DMatrix::<f64>::zeros(n, 2 * n + 1);
    sigmas.set_column(0, mean);
    for i in 0..n {
        let offset = l.column(i) * gamma;
        sigmas.set_column(1 + i, &(mean + &offset));
        sigmas.set_column(1 + n + i, &(mean - &offset));
    }
    Ok(sigmas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use na::{dmatrix, dvector};

    #[test]
    fn test_weights_sum_to_one() {
        for &(n, a, k) in &[(2, 1.0, 0.0), (4, 0.5, 1.0), (6, 1e-3, 0.0), (10, 1.0, 3.0)] {
            let w = SigmaWeights::new(n, a, 2.0, k).unwrap();
            assert_eq!(w.len(), 2 * n + 1);
            assert_relative_eq!(w.wm.sum(), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_weights_values() {
        // n=2, a=1, k=0 -> lambda=0, gamma=sqrt(2)
        let w = SigmaWeights::new(2, 1.0, 2.0, 0.0).unwrap();
        assert_relative_eq!(w.lambda, 0.0);
        assert_relative_eq!(w.gamma, 2f64.sqrt());
        assert_relative_eq!(w.wm[0], 0.0);
        assert_relative_eq!(w.wc[0], 2.0);
        for i in 1..5 {
            assert_relative_eq!(w.wm[i], 0.25);
            assert_relative_eq!(w.wc[i], 0.25);
        }
    }

    #[test]
    fn test_non_positive_spread_rejected() {
        // k = -n makes n + lambda = 0
        let err = SigmaWeights::new(2, 1.0, 2.0, -2.0).unwrap_err();
        assert!(matches!(err, UkfError::Configuration(_)));
        let err = SigmaWeights::new(2, 0.0, 2.0, 0.0).unwrap_err();
        assert!(matches!(err, UkfError::Configuration(_)));
        let err = SigmaWeights::new(2, f64::NAN, 2.0, 0.0).unwrap_err();
        assert!(matches!(err, UkfError::Configuration(_)));
    }

    #[test]
    fn test_sigma_layout() {
        let mean = dvector![1.0, -1.0];
        let p = dmatrix![4.0, 0.0; 0.0, 9.0];
        let s = sigma_points(&mean, &p, 1.0).unwrap();
        assert_eq!(s.ncols(), 5);
        assert_eq!(s.column(0).into_owned(), mean);
        assert_relative_eq!(s.column(1).into_owned(), dvector![3.0, -1.0]);
        assert_relative_eq!(s.column(2).into_owned(), dvector![1.0, 2.0]);
        assert_relative_eq!(s.column(3).into_owned(), dvector![-1.0, -1.0]);
        assert_relative_eq!(s.column(4).into_owned(), dvector![1.0, -4.0]);
    }

    #[test]
    fn test_weighted_mean_recovers_mean() {
        let mean = dvector![0.3, -2.0, 5.0, 1.5];
        let a = dmatrix![
            2.0, 0.3, 0.0, 0.1;
            0.0, 1.0, 0.2, 0.0;
            0.5, 0.0, 3.0, 0.4;
            0.0, 0.1, 0.0, 0.7;
        ];
        let p = &a * a.transpose() + na::DMatrix::identity(4, 4);
        for &(alpha, kappa) in &[(1.0, 0.0), (0.5, 1.0), (1e-3, 0.0)] {
            let w = SigmaWeights::new(4, alpha, 2.0, kappa).unwrap();
            let s = sigma_points(&mean, &p, w.gamma).unwrap();
            let recovered = &s * &w.wm;
            assert_relative_eq!(recovered, mean, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_not_positive_definite() {
        let mean = dvector![0.0, 0.0];
        let p = dmatrix![1.0, 2.0; 2.0, 1.0];
        let err = sigma_points(&mean, &p, 1.0).unwrap_err();
        assert_eq!(err, UkfError::Numerical("state covariance"));
    }
}
