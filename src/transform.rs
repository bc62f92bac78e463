use rayon::prelude::*;

use crate::error::{Result, UkfError};

/// Unscented transform of a set of sigma points.
///
/// `f` is applied to every column in parallel; the results are put back in
/// the original column order so weight `i` still belongs to column `i`.
/// Returns the transformed sigma points and their `wm`-weighted mean.
pub fn unscented_mean<F>(
    sigmas: &na::DMatrix<f64>,
    wm: &na::DVector<f64>,
    f: F,
) -> Result<(na::DMatrix<f64>, na::DVector<f64>)>
where
    F: Fn(&na::DVector<f64>) -> na::DVector<f64> + Sync,
{
    if sigmas.ncols() != wm.len() {
        return Err(UkfError::DimensionMismatch {
            what: "sigma point count",
            expected: wm.len(),
            actual: sigmas.ncols(),
        });
    }

    // 並列処理で各シグマ点を写像する
    let columns: Vec<na::DVector<f64>> = (0..sigmas.ncols())
        .into_par_iter()
        .map(|i| f(&sigmas.column(i).into_owned()))
        .collect();

    let dim = columns.first().map_or(0, |c| c.len());
    if let Some(bad) = columns.iter().find(|c| c.len() != dim) {
        return Err(UkfError::DimensionMismatch {
            what: "transformed sigma point",
            expected: dim,
            actual: bad.len(),
        });
    }

    let nl_sigmas = na::DMatrix::from_columns(&columns);
    let mean = &nl_sigmas * wm;
    Ok((nl_sigmas, mean))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use na::{dmatrix, dvector};

    #[test]
    fn test_identity_keeps_points() {
        let sigmas = dmatrix![
            0.0, 1.0, 0.0, -1.0, 0.0;
            0.0, 0.0, 1.0, 0.0, -1.0;
        ];
        let wm = dvector![0.2, 0.2, 0.2, 0.2, 0.2];
        let (nl, mean) = unscented_mean(&sigmas, &wm, |x| x.clone()).unwrap();
        assert_eq!(nl, sigmas);
        assert_relative_eq!(mean, dvector![0.0, 0.0]);
    }

    #[test]
    fn test_column_order_preserved() {
        let sigmas = na::DMatrix::from_fn(1, 41, |_, j| j as f64);
        let wm = na::DVector::from_element(41, 1.0 / 41.0);
        let (nl, mean) = unscented_mean(&sigmas, &wm, |x| dvector![x[0] * 2.0, -x[0]]).unwrap();
        assert_eq!(nl.nrows(), 2);
        for j in 0..41 {
            assert_eq!(nl[(0, j)], 2.0 * j as f64);
            assert_eq!(nl[(1, j)], -(j as f64));
        }
        assert_relative_eq!(mean, dvector![40.0, -20.0], epsilon = 1e-12);
    }

    #[test]
    fn test_non_square_projection() {
        let sigmas = dmatrix![
            1.0, 2.0, 3.0;
            4.0, 5.0, 6.0;
        ];
        let wm = dvector![0.5, 0.25, 0.25];
        let (nl, mean) = unscented_mean(&sigmas, &wm, |x| dvector![x[1]]).unwrap();
        assert_eq!(nl, dmatrix![4.0, 5.0, 6.0]);
        assert_relative_eq!(mean[0], 4.75);
    }

    #[test]
    fn test_ragged_output_rejected() {
        let sigmas = dmatrix![0.0, 1.0, -1.0];
        let wm = dvector![0.0, 0.5, 0.5];
        let err = unscented_mean(&sigmas, &wm, |x| {
            if x[0] > 0.0 {
                dvector![1.0, 2.0]
            } else {
                dvector![1.0]
            }
        })
        .unwrap_err();
        assert!(matches!(err, UkfError::DimensionMismatch { .. }));
    }
}
