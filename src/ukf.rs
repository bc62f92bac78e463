use log::debug;

use crate::adaptive::{Cycle, FaultOutcome};
use crate::config::{NoiseAdaptation, UkfParams};
use crate::covariance::{covariance, inverse, symmetrize};
use crate::error::{Result, UkfError};
use crate::observe::MeasurementModel;
use crate::sigma::{sigma_points, SigmaWeights};
use crate::transform::unscented_mean;

/// Unscented Kalman Filter with an optional adaptive noise stage.
///
/// Each cycle is one `predict` followed by at most one `update`. The forecast
/// sigma points of `predict` are kept for the matching `update` and dropped
/// afterwards; a second `update` fails with [`UkfError::MissingForecast`].
#[derive(Debug, Clone)]
pub struct UnscentedKalmanFilter {
    x: na::DVector<f64>,
    p: na::DMatrix<f64>,
    q: na::DMatrix<f64>,
    r: na::DMatrix<f64>,
    alpha: f64,
    beta: f64,
    weights: SigmaWeights,
    adaptation: NoiseAdaptation,
    sigma_f: Option<na::DMatrix<f64>>,
    gain: Option<na::DMatrix<f64>>,
    xs: Vec<na::DVector<f64>>,
    ps: Vec<na::DMatrix<f64>>,
}

impl UnscentedKalmanFilter {
    pub fn new(x: na::DVector<f64>, params: &UkfParams) -> Result<Self> {
        let n = x.len();
        params.validate(n)?;
        let weights = SigmaWeights::new(n, params.a, params.b, params.k)?;
        Ok(Self {
            x,
            p: params.p.clone(),
            q: params.q.clone(),
            r: params.r.clone(),
            alpha: params.a,
            beta: params.b,
            weights,
            adaptation: params.adaptation.clone(),
            sigma_f: None,
            gain: None,
            xs: Vec::new(),
            ps: Vec::new(),
        })
    }

    /// Forecasts the state one step ahead through `fx`.
    ///
    /// `ctx` is the process context handed to every `fx` call; it is only
    /// borrowed for the duration of this call.
    pub fn predict<C, F>(&mut self, fx: F, ctx: &C) -> Result<()>
    where
        C: Sync + ?Sized,
        F: Fn(&na::DVector<f64>, &C) -> na::DVector<f64> + Sync,
    {
        let n = self.x.len();
        let sigmas = sigma_points(&self.x, &self.p, self.weights.gamma)?;
        let (sigma_f, xhat) = unscented_mean(&sigmas, &self.weights.wm, |s| fx(s, ctx))?;
        if sigma_f.nrows() != n {
            return Err(UkfError::DimensionMismatch {
                what: "forecast state",
                expected: n,
                actual: sigma_f.nrows(),
            });
        }
        let pxx = covariance(&sigma_f, &xhat, &self.weights.wc, None, Some(&self.q))?;

        self.x = xhat;
        self.p = pxx;
        self.sigma_f = Some(sigma_f);
        Ok(())
    }

    /// Assimilates the observation `z` using the forecast sigma points of the
    /// last `predict`.
    pub fn update<H>(&mut self, z: &na::DVector<f64>, hx: &H) -> Result<()>
    where
        H: MeasurementModel + ?Sized,
    {
        let m = hx.dim_z();
        if z.len() != m {
            return Err(UkfError::DimensionMismatch {
                what: "observation",
                expected: m,
                actual: z.len(),
            });
        }
        if self.r.nrows() != m {
            return Err(UkfError::DimensionMismatch {
                what: "measurement noise rows",
                expected: m,
                actual: self.r.nrows(),
            });
        }
        hx.check_state_len(self.x.len())?;
        let sigma_f = self.sigma_f.take().ok_or(UkfError::MissingForecast)?;

        let mapped = unscented_mean(&sigma_f, &self.weights.wm, |s| hx.measure(s));
        let (sigmas_h, yhat) = match mapped {
            Ok((sigmas_h, yhat)) if sigmas_h.nrows() == m => (sigmas_h, yhat),
            Ok((sigmas_h, _)) => {
                let actual = sigmas_h.nrows();
                // 観測の形が合わないときは予測を残す
                self.sigma_f = Some(sigma_f);
                return Err(UkfError::DimensionMismatch {
                    what: "measurement output",
                    expected: m,
                    actual,
                });
            }
            Err(e) => {
                self.sigma_f = Some(sigma_f);
                return Err(e);
            }
        };
        let wc = &self.weights.wc;
        let pyy = covariance(&sigmas_h, &yhat, wc, None, Some(&self.r))?;
        let pxy = covariance(&sigma_f, &self.x, wc, Some((&sigmas_h, &yhat)), None)?;
        let mut k = &pxy * inverse(&pyy, "Pyy")?;

        let innovation = z - &yhat;
        debug!("update: |z - yhat| = {:.4}", innovation.norm());
        let mut x = &self.x + &k * &innovation;
        // 対称性の維持
        let mut p = symmetrize(&(&self.p - &k * &pyy * k.transpose()));

        if let NoiseAdaptation::ChiSquared(detector) = &self.adaptation {
            let central = sigmas_h.column(0).into_owned();
            let cycle = Cycle {
                z,
                central: &central,
                yhat: &yhat,
                pxy: &pxy,
                pyy: &pyy,
                gain: &k,
                x_prior: &self.x,
                p_prior: &self.p,
                x_post: &x,
                p_post: &p,
            };
            let outcome = detector.assess(
                &cycle,
                &mut self.q,
                &mut self.r,
                hx,
                &self.weights,
                self.alpha,
                self.beta,
            )?;
            if let FaultOutcome::Adapted {
                gain,
                x: x_adapted,
                p: p_adapted,
                ..
            } = outcome
            {
                k = gain;
                x = x_adapted;
                p = p_adapted;
            }
        }

        self.x = x;
        self.p = p;
        self.gain = Some(k);
        self.xs.push(self.x.clone());
        self.ps.push(self.p.clone());
        Ok(())
    }

    // 推定した状態を返す
    pub fn state(&self) -> &na::DVector<f64> {
        &self.x
    }

    pub fn covariance(&self) -> &na::DMatrix<f64> {
        &self.p
    }

    pub fn q(&self) -> &na::DMatrix<f64> {
        &self.q
    }

    pub fn r(&self) -> &na::DMatrix<f64> {
        &self.r
    }

    pub fn set_q(&mut self, q: na::DMatrix<f64>) {
        self.q = q;
    }

    pub fn set_r(&mut self, r: na::DMatrix<f64>) {
        self.r = r;
    }

    /// Kalman gain of the last update.
    pub fn gain(&self) -> Option<&na::DMatrix<f64>> {
        self.gain.as_ref()
    }

    pub fn weights(&self) -> &SigmaWeights {
        &self.weights
    }

    pub fn has_forecast(&self) -> bool {
        self.sigma_f.is_some()
    }

    pub fn xs(&self) -> &[na::DVector<f64>] {
        &self.xs
    }

    pub fn ps(&self) -> &[na::DMatrix<f64>] {
        &self.ps
    }
}
