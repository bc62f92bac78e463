use log::{debug, warn};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::covariance::{covariance, inverse, symmetrize};
use crate::error::{Result, UkfError};
use crate::observe::MeasurementModel;
use crate::sigma::{sigma_points, SigmaWeights};

/// Chi-squared consistency test on the innovation with covariance matching
/// re-estimation of Q and R when the test rejects.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultDetector {
    /// Confidence level of the chi-squared test.
    pub confidence: f64,
    /// Floor of the process noise fading factor.
    pub phi0: f64,
    /// Floor of the measurement noise fading factor.
    pub delta0: f64,
}

impl Default for FaultDetector {
    fn default() -> Self {
        Self {
            confidence: Self::CONFIDENCE,
            phi0: Self::PHI0,
            delta0: Self::DELTA0,
        }
    }
}

/// Everything one assimilation cycle knows when the fault test runs.
pub struct Cycle<'a> {
    pub z: &'a na::DVector<f64>,
    /// Measurement of the central forecast sigma point.
    pub central: &'a na::DVector<f64>,
    pub yhat: &'a na::DVector<f64>,
    pub pxy: &'a na::DMatrix<f64>,
    /// Innovation covariance, R included.
    pub pyy: &'a na::DMatrix<f64>,
    pub gain: &'a na::DMatrix<f64>,
    pub x_prior: &'a na::DVector<f64>,
    pub p_prior: &'a na::DMatrix<f64>,
    pub x_post: &'a na::DVector<f64>,
    pub p_post: &'a na::DMatrix<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FaultOutcome {
    /// The innovation at the central sigma point is exactly zero.
    Skipped,
    Accepted {
        psi: f64,
        critical: f64,
    },
    /// Q and R were re-estimated and the posterior recomputed with them.
    Adapted {
        psi: f64,
        critical: f64,
        gain: na::DMatrix<f64>,
        x: na::DVector<f64>,
        p: na::DMatrix<f64>,
    },
}

impl FaultDetector {
    pub const CONFIDENCE: f64 = 0.8;
    pub const PHI0: f64 = 0.2;
    pub const DELTA0: f64 = 0.2;

    pub fn new(confidence: f64, phi0: f64, delta0: f64) -> Result<Self> {
        let detector = Self {
            confidence,
            phi0,
            delta0,
        };
        detector.validate()?;
        Ok(detector)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(UkfError::Configuration(format!(
                "fault test confidence {} outside (0, 1)",
                self.confidence
            )));
        }
        for (name, floor) in [("phi0", self.phi0), ("delta0", self.delta0)] {
            if !(0.0..=1.0).contains(&floor) {
                return Err(UkfError::Configuration(format!(
                    "{name} = {floor} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }

    /// Critical value of the chi-squared distribution with `df` degrees of
    /// freedom at the configured confidence.
    pub fn critical(&self, df: usize) -> Result<f64> {
        let chi = ChiSquared::new(df as f64)
            .map_err(|e| UkfError::Configuration(format!("chi-squared df {df}: {e}")))?;
        Ok(chi.inverse_cdf(self.confidence))
    }

    /// `max(floor, 1 - scale * critical / psi)`, clamped to `[0, 1]`.
    pub fn fading_factor(floor: f64, scale: f64, critical: f64, psi: f64) -> f64 {
        (1.0 - scale * critical / psi).max(floor).clamp(0.0, 1.0)
    }

    /// Runs the fault test for one cycle, rewriting `q` and `r` in place when
    /// the innovation is inconsistent with the assumed noise.
    ///
    /// `alpha` and `beta` are the sigma-point tuning scalars; they scale the
    /// measurement and process fading factors respectively.
    #[allow(clippy::too_many_arguments)]
    pub fn assess<H>(
        &self,
        cycle: &Cycle<'_>,
        q: &mut na::DMatrix<f64>,
        r: &mut na::DMatrix<f64>,
        hx: &H,
        weights: &SigmaWeights,
        alpha: f64,
        beta: f64,
    ) -> Result<FaultOutcome>
    where
        H: MeasurementModel + ?Sized,
    {
        let mu = cycle.z - cycle.central;
        if mu.iter().all(|v| *v == 0.0) {
            return Ok(FaultOutcome::Skipped);
        }

        let sigma = inverse(&(cycle.pyy + &*r), "Pyy + R")?;
        let psi = mu.dot(&(&sigma * &mu));
        let critical = self.critical(mu.len())?;
        debug!("fault test: psi={psi:.4} critical={critical:.4}");
        if psi <= critical {
            return Ok(FaultOutcome::Accepted { psi, critical });
        }

        let eps = cycle.z - hx.measure(cycle.x_post);
        let sigmas = sigma_points(cycle.x_post, cycle.p_post, weights.gamma)?;
        let syy = covariance(&hx.measure_batch(&sigmas), cycle.yhat, &weights.wc, None, None)?;

        let delta = Self::fading_factor(self.delta0, alpha, critical, psi);
        let phi = Self::fading_factor(self.phi0, beta, critical, psi);

        let k_mu = cycle.gain * &mu;
        *q = symmetrize(&((1.0 - phi) * &*q + phi * &k_mu * k_mu.transpose()));
        *r = symmetrize(&((1.0 - delta) * &*r + delta * (&eps * eps.transpose() + &syy)));
        warn!("innovation rejected (psi={psi:.4} > {critical:.4}), noise re-estimated with phi={phi:.3} delta={delta:.3}");

        // 新しいノイズで推定をやり直す
        let pyy = syy + &*r;
        let gain = cycle.pxy * inverse(&pyy, "Pyy")?;
        let x = cycle.x_prior + &gain * (cycle.z - cycle.yhat);
        let p = symmetrize(&(cycle.p_prior - &gain * &pyy * gain.transpose()));

        Ok(FaultOutcome::Adapted {
            psi,
            critical,
            gain,
            x,
            p,
        })
    }
}
