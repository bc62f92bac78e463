use crate::adaptive::FaultDetector;
use crate::error::{Result, UkfError};

/// Noise adaptation policy of the filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NoiseAdaptation {
    /// Q and R stay as configured.
    #[default]
    None,
    /// Q and R are re-estimated whenever the chi-squared test rejects.
    ChiSquared(FaultDetector),
}

/// Filter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct UkfParams {
    pub a: f64,
    /// Prior distribution knowledge β, 2 for Gaussians.
    pub b: f64,
    pub k: f64,
    pub sample_rate: usize,
    /// Add synthetic Gaussian noise to observations of active agents.
    pub bring_noise: bool,
    pub noise: f64,
    pub p: na::DMatrix<f64>,
    pub q: na::DMatrix<f64>,
    pub r: na::DMatrix<f64>,
    pub adaptation: NoiseAdaptation,
}

impl UkfParams {
    const SYMMETRY_TOL: f64 = 1e-9;

    /// Defaults `a = 1, b = 2, k = 0`, assimilation every step, no noise.
    pub fn new(p: na::DMatrix<f64>, q: na::DMatrix<f64>, r: na::DMatrix<f64>) -> Self {
        Self {
            a: 1.0,
            b: 2.0,
            k: 0.0,
            sample_rate: 1,
            bring_noise: false,
            noise: 0.0,
            p,
            q,
            r,
            adaptation: NoiseAdaptation::None,
        }
    }

    /// Identity `P`, `Q` and `R` for `n` states and `m` observations.
    pub fn identity(n: usize, m: usize) -> Self {
        Self::new(
            na::DMatrix::identity(n, n),
            na::DMatrix::identity(n, n),
            na::DMatrix::identity(m, m),
        )
    }

    pub fn with_tuning(mut self, a: f64, b: f64, k: f64) -> Self {
        self.a = a;
        self.b = b;
        self.k = k;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: usize) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Enables synthetic observation noise with standard deviation `noise`.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.bring_noise = true;
        self.noise = noise;
        self
    }

    pub fn with_adaptation(mut self, adaptation: NoiseAdaptation) -> Self {
        self.adaptation = adaptation;
        self
    }

    /// Checks the configuration against a state of length `n`.
    pub fn validate(&self, n: usize) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(UkfError::Configuration("sample_rate must be at least 1".into()));
        }
        if self.bring_noise && !(self.noise.is_finite() && self.noise >= 0.0) {
            return Err(UkfError::Configuration(format!(
                "observation noise {} must be a finite non-negative standard deviation",
                self.noise
            )));
        }
        check_noise_matrix("P", &self.p, Some(n))?;
        check_noise_matrix("Q", &self.q, Some(n))?;
        check_noise_matrix("R", &self.r, None)?;
        check_psd("Q", &self.q)?;
        check_psd("R", &self.r)?;
        if let NoiseAdaptation::ChiSquared(detector) = &self.adaptation {
            detector.validate()?;
        }
        Ok(())
    }
}

fn check_noise_matrix(name: &str, m: &na::DMatrix<f64>, dim: Option<usize>) -> Result<()> {
    if !m.is_square() {
        return Err(UkfError::Configuration(format!(
            "{name} must be square, got {}x{}",
            m.nrows(),
            m.ncols()
        )));
    }
    if let Some(n) = dim {
        if m.nrows() != n {
            return Err(UkfError::Configuration(format!(
                "{name} must be {n}x{n}, got {}x{}",
                m.nrows(),
                m.ncols()
            )));
        }
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(UkfError::Configuration(format!("{name} has non-finite entries")));
    }
    let scale = m.amax().max(1.0);
    if (m - m.transpose()).amax() > UkfParams::SYMMETRY_TOL * scale {
        return Err(UkfError::Configuration(format!("{name} is not symmetric")));
    }
    Ok(())
}

fn check_psd(name: &str, m: &na::DMatrix<f64>) -> Result<()> {
    if m.is_empty() {
        return Ok(());
    }
    let scale = m.amax().max(1.0);
    let min = m.clone().symmetric_eigen().eigenvalues.min();
    if min < -UkfParams::SYMMETRY_TOL * scale {
        return Err(UkfError::Configuration(format!(
            "{name} is not positive semi-definite (eigenvalue {min})"
        )));
    }
    Ok(())
}

/// Run driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    /// Maximum number of simulation steps.
    pub step_limit: usize,
    /// Seed of the observation noise generator.
    pub seed: u64,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            step_limit: 3600,
            seed: 0,
        }
    }
}
