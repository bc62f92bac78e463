use std::time::{Duration, Instant};

use log::{debug, info};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::{RunParams, UkfParams};
use crate::error::{Result, UkfError};
use crate::model::{step_copy, AgentModel, AgentStatus};
use crate::observe::{MeasurementModel, ObsKind};
use crate::ukf::UnscentedKalmanFilter;

/// Couples the filter to an agent model and its observations.
///
/// Every step forecasts with the filter, advances the true model and, on
/// steps that are multiples of `sample_rate`, assimilates an observation of
/// the true model.
pub struct UkfRun<M, H> {
    base_model: M,
    hx: H,
    params: UkfParams,
    run: RunParams,
    ukf: UnscentedKalmanFilter,
    rng: Xoshiro256PlusPlus,
    noise: Option<Normal<f64>>,
    obs: Vec<na::DVector<f64>>,
    ukf_histories: Vec<na::DVector<f64>>,
    forecasts: Vec<na::DVector<f64>>,
    truths: Vec<na::DVector<f64>>,
    obs_key: Vec<Vec<ObsKind>>,
    statuses: Vec<Vec<AgentStatus>>,
    elapsed: Option<Duration>,
}

impl<M, H> UkfRun<M, H>
where
    M: AgentModel + Clone + Sync,
    H: MeasurementModel,
{
    pub fn new(base_model: M, hx: H, params: UkfParams, run: RunParams) -> Result<Self> {
        let x0 = base_model.state();
        hx.check_state_len(x0.len())?;
        if params.r.nrows() != hx.dim_z() {
            return Err(UkfError::Configuration(format!(
                "R is {}x{} but the measurement function observes {} values",
                params.r.nrows(),
                params.r.ncols(),
                hx.dim_z()
            )));
        }
        let ukf = UnscentedKalmanFilter::new(x0, &params)?;
        let noise = if params.bring_noise {
            Some(Normal::new(0.0, params.noise).map_err(|e| {
                UkfError::Configuration(format!("observation noise {}: {e}", params.noise))
            })?)
        } else {
            None
        };
        Ok(Self {
            base_model,
            hx,
            rng: Xoshiro256PlusPlus::seed_from_u64(run.seed),
            params,
            run,
            ukf,
            noise,
            obs: Vec::new(),
            ukf_histories: Vec::new(),
            forecasts: Vec::new(),
            truths: Vec::new(),
            obs_key: Vec::new(),
            statuses: Vec::new(),
            elapsed: None,
        })
    }

    /// Forecasts with the filter, then advances the true model one step.
    pub fn predict_step(&mut self) -> Result<()> {
        self.ukf.predict(step_copy::<M>, &self.base_model)?;
        self.forecasts.push(self.ukf.state().clone());
        self.base_model.step();
        self.truths.push(self.base_model.state());
        self.statuses.push(self.base_model.statuses());
        Ok(())
    }

    /// Assimilates an observation of the true model if `step` is a multiple
    /// of the sample rate. Returns whether an update happened.
    pub fn update_step(&mut self, step: usize) -> Result<bool> {
        if step % self.params.sample_rate != 0 {
            return Ok(false);
        }
        let mut state = self.base_model.state();
        let statuses = self.base_model.statuses();
        if let Some(noise) = &self.noise {
            for (i, status) in statuses.iter().enumerate() {
                if *status == AgentStatus::Active {
                    state[2 * i] += noise.sample(&mut self.rng);
                    state[2 * i + 1] += noise.sample(&mut self.rng);
                }
            }
        }
        let z = self.hx.measure(&state);
        self.ukf.update(&z, &self.hx)?;
        debug!("step {step}: assimilated {} observations", z.len());

        self.obs_key.push(self.hx.obs_key(&statuses));
        self.ukf_histories.push(self.ukf.state().clone());
        self.obs.push(z);
        Ok(true)
    }

    /// Runs until every agent has finished or the step limit is reached.
    /// Returns the number of steps taken.
    pub fn run(&mut self) -> Result<usize> {
        let start = Instant::now();
        info!(
            "ukf run: {} agents, {} states, {} observed, sample rate {}",
            self.base_model.pop_total(),
            self.ukf.state().len(),
            self.hx.dim_z(),
            self.params.sample_rate
        );
        let mut steps = 0;
        for step in 0..self.run.step_limit.saturating_sub(1) {
            self.predict_step()?;
            self.update_step(step)?;
            steps += 1;
            if self.base_model.pop_finished() == self.base_model.pop_total() {
                break;
            }
        }
        let elapsed = start.elapsed();
        self.elapsed = Some(elapsed);
        info!("ukf run finished after {steps} steps in {elapsed:.2?}");
        Ok(steps)
    }

    pub fn filter(&self) -> &UnscentedKalmanFilter {
        &self.ukf
    }

    pub fn base_model(&self) -> &M {
        &self.base_model
    }

    pub fn measurement(&self) -> &H {
        &self.hx
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// Collects the run histories into matrices with one row per step.
    pub fn record(&self) -> RunRecord {
        let truths = stack_rows(&self.truths);
        let (rows, cols) = truths.shape();
        let rate = self.params.sample_rate;

        let mut preds = na::DMatrix::from_element(rows, cols, f64::NAN);
        let pop = self.statuses.first().map_or(0, |s| s.len());
        let mut obs_key = na::DMatrix::from_element(rows, pop, f64::NAN);
        for (j, (x, key)) in self.ukf_histories.iter().zip(&self.obs_key).enumerate() {
            let row = j * rate;
            if row >= rows {
                break;
            }
            preds.row_mut(row).copy_from(&x.transpose());
            for (a, kind) in key.iter().enumerate() {
                obs_key[(row, a)] = *kind as u8 as f64;
            }
        }

        let mut active = na::DMatrix::from_element(rows, cols, f64::NAN);
        for (t, statuses) in self.statuses.iter().enumerate() {
            for (i, status) in statuses.iter().enumerate() {
                if *status == AgentStatus::Active {
                    active[(t, 2 * i)] = 1.0;
                    active[(t, 2 * i + 1)] = 1.0;
                }
            }
        }

        RunRecord {
            obs: stack_rows(&self.obs),
            preds,
            forecasts: stack_rows(&self.forecasts),
            truths,
            active,
            obs_key,
        }
    }
}

/// Histories of a finished run, one row per simulation step unless noted.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    /// Observations, one row per assimilation.
    pub obs: na::DMatrix<f64>,
    /// Assimilated estimates on assimilation steps, NaN in between.
    pub preds: na::DMatrix<f64>,
    /// Filter forecasts.
    pub forecasts: na::DMatrix<f64>,
    /// True agent positions.
    pub truths: na::DMatrix<f64>,
    /// 1 for coordinates of active agents, NaN otherwise.
    pub active: na::DMatrix<f64>,
    /// Observation type per agent on assimilation steps, NaN in between.
    pub obs_key: na::DMatrix<f64>,
}

impl RunRecord {
    /// Mean Euclidean distance between estimate and truth over the active
    /// agents of each row of `estimates`. NaN where nothing can be compared.
    pub fn agent_errors(&self, estimates: &na::DMatrix<f64>) -> Vec<f64> {
        let pop = self.truths.ncols() / 2;
        (0..estimates.nrows().min(self.truths.nrows()))
            .map(|t| {
                let (sum, count) = (0..pop)
                    .filter(|&i| self.active[(t, 2 * i)] == 1.0)
                    .map(|i| {
                        let dx = estimates[(t, 2 * i)] - self.truths[(t, 2 * i)];
                        let dy = estimates[(t, 2 * i + 1)] - self.truths[(t, 2 * i + 1)];
                        dx.hypot(dy)
                    })
                    .filter(|d| d.is_finite())
                    .fold((0.0, 0usize), |(s, c), d| (s + d, c + 1));
                if count == 0 {
                    f64::NAN
                } else {
                    sum / count as f64
                }
            })
            .collect()
    }

    /// Median of the finite per-step assimilation errors.
    pub fn median_error(&self) -> Option<f64> {
        let mut errors: Vec<f64> = self
            .agent_errors(&self.preds)
            .into_iter()
            .filter(|e| e.is_finite())
            .collect();
        if errors.is_empty() {
            return None;
        }
        errors.sort_by(f64::total_cmp);
        Some(errors[errors.len() / 2])
    }
}

fn stack_rows(rows: &[na::DVector<f64>]) -> na::DMatrix<f64> {
    let cols = rows.first().map_or(0, |r| r.len());
    na::DMatrix::from_fn(rows.len(), cols, |i, j| rows[i][j])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corridor::{Corridor, CorridorParams};
    use crate::observe::{Identity, ObservedSubset};

    fn corridor(pop_total: usize) -> Corridor {
        Corridor::new(&CorridorParams {
            pop_total,
            width: 20.0,
            height: 10.0,
            speed: (1.0, 1.5),
            entry_window: 3,
            gates_out: 1,
            seed: 3,
        })
    }

    #[test]
    fn test_r_must_match_measurement() {
        let params = UkfParams::identity(4, 4);
        let hx = ObservedSubset::new(vec![0]);
        let err = UkfRun::new(corridor(2), hx, params, RunParams::default())
            .err()
            .unwrap();
        assert!(matches!(err, UkfError::Configuration(_)));
    }

    #[test]
    fn test_observed_agent_outside_population() {
        let params = UkfParams::identity(4, 2);
        let hx = ObservedSubset::new(vec![5]);
        let err = UkfRun::new(corridor(2), hx, params, RunParams::default())
            .err()
            .unwrap();
        assert!(matches!(err, UkfError::Configuration(_)));

        let params = UkfParams::identity(4, 6);
        let err = UkfRun::new(corridor(2), Identity::new(6), params, RunParams::default())
            .err()
            .unwrap();
        assert!(matches!(err, UkfError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_sample_rate_controls_updates() {
        let params = UkfParams::identity(4, 4).with_sample_rate(3);
        let run = RunParams {
            step_limit: 10,
            seed: 0,
        };
        let mut ukf_run = UkfRun::new(corridor(2), Identity::new(4), params, run).unwrap();
        let mut updates = Vec::new();
        for step in 0..7 {
            ukf_run.predict_step().unwrap();
            updates.push(ukf_run.update_step(step).unwrap());
        }
        assert_eq!(updates, vec![true, false, false, true, false, false, true]);
        assert_eq!(ukf_run.filter().xs().len(), 3);

        let record = ukf_run.record();
        assert_eq!(record.truths.nrows(), 7);
        assert_eq!(record.obs.nrows(), 3);
        for row in 0..7 {
            let filled = record.preds[(row, 0)].is_finite();
            assert_eq!(filled, row % 3 == 0, "row {row}");
        }
    }

    #[test]
    fn test_noise_only_touches_active_agents() {
        let params = UkfParams::identity(4, 4).with_noise(5.0);
        let mut ukf_run =
            UkfRun::new(corridor(2), Identity::new(4), params, RunParams::default()).unwrap();
        // nobody has entered before the first step, so the observation is exact
        let exact = ukf_run.base_model().state();
        ukf_run.ukf.predict(step_copy::<Corridor>, &ukf_run.base_model).unwrap();
        ukf_run.update_step(0).unwrap();
        assert_eq!(ukf_run.obs[0], exact);
        assert!(ukf_run
            .obs_key[0]
            .iter()
            .all(|k| *k == ObsKind::Unobserved));
    }

    #[test]
    fn test_run_stops_when_everyone_finished() {
        let params = UkfParams::identity(4, 4);
        let run = RunParams {
            step_limit: 500,
            seed: 0,
        };
        let mut ukf_run = UkfRun::new(corridor(2), Identity::new(4), params, run).unwrap();
        let steps = ukf_run.run().unwrap();
        assert!(steps < 499);
        assert_eq!(ukf_run.base_model().pop_finished(), 2);
        assert!(ukf_run.elapsed().is_some());
        let record = ukf_run.record();
        assert_eq!(record.truths.nrows(), steps);
        assert!(record.median_error().unwrap() < 1.0);
    }

    #[test]
    fn test_agent_errors() {
        let record = RunRecord {
            obs: na::DMatrix::zeros(0, 0),
            preds: na::dmatrix![3.0, 4.0, 100.0, 100.0; f64::NAN, f64::NAN, 0.0, 0.0],
            forecasts: na::DMatrix::zeros(0, 0),
            truths: na::DMatrix::zeros(2, 4),
            active: na::dmatrix![1.0, 1.0, f64::NAN, f64::NAN; 1.0, 1.0, 1.0, 1.0],
            obs_key: na::DMatrix::zeros(0, 0),
        };
        let errors = record.agent_errors(&record.preds);
        assert_eq!(errors[0], 5.0);
        assert_eq!(errors[1], 0.0);
        assert_eq!(record.median_error(), Some(5.0));
    }
}
