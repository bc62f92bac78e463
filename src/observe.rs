use rand::Rng;

use crate::error::{Result, UkfError};
use crate::model::AgentStatus;

/// How an agent is seen by the sensors at one assimilation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObsKind {
    Unobserved = 0,
    Gps = 2,
}

/// Measurement function `hx`, projecting the full state onto observed space.
pub trait MeasurementModel: Sync {
    /// Length of the observation vector.
    fn dim_z(&self) -> usize;

    fn measure(&self, state: &na::DVector<f64>) -> na::DVector<f64>;

    /// Fails if `measure` cannot be applied to a state of length `n`.
    fn check_state_len(&self, _n: usize) -> Result<()> {
        Ok(())
    }

    /// Applies `measure` to every column of `states`.
    fn measure_batch(&self, states: &na::DMatrix<f64>) -> na::DMatrix<f64> {
        let columns: Vec<na::DVector<f64>> = states
            .column_iter()
            .map(|c| self.measure(&c.into_owned()))
            .collect();
        na::DMatrix::from_columns(&columns)
    }

    /// Observation type of each agent. Agents that are not active are never
    /// observed.
    fn obs_key(&self, statuses: &[AgentStatus]) -> Vec<ObsKind> {
        statuses
            .iter()
            .map(|s| match s {
                AgentStatus::Active => ObsKind::Gps,
                _ => ObsKind::Unobserved,
            })
            .collect()
    }
}

/// Every coordinate is observed directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub dim: usize,
}

impl Identity {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl MeasurementModel for Identity {
    fn dim_z(&self) -> usize {
        self.dim
    }

    fn check_state_len(&self, n: usize) -> Result<()> {
        if self.dim != n {
            return Err(UkfError::DimensionMismatch {
                what: "identity measurement",
                expected: n,
                actual: self.dim,
            });
        }
        Ok(())
    }

    fn measure(&self, state: &na::DVector<f64>) -> na::DVector<f64> {
        state.clone()
    }

    fn measure_batch(&self, states: &na::DMatrix<f64>) -> na::DMatrix<f64> {
        states.clone()
    }
}

/// Only a fixed subset of agents is observed, with both coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedSubset {
    /// Observed agents, sorted.
    pub agents: Vec<usize>,
    /// State indices `2i, 2i + 1` of the observed agents.
    pub coords: Vec<usize>,
}

impl ObservedSubset {
    pub fn new(mut agents: Vec<usize>) -> Self {
        agents.sort_unstable();
        agents.dedup();
        let coords = agents.iter().flat_map(|&i| [2 * i, 2 * i + 1]).collect();
        Self { agents, coords }
    }

    /// Randomly picks `sample_size` of `pop_total` agents to observe.
    pub fn omission<R: Rng + ?Sized>(pop_total: usize, sample_size: usize, rng: &mut R) -> Self {
        let agents = rand::seq::index::sample(rng, pop_total, sample_size.min(pop_total)).into_vec();
        Self::new(agents)
    }

    /// Observes `floor(pop_total * prop)` randomly picked agents.
    pub fn proportion<R: Rng + ?Sized>(pop_total: usize, prop: f64, rng: &mut R) -> Self {
        let sample_size = (pop_total as f64 * prop.clamp(0.0, 1.0)).floor() as usize;
        Self::omission(pop_total, sample_size, rng)
    }
}

impl MeasurementModel for ObservedSubset {
    fn dim_z(&self) -> usize {
        self.coords.len()
    }

    fn check_state_len(&self, n: usize) -> Result<()> {
        match self.coords.iter().max() {
            Some(&c) if c >= n => Err(UkfError::Configuration(format!(
                "observed agent {} is outside a state of {n} values",
                c / 2
            ))),
            _ => Ok(()),
        }
    }

    fn measure(&self, state: &na::DVector<f64>) -> na::DVector<f64> {
        state.select_rows(self.coords.iter())
    }

    fn measure_batch(&self, states: &na::DMatrix<f64>) -> na::DMatrix<f64> {
        states.select_rows(self.coords.iter())
    }

    fn obs_key(&self, statuses: &[AgentStatus]) -> Vec<ObsKind> {
        let mut key = vec![ObsKind::Unobserved; statuses.len()];
        for &i in &self.agents {
            if statuses.get(i) == Some(&AgentStatus::Active) {
                key[i] = ObsKind::Gps;
            }
        }
        key
    }
}
