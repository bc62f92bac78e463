extern crate nalgebra as na;

pub mod adaptive;
pub mod config;
pub mod corridor;
pub mod covariance;
pub mod driver;
pub mod error;
pub mod model;
pub mod observe;
pub mod sigma;
pub mod transform;
pub mod ukf;

pub use adaptive::{FaultDetector, FaultOutcome};
pub use config::{NoiseAdaptation, RunParams, UkfParams};
pub use driver::{RunRecord, UkfRun};
pub use error::{Result, UkfError};
pub use model::{step_copy, AgentModel, AgentStatus};
pub use observe::{Identity, MeasurementModel, ObsKind, ObservedSubset};
pub use ukf::UnscentedKalmanFilter;
