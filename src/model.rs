/// Lifecycle of a single agent in the stepped simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentStatus {
    NotStarted = 0,
    Active = 1,
    Finished = 2,
}

/// The external stepping process model the filter estimates.
///
/// The state is the flattened agent positions `[x0, y0, x1, y1, ...]`, so its
/// length is always `2 * pop_total()`.
pub trait AgentModel {
    fn state(&self) -> na::DVector<f64>;
    fn set_state(&mut self, state: &na::DVector<f64>);
    fn step(&mut self);
    fn statuses(&self) -> Vec<AgentStatus>;

    fn pop_total(&self) -> usize {
        self.statuses().len()
    }

    fn pop_finished(&self) -> usize {
        self.statuses()
            .iter()
            .filter(|s| **s == AgentStatus::Finished)
            .count()
    }

    fn pop_active(&self) -> usize {
        self.statuses()
            .iter()
            .filter(|s| **s == AgentStatus::Active)
            .count()
    }
}

/// Transition function for agent models.
///
/// Copies the base model, overwrites its positions with the sigma point,
/// steps the copy once and reads the forecast positions back. The base model
/// itself is never touched.
pub fn step_copy<M>(x: &na::DVector<f64>, base_model: &M) -> na::DVector<f64>
where
    M: AgentModel + Clone,
{
    let mut model = base_model.clone();
    model.set_state(x);
    model.step();
    model.state()
}
