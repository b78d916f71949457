//! The single simulation session owned by the server.
//!
//! A `Session` is created once at startup and passed explicitly to every
//! command handler. It exclusively owns its adapter; nothing else may call
//! into the backend.

use std::collections::BTreeMap;

use simgate_sim::SimulationAdapter;
use simgate_wire::StepReply;

use crate::diagnostic::MassProbe;
use crate::error::CommandError;
use crate::marshal::{action_batch, flag_replica0, observation_replica0, scalar_replica0};

/// Long-lived simulation instance.
pub struct Session {
    adapter: Box<dyn SimulationAdapter>,
    device: String,
    obs_dim: usize,
    action_dim: usize,
    probe: MassProbe,
}

impl Session {
    /// Wrap a constructed adapter.
    pub fn new(adapter: Box<dyn SimulationAdapter>, probe: MassProbe) -> Self {
        let device = adapter.device().to_string();
        let obs_dim = adapter.obs_dim();
        let action_dim = adapter.action_dim();

        tracing::info!(
            device = %device,
            obs_dim,
            action_dim,
            replicas = adapter.num_replicas(),
            probe_actor = probe.actor(),
            "Session created"
        );

        Self {
            adapter,
            device,
            obs_dim,
            action_dim,
            probe,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Restart the episode and return replica 0's observation.
    pub fn reset(&mut self) -> Result<Vec<f32>, CommandError> {
        let obs = self.adapter.reset()?;
        observation_replica0(&obs, self.obs_dim)
    }

    /// Apply one action and return the step result for replica 0.
    ///
    /// The mass diagnostic is read before the action is applied and can never
    /// fail the step.
    pub fn step(&mut self, action: &[f32]) -> Result<StepReply, CommandError> {
        let batch = action_batch(action, self.action_dim)?;
        let diagnostic = self.probe.describe(self.adapter.as_ref());

        let out = self.adapter.step(&batch)?;

        Ok(StepReply {
            observation: observation_replica0(&out.observation, self.obs_dim)?,
            reward: f64::from(scalar_replica0(&out.reward, "reward")?),
            terminated: flag_replica0(&out.done, "done")?,
            truncated: false,
            info: BTreeMap::new(),
            diagnostic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::NOT_AVAILABLE;
    use crate::test_support::{ProbeBehavior, ScriptedAdapter, StepBehavior};

    fn session(adapter: ScriptedAdapter) -> Session {
        Session::new(Box::new(adapter), MassProbe::default())
    }

    #[test]
    fn test_dimensions_recorded_at_construction() {
        let s = session(ScriptedAdapter::new(7, 2));
        assert_eq!(s.obs_dim(), 7);
        assert_eq!(s.action_dim(), 2);
        assert_eq!(s.device(), "cpu");
    }

    #[test]
    fn test_reset_reduces_batch_to_replica_zero() {
        let mut s = session(ScriptedAdapter::new(4, 2).with_replicas(8));
        assert_eq!(s.reset().unwrap(), vec![0.0; 4]);
    }

    #[test]
    fn test_step_result_for_replica_zero() {
        let mut s = session(ScriptedAdapter::new(4, 2).with_replicas(3));
        s.reset().unwrap();
        let reply = s.step(&[0.0, 0.0]).unwrap();

        assert_eq!(reply.observation, vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(reply.reward, 0.25);
        assert!(!reply.terminated);
        assert!(!reply.truncated);
        assert!(reply.info.is_empty());
        assert_eq!(reply.diagnostic, "0.5000 kg");
    }

    #[test]
    fn test_step_sends_single_row_batch() {
        let adapter = ScriptedAdapter::new(4, 3).with_replicas(5);
        let seen = adapter.last_action_shape.clone();
        let mut s = session(adapter);
        s.step(&[0.1, 0.2, 0.3]).unwrap();
        assert_eq!(*seen.borrow(), Some(vec![1, 3]));
    }

    #[test]
    fn test_terminated_flag_from_done() {
        let mut adapter = ScriptedAdapter::new(2, 1);
        adapter.done_after = Some(2);
        let mut s = session(adapter);
        assert!(!s.step(&[0.0]).unwrap().terminated);
        assert!(s.step(&[0.0]).unwrap().terminated);
    }

    #[test]
    fn test_wrong_action_length_does_not_reach_backend() {
        let mut s = session(ScriptedAdapter::new(2, 3).with_step(StepBehavior::Panic));
        let err = s.step(&[0.0; 4]).unwrap_err();
        assert!(matches!(
            err,
            CommandError::ActionLength {
                expected: 3,
                actual: 4
            }
        ));
    }

    #[test]
    fn test_probe_failure_does_not_fail_step() {
        let mut s = session(ScriptedAdapter::new(2, 1).with_probe(ProbeBehavior::Panic));
        s.reset().unwrap();
        let reply = s.step(&[0.0]).unwrap();
        assert_eq!(reply.diagnostic, NOT_AVAILABLE);
    }

    #[test]
    fn test_backend_failure_surfaces_as_command_error() {
        let mut s = session(ScriptedAdapter::new(2, 1).with_step(StepBehavior::Fail));
        let err = s.step(&[0.0]).unwrap_err();
        assert_eq!(err.to_string(), "Simulation error: Backend failure: physics diverged");
    }
}
