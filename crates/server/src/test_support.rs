//! Scripted adapter for unit tests.

use std::cell::RefCell;
use std::rc::Rc;

use simgate_sim::{Info, RigidBodyProperties, SimError, SimulationAdapter, StepOutput, Tensor};

#[derive(Debug, Clone, Copy)]
pub enum ProbeBehavior {
    Mass(f32),
    NoBodies,
    Unsupported,
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepBehavior {
    Normal,
    Fail,
    Panic,
}

/// Adapter with fixed dimensions whose failures are chosen by the test.
///
/// Observations are batched over `replicas`; replica `r` reports the value
/// `r` in every slot, so replica 0 is all zeros plus the step count in slot 0.
pub struct ScriptedAdapter {
    pub obs_dim: usize,
    pub action_dim: usize,
    pub replicas: usize,
    pub probe: ProbeBehavior,
    pub step_behavior: StepBehavior,
    pub fail_reset: bool,
    pub done_after: Option<u32>,
    pub steps: u32,
    /// Shape of the last action passed to `step`, shared with the test.
    pub last_action_shape: Rc<RefCell<Option<Vec<usize>>>>,
}

impl ScriptedAdapter {
    pub fn new(obs_dim: usize, action_dim: usize) -> Self {
        Self {
            obs_dim,
            action_dim,
            replicas: 1,
            probe: ProbeBehavior::Mass(0.5),
            step_behavior: StepBehavior::Normal,
            fail_reset: false,
            done_after: None,
            steps: 0,
            last_action_shape: Rc::default(),
        }
    }

    pub fn with_probe(mut self, probe: ProbeBehavior) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_step(mut self, behavior: StepBehavior) -> Self {
        self.step_behavior = behavior;
        self
    }

    fn observation(&self) -> Tensor {
        let mut data = Vec::with_capacity(self.replicas * self.obs_dim);
        for r in 0..self.replicas {
            for i in 0..self.obs_dim {
                let v = if r == 0 && i == 0 {
                    self.steps as f32
                } else {
                    r as f32
                };
                data.push(v);
            }
        }
        Tensor::batched(self.replicas, self.obs_dim, data).expect("consistent shape")
    }
}

impl SimulationAdapter for ScriptedAdapter {
    fn device(&self) -> &str {
        "cpu"
    }

    fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    fn action_dim(&self) -> usize {
        self.action_dim
    }

    fn num_replicas(&self) -> usize {
        self.replicas
    }

    fn reset(&mut self) -> Result<Tensor, SimError> {
        if self.fail_reset {
            return Err(SimError::Backend("reset failed".to_string()));
        }
        self.steps = 0;
        Ok(self.observation())
    }

    fn step(&mut self, action: &Tensor) -> Result<StepOutput, SimError> {
        *self.last_action_shape.borrow_mut() = Some(action.shape().to_vec());
        match self.step_behavior {
            StepBehavior::Fail => return Err(SimError::Backend("physics diverged".to_string())),
            StepBehavior::Panic => panic!("backend crashed"),
            StepBehavior::Normal => {}
        }
        self.steps += 1;
        let done = self.done_after.is_some_and(|n| self.steps >= n);
        Ok(StepOutput {
            observation: self.observation(),
            reward: Tensor::from_flat(vec![0.25; self.replicas]),
            done: Tensor::from_flat(vec![if done { 1.0 } else { 0.0 }; self.replicas]),
            info: Info::new(),
        })
    }

    fn rigid_body_properties(&self, actor: &str) -> Result<Vec<RigidBodyProperties>, SimError> {
        if actor != "object" {
            return Err(SimError::UnknownActor(actor.to_string()));
        }
        match self.probe {
            ProbeBehavior::Mass(mass) => Ok(vec![RigidBodyProperties { mass }]),
            ProbeBehavior::NoBodies => Ok(Vec::new()),
            ProbeBehavior::Unsupported => Err(SimError::Unsupported("rigid body introspection")),
            ProbeBehavior::Panic => panic!("introspection crashed"),
        }
    }
}
