//! Reference task: push a point mass toward a goal.
//!
//! Each replica simulates one rigid body (the actor `"object"`) driven by a
//! 3-D force. The task runs on a fixed timestep and is fully determined by
//! the configured seed, so identical action sequences give identical results.
//!
//! Observation layout per replica: `[position(3), velocity(3), goal(3)]`.

use crate::{
    Info, RigidBodyProperties, SimError, SimulationAdapter, StepOutput, TaskConfig, Tensor,
};

/// Fixed simulation rate.
pub const TICK_RATE_HZ: u32 = 60;

/// Force applied for a unit action component, in newtons.
pub const MAX_FORCE: f32 = 2.0;

/// Linear velocity damping per second.
pub const DAMPING: f32 = 0.5;

/// Goals are sampled uniformly in a cube of this half-extent around the origin.
pub const GOAL_HALF_EXTENT: f32 = 0.5;

/// Distance at which the goal counts as reached.
pub const SUCCESS_TOLERANCE: f32 = 0.05;

/// Name of the single actor whose properties can be queried.
pub const OBJECT_ACTOR: &str = "object";

#[derive(Debug, Clone)]
struct Replica {
    position: [f32; 3],
    velocity: [f32; 3],
    goal: [f32; 3],
    progress: u32,
    needs_reset: bool,
}

impl Replica {
    fn observation(&self, out: &mut Vec<f32>) {
        out.extend_from_slice(&self.position);
        out.extend_from_slice(&self.velocity);
        out.extend_from_slice(&self.goal);
    }

    fn distance_to_goal(&self) -> f32 {
        let d: f32 = (0..3)
            .map(|i| (self.goal[i] - self.position[i]).powi(2))
            .sum();
        d.sqrt()
    }
}

/// Deterministic point-mass reaching task.
pub struct PointMassReach {
    device: String,
    episode_length: u32,
    dt_seconds: f32,
    object_mass: f32,
    replicas: Vec<Replica>,
    rng: fastrand::Rng,
}

impl PointMassReach {
    /// Registry name.
    pub const NAME: &'static str = "PointMassReach";

    pub const OBS_DIM: usize = 9;

    pub const ACTION_DIM: usize = 3;

    /// Build the task from its configuration.
    pub fn new(config: &TaskConfig) -> Result<Self, SimError> {
        if config.num_replicas == 0 {
            return Err(SimError::Backend(
                "number of replicas must be positive".to_string(),
            ));
        }
        if config.episode_length == 0 {
            return Err(SimError::Backend(
                "episode length must be positive".to_string(),
            ));
        }
        if !(config.object_mass.is_finite() && config.object_mass > 0.0) {
            return Err(SimError::Backend(format!(
                "object mass must be positive, got {}",
                config.object_mass
            )));
        }
        if let Some(root) = &config.asset_root
            && !root.is_dir()
        {
            return Err(SimError::AssetRoot(root.clone()));
        }
        if !config.headless {
            tracing::warn!("{} has no renderer; running headless", Self::NAME);
        }

        let mut task = Self {
            device: config.device.clone(),
            episode_length: config.episode_length,
            dt_seconds: 1.0 / TICK_RATE_HZ as f32,
            object_mass: config.object_mass,
            replicas: Vec::with_capacity(config.num_replicas),
            rng: fastrand::Rng::with_seed(config.seed),
        };
        for _ in 0..config.num_replicas {
            let goal = task.sample_goal();
            task.replicas.push(Replica {
                position: [0.0; 3],
                velocity: [0.0; 3],
                goal,
                progress: 0,
                needs_reset: false,
            });
        }

        tracing::debug!(
            replicas = config.num_replicas,
            episode_length = config.episode_length,
            "{} created",
            Self::NAME
        );
        Ok(task)
    }

    /// Progress counter of each replica.
    pub fn progress(&self) -> Vec<u32> {
        self.replicas.iter().map(|r| r.progress).collect()
    }

    fn sample_goal(&mut self) -> [f32; 3] {
        let mut goal = [0.0; 3];
        for axis in &mut goal {
            *axis = (self.rng.f32() * 2.0 - 1.0) * GOAL_HALF_EXTENT;
        }
        goal
    }

    fn reset_replica(&mut self, index: usize) {
        let goal = self.sample_goal();
        let replica = &mut self.replicas[index];
        replica.position = [0.0; 3];
        replica.velocity = [0.0; 3];
        replica.goal = goal;
        replica.progress = 0;
        replica.needs_reset = false;
    }

    fn observations(&self) -> Result<Tensor, SimError> {
        let mut data = Vec::with_capacity(self.replicas.len() * Self::OBS_DIM);
        for replica in &self.replicas {
            replica.observation(&mut data);
        }
        Tensor::batched(self.replicas.len(), Self::OBS_DIM, data)
    }
}

impl SimulationAdapter for PointMassReach {
    fn device(&self) -> &str {
        &self.device
    }

    fn obs_dim(&self) -> usize {
        Self::OBS_DIM
    }

    fn action_dim(&self) -> usize {
        Self::ACTION_DIM
    }

    fn num_replicas(&self) -> usize {
        self.replicas.len()
    }

    fn reset(&mut self) -> Result<Tensor, SimError> {
        for index in 0..self.replicas.len() {
            self.reset_replica(index);
        }
        self.observations()
    }

    /// Accepts `(1, 3)` (broadcast to every replica) or `(replicas, 3)`.
    fn step(&mut self, action: &Tensor) -> Result<StepOutput, SimError> {
        let replicas = self.replicas.len();
        let batch = match action.shape() {
            &[rows, Self::ACTION_DIM] if rows == 1 || rows == replicas => rows,
            other => {
                return Err(SimError::ActionShape {
                    expected: vec![replicas, Self::ACTION_DIM],
                    actual: other.to_vec(),
                });
            }
        };
        if action.data().iter().any(|a| !a.is_finite()) {
            return Err(SimError::InvalidTensor(
                "action contains non-finite values".to_string(),
            ));
        }

        let mut rewards = Vec::with_capacity(replicas);
        let mut dones = Vec::with_capacity(replicas);
        let mut successes = 0usize;

        for index in 0..replicas {
            if self.replicas[index].needs_reset {
                self.reset_replica(index);
            }
            let row = action.row(if batch == 1 { 0 } else { index }).unwrap_or(&[]);

            let (dt, mass, episode_length) =
                (self.dt_seconds, self.object_mass, self.episode_length);
            let replica = &mut self.replicas[index];
            for (axis, &a) in row.iter().enumerate() {
                let force = a.clamp(-1.0, 1.0) * MAX_FORCE;
                let accel = force / mass - DAMPING * replica.velocity[axis];
                replica.velocity[axis] += accel * dt;
                replica.position[axis] += replica.velocity[axis] * dt;
            }
            replica.progress += 1;

            let distance = replica.distance_to_goal();
            let reached = distance < SUCCESS_TOLERANCE;
            let done = reached || replica.progress >= episode_length;
            replica.needs_reset = done;
            if reached {
                successes += 1;
            }

            rewards.push(-distance);
            dones.push(if done { 1.0 } else { 0.0 });
        }

        let mut info = Info::new();
        info.insert(
            "successes".to_string(),
            successes as f64 / replicas as f64,
        );

        Ok(StepOutput {
            observation: self.observations()?,
            reward: Tensor::from_flat(rewards),
            done: Tensor::from_flat(dones),
            info,
        })
    }

    fn rigid_body_properties(&self, actor: &str) -> Result<Vec<RigidBodyProperties>, SimError> {
        if actor == OBJECT_ACTOR {
            Ok(vec![RigidBodyProperties {
                mass: self.object_mass,
            }])
        } else {
            Err(SimError::UnknownActor(actor.to_string()))
        }
    }
}
