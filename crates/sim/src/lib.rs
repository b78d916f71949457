//! simgate Simulation Adapter
//!
//! This crate defines the contract the Session Server requires from a physics
//! backend. The backend itself is an external collaborator: it accepts an
//! action batch, advances one timestep and reports observation, reward and
//! termination per replica.
//!
//! # Contract
//!
//! - `reset()` returns an observation that is either flat or batched with one
//!   row per replica.
//! - `step(action)` takes an action of shape `(batch, action_dim)`.
//! - Rigid body introspection is optional and only used for diagnostics.
//! - Adapters are single-threaded and non-reentrant. Callers never issue a
//!   second call while one is outstanding.
//!
//! A deterministic reference task ([`PointMassReach`]) is included so the
//! server can run without an external engine.

#![deny(unsafe_code)]

pub mod point_mass;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use point_mass::PointMassReach;

// ============================================================================
// Errors
// ============================================================================

/// Failures reported by a simulation backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),
    #[error("Asset root {} is not a directory", .0.display())]
    AssetRoot(PathBuf),
    #[error("Action shape {actual:?} does not match expected {expected:?}")]
    ActionShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Unknown actor: {0}")]
    UnknownActor(String),
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("Invalid tensor: {0}")]
    InvalidTensor(String),
    #[error("Backend failure: {0}")]
    Backend(String),
}

// ============================================================================
// Tensor
// ============================================================================

/// Row-major numeric array exchanged with the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking that `shape` covers exactly `data.len()` values.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, SimError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(SimError::InvalidTensor(format!(
                "shape {shape:?} holds {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional tensor.
    pub fn from_flat(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Two-dimensional tensor of `rows` x `cols`.
    pub fn batched(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, SimError> {
        Self::new(vec![rows, cols], data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Row `index` of a two-dimensional tensor.
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let &[rows, cols] = self.shape.as_slice() else {
            return None;
        };
        if index >= rows {
            return None;
        }
        Some(&self.data[index * cols..(index + 1) * cols])
    }
}

// ============================================================================
// Adapter Contract
// ============================================================================

/// Per-step auxiliary values reported by the backend.
pub type Info = BTreeMap<String, f64>;

/// Result of advancing the simulation by one timestep.
///
/// Every field is batched per replica. `done` holds a nonzero value for each
/// replica whose episode ended on this step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub observation: Tensor,
    pub reward: Tensor,
    pub done: Tensor,
    pub info: Info,
}

/// Physical properties of one rigid body of an actor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidBodyProperties {
    /// Mass in kilograms.
    pub mass: f32,
}

/// Capability surface the Session Server depends on.
pub trait SimulationAdapter {
    /// Compute device identifier (e.g. `"cpu"`, `"cuda:0"`).
    fn device(&self) -> &str;

    /// Length of a single replica's observation.
    fn obs_dim(&self) -> usize;

    /// Length of a single replica's action.
    fn action_dim(&self) -> usize;

    /// Number of parallel replicas simulated internally.
    fn num_replicas(&self) -> usize {
        1
    }

    /// Restart the episode and return the initial observation.
    fn reset(&mut self) -> Result<Tensor, SimError>;

    /// Apply `action` for one timestep.
    fn step(&mut self, action: &Tensor) -> Result<StepOutput, SimError>;

    /// Rigid body properties of the named actor in replica 0.
    fn rigid_body_properties(&self, actor: &str) -> Result<Vec<RigidBodyProperties>, SimError> {
        let _ = actor;
        Err(SimError::Unsupported("rigid body introspection"))
    }
}

// ============================================================================
// Task Configuration
// ============================================================================

/// Default episode length in steps.
pub const DEFAULT_EPISODE_LENGTH: u32 = 75;

/// Default object mass in kilograms.
pub const DEFAULT_OBJECT_MASS: f32 = 0.5;

/// Task selection and backend settings, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskConfig {
    pub task: String,
    pub headless: bool,
    pub episode_length: u32,
    pub asset_root: Option<PathBuf>,
    pub device: String,
    pub num_replicas: usize,
    pub seed: u64,
    pub object_mass: f32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            task: PointMassReach::NAME.to_string(),
            headless: true,
            episode_length: DEFAULT_EPISODE_LENGTH,
            asset_root: None,
            device: "cpu".to_string(),
            num_replicas: 1,
            seed: 0,
            object_mass: DEFAULT_OBJECT_MASS,
        }
    }
}

impl TaskConfig {
    /// Resolve the asset root against `base` so later lookups do not depend on
    /// the working directory.
    pub fn resolve_asset_root(&mut self, base: &Path) {
        if let Some(root) = self.asset_root.take() {
            let absolute = if root.is_absolute() {
                root
            } else {
                base.join(root)
            };
            self.asset_root = Some(absolute);
        }
    }
}

/// Names accepted by [`build_task`].
pub const TASKS: &[&str] = &[PointMassReach::NAME];

/// Construct the backend for `config.task`.
pub fn build_task(config: &TaskConfig) -> Result<Box<dyn SimulationAdapter>, SimError> {
    match config.task.as_str() {
        PointMassReach::NAME => Ok(Box::new(PointMassReach::new(config)?)),
        other => Err(SimError::UnknownTask(other.to_string())),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_rejects_shape_mismatch() {
        let result = Tensor::new(vec![2, 3], vec![0.0; 5]);
        assert!(matches!(result, Err(SimError::InvalidTensor(_))));
    }

    #[test]
    fn test_tensor_row_access() {
        let t = Tensor::batched(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(t.ndim(), 2);
        assert_eq!(t.row(0), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(t.row(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(t.row(2), None);
    }

    #[test]
    fn test_row_requires_two_dimensions() {
        let t = Tensor::from_flat(vec![1.0, 2.0]);
        assert_eq!(t.shape(), &[2]);
        assert_eq!(t.row(0), None);
    }

    #[test]
    fn test_build_task_unknown_name() {
        let config = TaskConfig {
            task: "ShadowHandOver".to_string(),
            ..Default::default()
        };
        let err = build_task(&config).err().unwrap();
        assert_eq!(err, SimError::UnknownTask("ShadowHandOver".to_string()));
        assert_eq!(err.to_string(), "Unknown task: ShadowHandOver");
    }

    #[test]
    fn test_build_task_default_is_point_mass() {
        let adapter = build_task(&TaskConfig::default()).unwrap();
        assert_eq!(adapter.obs_dim(), PointMassReach::OBS_DIM);
        assert_eq!(adapter.action_dim(), PointMassReach::ACTION_DIM);
        assert_eq!(adapter.device(), "cpu");
    }

    #[test]
    fn test_every_listed_task_builds() {
        for name in TASKS {
            let config = TaskConfig {
                task: (*name).to_string(),
                ..Default::default()
            };
            assert!(build_task(&config).is_ok(), "{name} failed to build");
        }
    }

    #[test]
    fn test_resolve_relative_asset_root() {
        let mut config = TaskConfig {
            asset_root: Some(PathBuf::from("assets")),
            ..Default::default()
        };
        config.resolve_asset_root(Path::new("/srv/sim"));
        assert_eq!(config.asset_root, Some(PathBuf::from("/srv/sim/assets")));

        let mut absolute = TaskConfig {
            asset_root: Some(PathBuf::from("/data/assets")),
            ..Default::default()
        };
        absolute.resolve_asset_root(Path::new("/srv/sim"));
        assert_eq!(absolute.asset_root, Some(PathBuf::from("/data/assets")));
    }

    #[test]
    fn test_default_rigid_body_introspection_unsupported() {
        struct Bare;
        impl SimulationAdapter for Bare {
            fn device(&self) -> &str {
                "cpu"
            }
            fn obs_dim(&self) -> usize {
                1
            }
            fn action_dim(&self) -> usize {
                1
            }
            fn reset(&mut self) -> Result<Tensor, SimError> {
                Ok(Tensor::from_flat(vec![0.0]))
            }
            fn step(&mut self, _action: &Tensor) -> Result<StepOutput, SimError> {
                Err(SimError::Backend("unused".to_string()))
            }
        }

        let bare = Bare;
        assert_eq!(bare.num_replicas(), 1);
        assert!(matches!(
            bare.rigid_body_properties("object"),
            Err(SimError::Unsupported(_))
        ));
    }
}
