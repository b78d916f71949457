//! Conversion between backend tensors and wire vectors.
//!
//! The backend may simulate several replicas and report batched results.
//! The wire always carries replica 0, flattened.

use simgate_sim::Tensor;

use crate::error::CommandError;

/// Reduce an observation to replica 0 as a flat vector of `obs_dim` values.
///
/// A 1-D tensor is already flat; a 2-D tensor contributes its first row.
pub fn observation_replica0(obs: &Tensor, obs_dim: usize) -> Result<Vec<f32>, CommandError> {
    let shape_error = || CommandError::ObservationShape {
        shape: obs.shape().to_vec(),
        expected: obs_dim,
    };

    let flat = match obs.ndim() {
        1 => obs.data(),
        2 => obs.row(0).ok_or_else(shape_error)?,
        _ => return Err(shape_error()),
    };
    if flat.len() != obs_dim {
        return Err(shape_error());
    }
    Ok(flat.to_vec())
}

/// Replica 0 entry of a per-replica scalar such as the reward.
pub fn scalar_replica0(values: &Tensor, what: &'static str) -> Result<f32, CommandError> {
    values
        .data()
        .first()
        .copied()
        .ok_or(CommandError::EmptyTensor(what))
}

/// Replica 0 entry of a per-replica flag; any nonzero value is true.
pub fn flag_replica0(values: &Tensor, what: &'static str) -> Result<bool, CommandError> {
    scalar_replica0(values, what).map(|v| v != 0.0)
}

/// Shape a flat action into the `(1, action_dim)` batch the backend expects.
pub fn action_batch(action: &[f32], action_dim: usize) -> Result<Tensor, CommandError> {
    if action.len() != action_dim {
        return Err(CommandError::ActionLength {
            expected: action_dim,
            actual: action.len(),
        });
    }
    Ok(Tensor::batched(1, action_dim, action.to_vec())?)
}
