//! Best-effort diagnostic side queries.
//!
//! A diagnostic never affects the primary result of a command. Errors and
//! panics raised while computing one are absorbed and replaced with the
//! [`NOT_AVAILABLE`] sentinel.

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};

use simgate_sim::SimulationAdapter;

/// Sentinel reported when a diagnostic cannot be computed.
pub const NOT_AVAILABLE: &str = "N/A";

/// Actor whose mass is reported by default.
pub const DEFAULT_PROBE_ACTOR: &str = "object";

/// Run `query`, turning any error or panic into `None`.
pub fn best_effort<T, E, F>(query: F) -> Option<T>
where
    E: Display,
    F: FnOnce() -> Result<T, E>,
{
    match panic::catch_unwind(AssertUnwindSafe(query)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::trace!("diagnostic query failed: {e}");
            None
        }
        Err(_) => {
            tracing::trace!("diagnostic query panicked");
            None
        }
    }
}

/// Reports the mass of the first rigid body of one actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MassProbe {
    actor: String,
}

impl MassProbe {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// `"<mass> kg"` with four decimals, or [`NOT_AVAILABLE`].
    pub fn describe(&self, adapter: &dyn SimulationAdapter) -> String {
        best_effort(|| adapter.rigid_body_properties(&self.actor))
            .and_then(|bodies| bodies.first().map(|b| format!("{:.4} kg", b.mass)))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }
}

impl Default for MassProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_ACTOR)
    }
}
