//! Command table and per-message dispatch.
//!
//! Every request maps to exactly one reply. Handler errors and panics are
//! contained here and turned into `("error", message)` envelopes; the
//! session is left as the failed command found it.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use simgate_wire::{CMD_CLOSE, CMD_RESET, CMD_STEP, Envelope, Value};

use crate::error::CommandError;
use crate::session::Session;

/// What the server loop does after sending the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Terminate,
}

/// Successful result of a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub body: Option<Value>,
    pub control: Control,
}

impl Outcome {
    pub fn reply(body: Value) -> Self {
        Self {
            body: Some(body),
            control: Control::Continue,
        }
    }

    pub fn terminate() -> Self {
        Self {
            body: None,
            control: Control::Terminate,
        }
    }
}

/// Command handler: receives the session and the request payload, if any.
pub type Handler = Box<dyn Fn(&mut Session, Option<&Value>) -> Result<Outcome, CommandError>>;

/// Registered commands, keyed by name.
pub struct CommandTable {
    handlers: HashMap<String, Handler>,
}

impl CommandTable {
    /// Table with no commands.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Table with the built-in `reset`, `step` and `close` commands.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(CMD_RESET, handle_reset);
        table.register(CMD_STEP, handle_step);
        table.register(CMD_CLOSE, handle_close);
        table
    }

    /// Register `handler` under `name`, replacing any previous handler.
    /// Returns true if a handler was replaced.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> bool
    where
        F: Fn(&mut Session, Option<&Value>) -> Result<Outcome, CommandError> + 'static,
    {
        self.handlers
            .insert(name.into(), Box::new(handler))
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the handler for `request` and build the reply.
    pub fn dispatch(&self, session: &mut Session, request: &Envelope) -> (Envelope, Control) {
        match self.run(session, request) {
            Ok(outcome) => (Envelope::ok(outcome.body), outcome.control),
            Err(e) => {
                tracing::warn!(command = %request.tag, "{e}");
                (Envelope::error(e.to_string()), Control::Continue)
            }
        }
    }

    fn run(&self, session: &mut Session, request: &Envelope) -> Result<Outcome, CommandError> {
        let handler = self
            .handlers
            .get(&request.tag)
            .ok_or_else(|| CommandError::UnknownCommand(request.tag.clone()))?;

        panic::catch_unwind(AssertUnwindSafe(|| handler(session, request.payload())))
            .unwrap_or_else(|payload| Err(CommandError::Panicked(panic_message(&*payload))))
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Built-in Handlers
// ============================================================================

fn handle_reset(session: &mut Session, _payload: Option<&Value>) -> Result<Outcome, CommandError> {
    tracing::info!("[CMD] reset");
    let obs = session.reset()?;
    tracing::info!(obs_len = obs.len(), "reset done");
    Ok(Outcome::reply(Value::vector(obs)))
}

fn handle_step(session: &mut Session, payload: Option<&Value>) -> Result<Outcome, CommandError> {
    let action = payload
        .ok_or_else(|| CommandError::MissingPayload(CMD_STEP.to_string()))?
        .to_f32_vec()?;
    let reply = session.step(&action)?;
    tracing::info!(
        mass = %reply.diagnostic,
        reward = reply.reward,
        obs_len = reply.observation.len(),
        terminated = reply.terminated,
        "[CMD] step done"
    );
    Ok(Outcome::reply(reply.into()))
}

fn handle_close(_session: &mut Session, _payload: Option<&Value>) -> Result<Outcome, CommandError> {
    tracing::info!("Server shutting down (client requested)");
    Ok(Outcome::terminate())
}

// ============================================================================
// Tests
// ============================================================================
