//! Error types for the Session Server.

use std::io;
use std::net::SocketAddr;

use simgate_sim::SimError;
use simgate_wire::WireError;

use crate::ServerState;

/// Per-request failure. Rendered with `Display` into the `error` reply.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Command '{0}' requires a payload")]
    MissingPayload(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] WireError),
    #[error("Action has {actual} elements, expected {expected}")]
    ActionLength { expected: usize, actual: usize },
    #[error("Observation of shape {shape:?} does not hold {expected} values for replica 0")]
    ObservationShape { shape: Vec<usize>, expected: usize },
    #[error("{0} tensor is empty")]
    EmptyTensor(&'static str),
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimError),
    #[error("Command panicked: {0}")]
    Panicked(String),
}

/// Failure that stops the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create simulation session: {0}")]
    Session(#[source] SimError),
    #[error("Server is {0:?}, expected Ready")]
    NotReady(ServerState),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
