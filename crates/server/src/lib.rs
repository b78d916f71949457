//! Simgate Session Server
//!
//! Serves exactly one simulation session to remote clients over a strict
//! request/response protocol. The server owns:
//! - The listening endpoint and the connection being served
//! - The single [`Session`] and its simulation adapter
//! - The command table mapping request names to handlers
//!
//! # Lifecycle
//!
//! `Uninitialized` → (bind, build session) → `Ready`. Each request moves the
//! server to `Dispatching` and back. `close` or an interrupt moves it to
//! `Terminating`; a startup failure is `Failed`. Per-request failures never
//! leave `Ready`: they are answered with an `error` reply.

#![deny(unsafe_code)]

pub mod client;
pub mod diagnostic;
pub mod dispatch;
pub mod error;
pub mod marshal;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

use std::net::{Ipv4Addr, SocketAddr};

use simgate_sim::{SimError, SimulationAdapter};
use simgate_wire::{DEFAULT_MAX_FRAME_LEN, Envelope, WireError};

pub use client::{ClientError, SessionClient};
pub use diagnostic::{DEFAULT_PROBE_ACTOR, MassProbe, NOT_AVAILABLE};
pub use dispatch::{CommandTable, Control, Outcome};
pub use error::{CommandError, ServerError};
pub use session::Session;
pub use transport::ShutdownHandle;

use transport::{Connection, Endpoint};

// ============================================================================
// Parameters
// ============================================================================

/// Default listening port.
pub const DEFAULT_PORT: u16 = 5555;

/// Default bind address: every interface on [`DEFAULT_PORT`].
pub const DEFAULT_BIND_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT);

/// Server configuration, resolved once before the server starts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Largest accepted request frame, in bytes.
    pub max_frame_len: usize,
    /// Actor whose mass is reported with every step.
    pub probe_actor: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            probe_actor: DEFAULT_PROBE_ACTOR.to_string(),
        }
    }
}

// ============================================================================
// Server State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Ready,
    Dispatching,
    Terminating,
    Failed,
}

/// Why the server loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A client sent `close`.
    Closed,
    /// The shutdown handle was triggered.
    Interrupted,
    /// The connection broke in a way the framing layer cannot recover from.
    TransportFault,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Interrupted => "interrupted",
            Self::TransportFault => "transport fault",
        }
    }
}

/// How serving one connection ended.
enum ConnectionEnd {
    /// The client went away cleanly; accept the next one.
    Disconnected,
    Exit(ExitReason),
}

// ============================================================================
// Server
// ============================================================================

/// The Session Server. Owns the endpoint and the single session.
pub struct Server {
    config: ServerConfig,
    endpoint: Endpoint,
    session: Session,
    commands: CommandTable,
    state: ServerState,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Bind the endpoint, then build the session with `factory`.
    ///
    /// On failure everything acquired so far is released before returning.
    pub fn start<F>(config: ServerConfig, factory: F) -> Result<Self, ServerError>
    where
        F: FnOnce() -> Result<Box<dyn SimulationAdapter>, SimError>,
    {
        tracing::debug!(state = ?ServerState::Uninitialized, "Starting server");

        let endpoint = Endpoint::bind(config.bind_addr).map_err(|source| {
            tracing::error!(state = ?ServerState::Failed, addr = %config.bind_addr, "Bind failed: {source}");
            ServerError::Bind {
                addr: config.bind_addr,
                source,
            }
        })?;

        let adapter = factory().map_err(|e| {
            tracing::error!(state = ?ServerState::Failed, "Simulation construction failed: {e}");
            ServerError::Session(e)
        })?;
        let session = Session::new(adapter, MassProbe::new(config.probe_actor.clone()));
        let shutdown = endpoint.shutdown_handle();

        tracing::info!(addr = %endpoint.local_addr(), "Server bound");
        Ok(Self {
            config,
            endpoint,
            session,
            commands: CommandTable::standard(),
            state: ServerState::Ready,
            shutdown,
        })
    }

    /// Actual bound address (differs from the configured one for port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle that stops [`Server::serve`] from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Command table, for registering additional commands before serving.
    pub fn commands_mut(&mut self) -> &mut CommandTable {
        &mut self.commands
    }

    /// Serve clients until `close`, an interrupt or a transport fault.
    pub fn serve(&mut self) -> Result<ExitReason, ServerError> {
        if self.state != ServerState::Ready {
            return Err(ServerError::NotReady(self.state));
        }
        tracing::info!(addr = %self.local_addr(), "Waiting for client");

        let reason = loop {
            let mut conn = match self.endpoint.accept() {
                Ok(Some(conn)) => conn,
                Ok(None) => break ExitReason::Interrupted,
                Err(e) => {
                    tracing::error!("Accept failed: {e}");
                    break ExitReason::TransportFault;
                }
            };
            tracing::info!(peer = %conn.peer(), "Client connected");

            match self.serve_connection(&mut conn) {
                ConnectionEnd::Disconnected => {
                    tracing::info!(peer = %conn.peer(), "Client disconnected");
                }
                ConnectionEnd::Exit(reason) => break reason,
            }
        };

        self.state = ServerState::Terminating;
        tracing::info!(reason = reason.as_str(), "Server loop exited");
        Ok(reason)
    }

    fn serve_connection(&mut self, conn: &mut Connection) -> ConnectionEnd {
        loop {
            let received = conn.recv_frame(self.config.max_frame_len);
            if self.shutdown.is_triggered() {
                return ConnectionEnd::Exit(ExitReason::Interrupted);
            }

            let frame = match received {
                Ok(Some(frame)) => frame,
                Ok(None) => return ConnectionEnd::Disconnected,
                Err(e) => {
                    tracing::error!("Receive failed: {e}");
                    let fault = e.is_transport_fault();
                    // An oversized frame is still answered; the stream is abandoned after.
                    let answer = !fault || matches!(e, WireError::FrameTooLarge { .. });
                    let sent = answer && conn.send(&Envelope::error(e.to_string())).is_ok();
                    if fault || !sent {
                        return ConnectionEnd::Exit(ExitReason::TransportFault);
                    }
                    continue;
                }
            };

            let (reply, control) = self.handle_frame(&frame);
            if let Err(e) = conn.send(&reply) {
                tracing::error!("Send failed: {e}");
                return ConnectionEnd::Exit(if self.shutdown.is_triggered() {
                    ExitReason::Interrupted
                } else {
                    ExitReason::TransportFault
                });
            }

            if control == Control::Terminate {
                return ConnectionEnd::Exit(ExitReason::Closed);
            }
        }
    }

    /// Decode one request frame and dispatch it.
    fn handle_frame(&mut self, frame: &[u8]) -> (Envelope, Control) {
        let request = match Envelope::from_bytes(frame) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Malformed request: {e}");
                return (
                    Envelope::error(format!("Malformed request: {e}")),
                    Control::Continue,
                );
            }
        };

        self.state = ServerState::Dispatching;
        tracing::debug!(command = %request.tag, "Dispatching");
        let result = self.commands.dispatch(&mut self.session, &request);
        self.state = ServerState::Ready;
        result
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        tracing::info!(addr = %self.endpoint.local_addr(), "Session and endpoint released");
    }
}

// ============================================================================
// Tests
// ============================================================================
