//! Blocking client for the session protocol.

use std::net::{SocketAddr, TcpStream};

use simgate_wire::{
    CMD_CLOSE, CMD_RESET, CMD_STEP, DEFAULT_MAX_FRAME_LEN, Envelope, StepReply, Value, WireError,
    read_envelope, write_envelope,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("Server closed the connection")]
    Disconnected,
    #[error("Server error: {0}")]
    Server(String),
    #[error("Unexpected reply tag '{0}'")]
    UnexpectedReply(String),
}

/// One connection to a Session Server.
pub struct SessionClient {
    stream: TcpStream,
    max_frame_len: usize,
}

impl SessionClient {
    pub fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).map_err(WireError::from)?;
        stream.set_nodelay(true).map_err(WireError::from)?;
        Ok(Self {
            stream,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        })
    }

    /// Send a raw request and return the raw reply, whatever its status.
    pub fn request(&mut self, request: &Envelope) -> Result<Envelope, ClientError> {
        write_envelope(&mut self.stream, request)?;
        read_envelope(&mut self.stream, self.max_frame_len)?.ok_or(ClientError::Disconnected)
    }

    /// Send `name` with `payload` and return the success body.
    pub fn call(&mut self, name: &str, payload: Option<Value>) -> Result<Option<Value>, ClientError> {
        let reply = self.request(&Envelope::new(name, payload))?;
        if reply.is_ok() {
            return Ok(reply.payload().cloned());
        }
        match reply.error_message() {
            Some(message) => Err(ClientError::Server(message.to_string())),
            None => Err(ClientError::UnexpectedReply(reply.tag)),
        }
    }

    pub fn reset(&mut self) -> Result<Vec<f32>, ClientError> {
        let body = self.call(CMD_RESET, None)?.ok_or(WireError::UnexpectedValue {
            expected: "observation",
            actual: "none".to_string(),
        })?;
        Ok(body.to_f32_vec()?)
    }

    pub fn step(&mut self, action: Vec<f32>) -> Result<StepReply, ClientError> {
        let body = self.call(CMD_STEP, Some(Value::vector(action)))?.ok_or(WireError::UnexpectedValue {
            expected: "step result",
            actual: "none".to_string(),
        })?;
        Ok(StepReply::try_from(&body)?)
    }

    /// Ask the server to shut down. Consumes the client.
    pub fn close(mut self) -> Result<(), ClientError> {
        self.call(CMD_CLOSE, None).map(drop)
    }
}
