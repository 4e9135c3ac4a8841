use thiserror::Error;

/// Errors raised by the protocol engine.
///
/// Codec and protocol errors on a single inbound packet never reach application code: they
///  are logged at the channel / connection boundary and the packet is discarded.
#[derive(Debug, Error)]
pub enum RudpError {
    /// a write would exceed the writer's fixed capacity
    #[error("buffer capacity exceeded: {requested_bits} bits requested, {available_bits} available")]
    Capacity {
        requested_bits: usize,
        available_bits: usize,
    },

    /// a read would go past the end of the input
    #[error("read past end of buffer: {requested_bits} bits requested, {available_bits} available")]
    Format {
        requested_bits: usize,
        available_bits: usize,
    },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("connection timed out")]
    ConnectionTimeout,

    #[error("connection is not open")]
    NotConnected,
}

impl RudpError {
    pub fn protocol(msg: impl Into<String>) -> RudpError {
        RudpError::Protocol(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> RudpError {
        RudpError::Configuration(msg.into())
    }
}

pub type RudpResult<T> = Result<T, RudpError>;
