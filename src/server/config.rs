//! Server configuration.

use crate::connection::buffer::{
    BufferLimits, DEFAULT_READ_BUFFER_SIZE, DEFAULT_SEND_BUFFER_SIZE,
};
use thiserror::Error;

/// Smallest buffer the server accepts; every fixed reply must fit.
pub const MIN_BUFFER_SIZE: usize = 64;

/// Invalid configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} buffer of {size} bytes is below the minimum of {min}", min = MIN_BUFFER_SIZE)]
    BufferTooSmall { name: &'static str, size: usize },
}

/// Settings for a TreeKV server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Capacity of each connection's read buffer
    pub read_buffer_size: usize,
    /// Capacity of each connection's send buffer
    pub send_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Buffer capacities handed to each connection.
    pub fn limits(&self) -> BufferLimits {
        BufferLimits {
            read: self.read_buffer_size,
            send: self.send_buffer_size,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::BufferTooSmall {
                name: "read",
                size: self.read_buffer_size,
            });
        }
        if self.send_buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::BufferTooSmall {
                name: "send",
                size: self.send_buffer_size,
            });
        }
        Ok(())
    }
}
