//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Error types for the multi-channel server

use crate::types::{ChannelId, ClientId};
use thiserror::Error;

/// Result type for operations
pub type Result<T> = std::result::Result<T, HydraError>;

/// Server error types
#[derive(Debug, Error)]
pub enum HydraError {
    /// I/O error from a listener or client socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error from rustls
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Certificate bundle could not be read or parsed
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Client with the given ID was not found
    #[error("Client with id `{0}` not found")]
    ClientNotFound(ClientId),

    /// Channel with the given ID was not found
    #[error("Channel {0} not found")]
    ChannelNotFound(ChannelId),

    /// Channel is already running
    #[error("Server channel \"{0}\" is running, first Stop it and then run Start again")]
    ChannelAlreadyRunning(ChannelId),

    /// Connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// TLS handshake did not finish in time
    #[error("TLS handshake timed out")]
    HandshakeTimeout,

    /// Client did not drain a write in time
    #[error("Write to client timed out")]
    WriteTimeout,

    /// Server is not running
    #[error("Server not running")]
    ServerNotRunning,

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl HydraError {
    /// Check if the error is recoverable
    ///
    /// Recoverable errors are those where retrying the operation later might
    /// succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HydraError::HandshakeTimeout
                | HydraError::WriteTimeout
                | HydraError::ConnectionClosed
                | HydraError::Io(_)
        )
    }

    /// Check if the error is tied to a single client connection
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            HydraError::ClientNotFound(_)
                | HydraError::ConnectionClosed
                | HydraError::HandshakeTimeout
                | HydraError::WriteTimeout
                | HydraError::Tls(_)
                | HydraError::Io(_)
        )
    }
}
