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

//! Common types shared by Hydra transports
//!
//! Server management calls never return an error to the caller. Every
//! outcome, good or bad, is folded into an [`OperationResult`] that names the
//! operation, whether it succeeded, and a human-readable message.

use std::fmt;

/// Management or exchange operation a result belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// Starting every configured channel
    StartServer,
    /// Stopping every running channel
    StopServer,
    /// Stop followed by start
    RestartServer,
    /// Writing a payload to a single client
    SendDataToClient,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartServer => write!(f, "start"),
            Self::StopServer => write!(f, "stop"),
            Self::RestartServer => write!(f, "restart"),
            Self::SendDataToClient => write!(f, "send"),
        }
    }
}

/// Outcome of a server management or send operation
///
/// A plain value: it is returned once to the caller and not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    /// Which operation produced this result
    pub operation: OperationType,
    /// Whether the operation succeeded
    pub success: bool,
    /// Human-readable detail, empty on most successes
    pub message: String,
}

impl OperationResult {
    /// Successful result with an empty message
    pub fn ok(operation: OperationType) -> Self {
        Self {
            operation,
            success: true,
            message: String::new(),
        }
    }

    /// Failed result carrying the reason
    pub fn failure(operation: OperationType, message: impl Into<String>) -> Self {
        Self {
            operation,
            success: false,
            message: message.into(),
        }
    }

    /// Re-tag this result as belonging to another operation
    pub fn as_operation(self, operation: OperationType) -> Self {
        Self { operation, ..self }
    }

    /// Check if the operation succeeded
    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "ok" } else { "failed" };
        if self.message.is_empty() {
            write!(f, "{} {}", self.operation, status)
        } else {
            write!(f, "{} {}: {}", self.operation, status, self.message)
        }
    }
}
