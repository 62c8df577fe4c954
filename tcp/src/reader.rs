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

//! Payload boundary detection
//!
//! The wire format carries no length prefix and no delimiter. The default
//! [`ShortReadReader`] treats the first read that returns fewer bytes than
//! requested as the end of a logical message:
//!
//! ```text
//! read 8192 ──full──▶ read 1024 ──full──▶ read 1024 ──short──▶ payload
//!    │
//!    └──short──▶ payload
//! ```
//!
//! This is a heuristic. A message whose length lands exactly on a chunk
//! boundary waits for the next read (bounded by the read timeout), and a
//! sender that trickles bytes slower than the scheduler polls will be split
//! into several payloads. Protocols that need exact boundaries should plug in
//! their own [`PayloadReader`].

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// Turns a byte stream into discrete payloads
#[async_trait]
pub trait PayloadReader: Send + Sync + 'static {
    /// Read one payload from the stream
    ///
    /// Returns `Ok(None)` when the peer closed the stream before sending
    /// anything and `Ok(Some(vec![]))` when no data arrived in time.
    async fn read_payload(
        &self,
        stream: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<Option<Vec<u8>>>;
}

/// Short-read-ends-message reader
#[derive(Debug, Clone)]
pub struct ShortReadReader {
    initial_chunk: usize,
    growth_chunk: usize,
    read_timeout: Duration,
}

impl Default for ShortReadReader {
    fn default() -> Self {
        Self::new(8192, 1024, Duration::from_millis(50))
    }
}

impl ShortReadReader {
    /// Create a reader with explicit chunk sizes and per-read timeout
    pub fn new(initial_chunk: usize, growth_chunk: usize, read_timeout: Duration) -> Self {
        Self {
            initial_chunk: initial_chunk.max(1),
            growth_chunk: growth_chunk.max(1),
            read_timeout,
        }
    }
}

#[async_trait]
impl PayloadReader for ShortReadReader {
    async fn read_payload(
        &self,
        stream: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<Option<Vec<u8>>> {
        let mut buffer = vec![0u8; self.initial_chunk];
        let mut total = 0;
        let mut requested = self.initial_chunk;

        loop {
            let read = match timeout(self.read_timeout, stream.read(&mut buffer[total..])).await {
                // EOF before the first byte of a payload
                Ok(Ok(0)) if total == 0 => return Ok(None),
                Ok(result) => result?,
                // Nothing more arrived in time; whatever we have is the message
                Err(_) => 0,
            };

            total += read;
            if read < requested {
                buffer.truncate(total);
                return Ok(Some(buffer));
            }

            requested = self.growth_chunk;
            buffer.resize(total + requested, 0);
        }
    }
}
