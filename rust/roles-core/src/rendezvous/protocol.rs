// rust/roles-core/src/rendezvous/protocol.rs

//! Wire protocol of the TCP rendezvous store.
//!
//! Each request and each response is one JSON object terminated by a
//! newline. A connection carries any number of request/response pairs in
//! strict alternation. Frames longer than [`MAX_FRAME_LEN`] bytes, newline
//! included, are rejected.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::RendezvousStore;
use crate::error::{Result, RoleError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreRequest {
    Put { key: String, value: Vec<u8> },
    Get { key: String },
    Add { key: String, delta: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoreResponse {
    Ok,
    Value { value: Option<Vec<u8>> },
    Counter { value: i64 },
    KeyExists { key: String },
    Error { message: String },
}

impl StoreRequest {
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Get { key } | Self::Add { key, .. } => key,
        }
    }

    /// Executes the request against a local store and builds the response
    /// the server sends back.
    pub async fn apply(self, store: &dyn RendezvousStore) -> StoreResponse {
        let result = match self {
            Self::Put { key, value } => store.put(&key, Bytes::from(value)).await.map(|()| StoreResponse::Ok),
            Self::Get { key } => store
                .get(&key)
                .await
                .map(|value| StoreResponse::Value { value: value.map(|v| v.to_vec()) }),
            Self::Add { key, delta } => store
                .add(&key, delta)
                .await
                .map(|value| StoreResponse::Counter { value }),
        };

        match result {
            Ok(response) => response,
            Err(RoleError::KeyExists { key }) => StoreResponse::KeyExists { key },
            Err(e) => StoreResponse::Error { message: e.to_string() },
        }
    }
}

/// Default upper bound on the length of one frame.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Reads one frame into `line`, which is cleared first.
///
/// Returns the number of bytes read; 0 means the peer closed the
/// connection. Fails with `InvalidData` once more than `limit` bytes arrive
/// without a newline, leaving the stream positioned mid-frame.
pub async fn read_frame<R>(reader: &mut R, line: &mut String, limit: usize) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = (&mut *reader).take(limit as u64 + 1).read_line(line).await?;
    if read > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame exceeds {} bytes", limit),
        ));
    }
    Ok(read)
}

/// Serializes one frame, including the trailing newline.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(message)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Parses one frame; surrounding whitespace, including the newline, is ignored.
pub fn decode_frame<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T> {
    Ok(serde_json::from_str(line.trim())?)
}
