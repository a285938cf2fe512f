// rust/roles-core/src/rendezvous/tcp.rs

//! Client for the `roles-rendezvous` TCP store.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::protocol::{decode_frame, encode_frame, read_frame, StoreRequest, StoreResponse, MAX_FRAME_LEN};
use super::RendezvousStore;
use crate::config::RendezvousConfig;
use crate::error::{Result, RoleError};
use crate::retry::{retry_async, RetryConfig, RetryResult};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    // Set while a request awaits its response.
    in_flight: bool,
}

/// Rendezvous store client over a single TCP connection.
///
/// Requests are serialized on the connection; the store is only used during
/// startup, so one connection per worker is enough.
pub struct TcpStoreClient {
    address: String,
    conn: Mutex<Connection>,
}

impl TcpStoreClient {
    /// Connect to the store at `address`.
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address).await.map_err(|e| {
            RoleError::rendezvous_with_source(
                format!("failed to connect to rendezvous store at {}", address),
                e,
            )
        })?;
        stream.set_nodelay(true).map_err(|e| {
            RoleError::rendezvous_with_source("failed to configure rendezvous connection", e)
        })?;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            address: address.to_string(),
            conn: Mutex::new(Connection {
                reader: BufReader::new(read_half),
                writer: write_half,
                in_flight: false,
            }),
        })
    }

    /// Connect with retry logic.
    ///
    /// Workers usually start before or alongside the store, so refused
    /// connections are retried with backoff.
    pub async fn connect_with_retry(address: &str, config: &RendezvousConfig) -> Result<Self> {
        let retry = RetryConfig::connect(config);
        retry_async(&retry, || async move {
            match Self::connect(address).await {
                Ok(client) => RetryResult::Ok(client),
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "Rendezvous store not reachable yet");
                    RetryResult::Retry(e)
                }
            }
        })
        .await
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sends one request and reads its response.
    ///
    /// Not cancel safe. A request dropped after its frame was written leaves
    /// the response unread, and every later request on this client fails
    /// instead of reading it. The same holds after an I/O error.
    async fn request(&self, request: StoreRequest) -> Result<StoreResponse> {
        let frame = encode_frame(&request)?;
        let mut conn = self.conn.lock().await;
        if conn.in_flight {
            return Err(RoleError::rendezvous(format!(
                "connection to {} is out of sync after an interrupted request",
                self.address
            )));
        }
        conn.in_flight = true;

        conn.writer.write_all(&frame).await.map_err(|e| {
            RoleError::rendezvous_with_source("failed to send rendezvous request", e)
        })?;

        let mut line = String::new();
        let read = read_frame(&mut conn.reader, &mut line, MAX_FRAME_LEN)
            .await
            .map_err(|e| RoleError::rendezvous_with_source("failed to read rendezvous response", e))?;
        if read == 0 {
            return Err(RoleError::rendezvous(format!(
                "rendezvous store at {} closed the connection",
                self.address
            )));
        }
        conn.in_flight = false;

        let response: StoreResponse = decode_frame(&line)?;
        if let StoreResponse::Error { message } = response {
            return Err(RoleError::rendezvous(format!(
                "store rejected request for '{}': {}",
                request.key(),
                message
            )));
        }
        Ok(response)
    }
}

fn unexpected(response: StoreResponse) -> RoleError {
    RoleError::rendezvous(format!("unexpected rendezvous response: {:?}", response))
}

#[async_trait]
impl RendezvousStore for TcpStoreClient {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let request = StoreRequest::Put {
            key: key.to_string(),
            value: value.to_vec(),
        };
        match self.request(request).await? {
            StoreResponse::Ok => Ok(()),
            StoreResponse::KeyExists { key } => Err(RoleError::key_exists(key)),
            other => Err(unexpected(other)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let request = StoreRequest::Get { key: key.to_string() };
        match self.request(request).await? {
            StoreResponse::Value { value } => Ok(value.map(Bytes::from)),
            other => Err(unexpected(other)),
        }
    }

    async fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let request = StoreRequest::Add {
            key: key.to_string(),
            delta,
        };
        match self.request(request).await? {
            StoreResponse::Counter { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }
}
