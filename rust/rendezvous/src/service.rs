//! TCP front end for the rendezvous store.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use roles_core::rendezvous::protocol::{
    decode_frame, encode_frame, read_frame, StoreRequest, StoreResponse, MAX_FRAME_LEN,
};
use roles_core::InMemoryStore;

pub struct StoreService {
    store: InMemoryStore,
    connections: AtomicU64,
    max_frame_len: usize,
}

impl StoreService {
    pub fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            connections: AtomicU64::new(0),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Overrides the longest request frame accepted. A client sending a
    /// longer one gets an error response and is disconnected.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Total number of connections accepted so far.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Accepts connections until `shutdown` completes.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> std::io::Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    self.connections.fetch_add(1, Ordering::Relaxed);
                    let service = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = service.handle_connection(stream, peer).await {
                            tracing::warn!(peer = %peer, error = %e, "Connection failed");
                        }
                    });
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutting down rendezvous store...");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> std::io::Result<()> {
        stream.set_nodelay(true)?;
        tracing::debug!(peer = %peer, "Client connected");

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            match read_frame(&mut reader, &mut line, self.max_frame_len).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    tracing::warn!(peer = %peer, error = %e, "Dropping client after bad frame");
                    let response = StoreResponse::Error { message: e.to_string() };
                    if let Ok(frame) = encode_frame(&response) {
                        write_half.write_all(&frame).await?;
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            let response = match decode_frame::<StoreRequest>(&line) {
                Ok(request) => {
                    tracing::trace!(peer = %peer, key = %request.key(), "Request");
                    request.apply(&self.store).await
                }
                Err(e) => StoreResponse::Error {
                    message: e.to_string(),
                },
            };
            let frame = encode_frame(&response)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            write_half.write_all(&frame).await?;
        }

        tracing::debug!(peer = %peer, "Client disconnected");
        Ok(())
    }
}
