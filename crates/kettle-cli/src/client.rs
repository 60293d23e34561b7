//! Daemon client

use kettle_core::protocol::{self, Request, Response};
use std::io;
use std::path::Path;
use tokio::net::UnixStream;

pub struct Client {
    stream: UnixStream,
}

impl Client {
    pub async fn connect(socket: &Path) -> io::Result<Self> {
        tracing::debug!(socket = ?socket, "connecting to kettled");
        let stream = UnixStream::connect(socket).await.map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("cannot reach kettled at {}: {e}", socket.display()),
            )
        })?;
        Ok(Self { stream })
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, request: &Request) -> io::Result<Response> {
        protocol::write_frame(&mut self.stream, request).await?;
        let response = protocol::read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "daemon closed the connection"))?;
        tracing::trace!(?response, "daemon replied");
        Ok(response)
    }
}
