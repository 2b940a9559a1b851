//! Connection handling abstraction for the daemon listener.

use std::net::{SocketAddr, TcpStream};

/// Handles accepted socket connections.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Handles a single connection. Implementations should avoid panicking
    /// and must not block on job work.
    fn handle(&self, stream: TcpStream, peer: SocketAddr);
}
