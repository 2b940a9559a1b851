use std::io::Write;
use std::net::{SocketAddr, TcpStream};

use tracing::info;

use renderq_protocol::ServerMessage;

use crate::worker::WORKER_TARGET;

/// Write side of a client connection during a job.
///
/// The first failed write marks the client as gone; later writes are skipped
/// so the job can run to completion without a listener.
#[derive(Debug)]
pub(crate) struct ClientChannel<'a> {
    stream: &'a mut TcpStream,
    peer: SocketAddr,
    connected: bool,
}

impl<'a> ClientChannel<'a> {
    pub(crate) fn new(stream: &'a mut TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            connected: true,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    /// Sends a protocol message.
    pub(crate) fn send(&mut self, message: ServerMessage<'_>) {
        if self.connected && message.write_to(&mut *self.stream).is_err() {
            self.disconnected();
        }
    }

    /// Forwards one engine output line verbatim, restoring its newline.
    pub(crate) fn forward_line(&mut self, line: &[u8]) {
        if !self.connected {
            return;
        }
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line);
        framed.push(b'\n');
        if self.stream.write_all(&framed).is_err() {
            self.disconnected();
        }
    }

    fn disconnected(&mut self) {
        self.connected = false;
        info!(
            target: WORKER_TARGET,
            peer = %self.peer,
            "client disconnected; engine output will be drained without forwarding"
        );
    }
}
