use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use renderq_protocol::ServerMessage;

use super::LIFECYCLE_TARGET;

const NOTICE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DISCARD_LIMIT: usize = 1024 * 1024;

/// Identifier assigned to a registered client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "conn-{}", self.0)
    }
}

/// Reasons a connection could not be registered.
#[derive(Debug, Error)]
pub(crate) enum RegistrationError {
    #[error("connection registry is closed")]
    Closed,
    #[error("failed to duplicate connection handle: {source}")]
    Clone {
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, TcpStream>,
    closed: bool,
}

/// Set of live client connections that have not yet been fully answered.
#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a handle to `stream` and returns its identifier.
    pub(crate) fn register(&self, stream: &TcpStream) -> Result<ConnectionId, RegistrationError> {
        let handle = stream
            .try_clone()
            .map_err(|source| RegistrationError::Clone { source })?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(RegistrationError::Closed);
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        state.connections.insert(id, handle);
        Ok(id)
    }

    /// Forgets `id`. Unknown identifiers are ignored.
    pub(crate) fn unregister(&self, id: ConnectionId) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .connections
            .remove(&id);
    }

    /// Sends `message` as an error line to every registered connection, shuts
    /// each one down and refuses further registrations. Returns the number of
    /// connections notified.
    pub(crate) fn broadcast_and_close_all(&self, message: &str) -> usize {
        let connections: Vec<(ConnectionId, TcpStream)> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.closed = true;
            state.connections.drain().collect()
        };
        let count = connections.len();
        for (id, mut stream) in connections {
            notify_and_close(&mut stream, message);
            debug!(target: LIFECYCLE_TARGET, connection = %id, "connection closed for shutdown");
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .connections
            .len()
    }
}

/// Best-effort error line followed by a full socket shutdown.
///
/// Input the client already sent is discarded before closing so the notice
/// is not lost to a connection reset.
pub(crate) fn notify_and_close(stream: &mut TcpStream, message: &str) {
    let _ = stream.set_write_timeout(Some(NOTICE_WRITE_TIMEOUT));
    let _ = ServerMessage::Error(message).write_to(stream);
    let _ = stream.shutdown(Shutdown::Write);
    discard_unread(stream);
    let _ = stream.shutdown(Shutdown::Read);
}

fn discard_unread(stream: &mut TcpStream) {
    if stream.set_nonblocking(true).is_err() {
        return;
    }
    let mut sink = [0_u8; 4096];
    let mut discarded = 0;
    while discarded < DISCARD_LIMIT {
        match stream.read(&mut sink) {
            Ok(read) if read > 0 => discarded += read,
            _ => break,
        }
    }
}
