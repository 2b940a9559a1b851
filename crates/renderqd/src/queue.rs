//! FIFO of admitted connections waiting for a worker.
//!
//! The queue is the only point where admission threads and workers meet.
//! Positions are computed under the same lock as the push, so two clients
//! admitted concurrently never report the same position.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::lifecycle::ConnectionId;

/// Admitted connection whose header has not been read yet.
#[derive(Debug)]
pub(crate) struct QueuedConnection {
    pub(crate) id: ConnectionId,
    pub(crate) stream: TcpStream,
    pub(crate) peer: SocketAddr,
    pub(crate) arrived_at: Instant,
}

impl QueuedConnection {
    pub(crate) fn new(id: ConnectionId, stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            id,
            stream,
            peer,
            arrived_at: Instant::now(),
        }
    }
}

/// Result of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueTicket {
    /// 1-based position at admission time.
    pub(crate) position: usize,
}

impl QueueTicket {
    /// Connections queued ahead of this one when it was admitted.
    pub(crate) fn ahead(self) -> usize {
        self.position.saturating_sub(1)
    }
}

/// Reasons a connection was not queued. The connection is handed back.
#[derive(Debug, Error)]
pub(crate) enum PushError {
    #[error("render queue is full ({capacity} waiting)")]
    Full {
        capacity: usize,
        connection: Box<QueuedConnection>,
    },
    #[error("failed to acknowledge admission: {source}")]
    Acknowledge {
        #[source]
        source: io::Error,
        connection: Box<QueuedConnection>,
    },
}

/// Blocking FIFO with an optional capacity.
#[derive(Debug)]
pub(crate) struct JobQueue {
    items: Mutex<VecDeque<QueuedConnection>>,
    available: Condvar,
    capacity: Option<usize>,
}

impl JobQueue {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Appends `connection` and runs `acknowledge` with its ticket while the
    /// queue is still locked, so the acknowledgement reaches the client
    /// before any worker can dequeue it.
    ///
    /// When `acknowledge` fails the connection is removed again.
    pub(crate) fn enqueue<F>(
        &self,
        mut connection: QueuedConnection,
        acknowledge: F,
    ) -> Result<QueueTicket, PushError>
    where
        F: FnOnce(&mut TcpStream, QueueTicket) -> io::Result<()>,
    {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(capacity) = self.capacity
            && items.len() >= capacity
        {
            return Err(PushError::Full {
                capacity,
                connection: Box::new(connection),
            });
        }
        let ticket = QueueTicket {
            position: items.len() + 1,
        };
        if let Err(source) = acknowledge(&mut connection.stream, ticket) {
            return Err(PushError::Acknowledge {
                source,
                connection: Box::new(connection),
            });
        }
        items.push_back(connection);
        drop(items);
        self.available.notify_one();
        Ok(ticket)
    }

    /// Appends `connection` without acknowledging it.
    #[cfg(test)]
    pub(crate) fn push(&self, connection: QueuedConnection) -> Result<QueueTicket, PushError> {
        self.enqueue(connection, |_, _| Ok(()))
    }

    /// Waits up to `timeout` for the next connection.
    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Option<QueuedConnection> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut items, _) = self
            .available
            .wait_timeout_while(items, timeout, |items| items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        items.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Removes every waiting connection in arrival order.
    pub(crate) fn drain(&self) -> Vec<QueuedConnection> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}
