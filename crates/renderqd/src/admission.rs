//! Accept-and-enqueue step run for every new connection.
//!
//! Admission never reads from the client. It only registers the socket,
//! queues it and writes the `QUEUED:` acknowledgement, so a slow client
//! cannot hold up the listener or other admissions.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use tracing::{info, warn};

use renderq_protocol::ServerMessage;
use renderq_protocol::response::NOT_ACCEPTING;

use crate::job::JobStatus;
use crate::lifecycle::{
    ConnectionRegistry, RegistrationError, ShutdownToken, notify_and_close,
};
use crate::queue::{JobQueue, PushError, QueuedConnection};
use crate::transport::ConnectionHandler;

const ADMISSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::admission");
const QUEUE_FULL: &str = "Render queue is full.";

/// Connection handler feeding the job queue.
pub(crate) struct AdmissionHandler {
    queue: Arc<JobQueue>,
    registry: Arc<ConnectionRegistry>,
    token: ShutdownToken,
}

impl AdmissionHandler {
    pub(crate) fn new(
        queue: Arc<JobQueue>,
        registry: Arc<ConnectionRegistry>,
        token: ShutdownToken,
    ) -> Self {
        Self {
            queue,
            registry,
            token,
        }
    }

    fn refuse(mut stream: TcpStream, peer: SocketAddr) {
        info!(target: ADMISSION_TARGET, %peer, "connection refused during shutdown");
        notify_and_close(&mut stream, NOT_ACCEPTING);
    }
}

impl ConnectionHandler for AdmissionHandler {
    fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        if self.token.is_cancelled() {
            Self::refuse(stream, peer);
            return;
        }
        let id = match self.registry.register(&stream) {
            Ok(id) => id,
            Err(RegistrationError::Closed) => {
                Self::refuse(stream, peer);
                return;
            }
            Err(error) => {
                warn!(target: ADMISSION_TARGET, %peer, error = %error, "failed to register connection");
                return;
            }
        };

        let connection = QueuedConnection::new(id, stream, peer);
        let result = self.queue.enqueue(connection, |stream, ticket| {
            ServerMessage::Queued {
                position: ticket.position,
            }
            .write_to(stream)
        });
        match result {
            Ok(ticket) => info!(
                target: ADMISSION_TARGET,
                %peer,
                connection = %id,
                position = ticket.position,
                ahead = ticket.ahead(),
                status = %JobStatus::Queued,
                "job admitted"
            ),
            Err(PushError::Full {
                capacity,
                mut connection,
            }) => {
                self.registry.unregister(id);
                warn!(target: ADMISSION_TARGET, %peer, capacity, "render queue full; connection rejected");
                notify_and_close(&mut connection.stream, QUEUE_FULL);
            }
            Err(PushError::Acknowledge { source, .. }) => {
                self.registry.unregister(id);
                warn!(
                    target: ADMISSION_TARGET,
                    %peer,
                    error = %source,
                    "client went away before admission was acknowledged"
                );
            }
        }
    }
}
