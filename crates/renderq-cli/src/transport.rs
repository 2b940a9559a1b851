//! TCP connection to the render server.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::AppError;

pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn connect(host: &str, port: u16) -> Result<TcpStream, AppError> {
    let endpoint = format!("{host}:{port}");
    let address = (host, port)
        .to_socket_addrs()
        .map_err(|source| AppError::Resolve {
            endpoint: endpoint.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| AppError::ResolveEmpty {
            endpoint: endpoint.clone(),
        })?;
    TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT)
        .map_err(|source| AppError::Connect { endpoint, source })
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn connects_to_listening_server() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();
        connect("127.0.0.1", port).expect("connect");
    }

    #[test]
    fn refused_connection_names_the_endpoint() {
        let port = {
            let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let error = connect("127.0.0.1", port).expect_err("nothing listening");
        assert!(
            error.to_string().contains(&format!("127.0.0.1:{port}")),
            "{error}"
        );
    }
}
