//! Single TCP connect probe.
use log::{debug, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::{io, net::TcpStream, time};

use crate::services;

/// Outcome of one connect attempt.
///
/// An open probe hands back the live stream so the caller can capture a
/// banner on it; dropping the outcome closes the socket.
#[derive(Debug)]
pub enum Connection {
    Open { stream: TcpStream, service: String },
    Closed,
}

impl Connection {
    pub fn is_open(&self) -> bool {
        matches!(self, Connection::Open { .. })
    }
}

/// Performs the connection to the socket with timeout.
pub async fn connect(socket: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    time::timeout(timeout, async move { TcpStream::connect(socket).await }).await?
}

/// Attempts a TCP connection to `socket`.
///
/// Refused, unreachable, timed out and every other socket error all count as
/// closed. The service name is looked up only for open ports and falls back to
/// `"unknown"`.
pub async fn probe(socket: SocketAddr, timeout: Duration) -> Connection {
    match connect(socket, timeout).await {
        Ok(stream) => {
            debug!("Connection to {socket} was successful");
            Connection::Open {
                stream,
                service: services::service_name(socket.port()),
            }
        }
        Err(e) => {
            if e.to_string().to_lowercase().contains("too many open files") {
                warn!("Too many open files while probing {socket}. Reduce the batch size.");
            } else {
                debug!("Probe {socket} closed: {e}");
            }
            Connection::Closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_port_is_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let outcome = probe(addr, Duration::from_millis(500)).await;
        assert!(outcome.is_open());
    }

    #[tokio::test]
    async fn refused_port_is_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = probe(addr, Duration::from_millis(500)).await;
        assert!(!outcome.is_open());
    }

    #[tokio::test]
    async fn unroutable_address_times_out_as_closed() {
        // TEST-NET-1 is reserved and never answers.
        let addr: SocketAddr = "192.0.2.1:80".parse().unwrap();

        let outcome = probe(addr, Duration::from_millis(50)).await;
        assert!(!outcome.is_open());
    }
}
