//! Plain TCP tunnel connections
//!
//! Suitable when the proxy side is a local relay that already terminates the
//! CONNECT handshake and TLS; this connector only moves bytes.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::transport::{TransportError, TunnelConnection, TunnelConnector};

/// Opens tokio TCP streams
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

#[async_trait]
impl TunnelConnector for TcpConnector {
    async fn open(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Box<dyn TunnelConnection>, TransportError> {
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::Timeout(connect_timeout))?
            .map_err(|e| TransportError::Connect(format!("{}:{}: {}", host, port, e)))?;
        stream.set_nodelay(true)?;

        debug!("Tunnel connected to {}:{}", host, port);
        Ok(Box::new(TcpConnection { stream }))
    }
}

/// An open TCP tunnel
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

#[async_trait]
impl TunnelConnection for TcpConnection {
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.stream
            .write(data)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn read(&mut self, buf: &mut [u8], read_timeout: Duration) -> Result<usize, TransportError> {
        timeout(read_timeout, self.stream.read(buf))
            .await
            .map_err(|_| TransportError::Timeout(read_timeout))?
            .map_err(|e| TransportError::Read(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Tunnel shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"pong").await.unwrap();
            buf
        });

        let mut conn = TcpConnector
            .open("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(conn.write(b"ping").await.unwrap(), 4);

        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf, Duration::from_secs(5)).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
        conn.close().await;

        assert_eq!(&server.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut conn = TcpConnector
            .open("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let result = conn.read(&mut buf, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // bind then drop to get a port with no listener
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = TcpConnector.open("127.0.0.1", port, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
