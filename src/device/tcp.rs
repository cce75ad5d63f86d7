//! P1 over TCP, e.g. through a ser2net bridge or a P1 WiFi dongle.

use async_trait::async_trait;
use log::debug;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::constants::TCP_CONNECT_TIMEOUT;
use crate::device::port::{MeterPort, PortError, PortErrorKind, PortStream};

#[derive(Debug, Clone)]
pub struct TcpMeterPort {
    host: String,
    port: u16,
}

impl TcpMeterPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl MeterPort for TcpMeterPort {
    async fn open(&mut self) -> Result<PortStream, PortError> {
        debug!("Connecting to {}:{}", self.host, self.port);
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let stream = timeout(TCP_CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| {
                PortError::new(
                    PortErrorKind::Error,
                    format!("connect to {}:{} timed out", self.host, self.port),
                )
            })??;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    async fn close(&mut self) {
        debug!("Disconnecting from {}:{}", self.host, self.port);
    }

    /// The bridge fixes the line speed.
    fn switch_speed(&mut self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"/ISK5\r\n").await.unwrap();
        });

        let mut port = TcpMeterPort::new("127.0.0.1", addr.port());
        assert_eq!(port.describe(), format!("tcp://127.0.0.1:{}", addr.port()));
        let mut stream = port.open().await.unwrap();
        let mut buf = [0u8; 7];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"/ISK5\r\n");
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port_number = listener.local_addr().unwrap().port();
        drop(listener);

        let mut port = TcpMeterPort::new("127.0.0.1", port_number);
        let err = port.open().await.err().unwrap();
        assert_eq!(err.kind, PortErrorKind::Error);
    }
}
