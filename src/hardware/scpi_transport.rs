//! SCPI transports
//!
//! Line-oriented SCPI command/query plumbing underneath the scope driver.
//! Each command is one newline-terminated line; a query reads one line back.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Byte-level access to a SCPI instrument
#[async_trait]
pub trait ScpiTransport: Send {
    /// Send command without expecting response
    async fn write(&mut self, cmd: &str) -> Result<()>;

    /// Send command and read one response line (trimmed)
    async fn query(&mut self, cmd: &str) -> Result<String>;

    /// Link description for logs
    fn describe(&self) -> String;
}

/// Raw SCPI over a TCP socket (the scope's "socket server", usually port 4000
/// on Tektronix or 5025 on most other vendors).
pub struct TcpTransport {
    address: String,
    timeout: Duration,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TcpTransport {
    /// Connect to `host:port`; `timeout` bounds the connect and every later operation
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .with_context(|| format!("Timed out connecting to {}", address))?
            .with_context(|| format!("Failed to connect to {}", address))?;
        stream
            .set_nodelay(true)
            .context("Failed to set TCP_NODELAY")?;

        let (read_half, write_half) = stream.into_split();
        debug!("SCPI socket connected to {}", address);
        Ok(Self {
            address: address.to_string(),
            timeout,
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    /// Bound on connect and on every line sent or read
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send_line(&mut self, cmd: &str) -> Result<()> {
        let line = format!("{}\n", cmd);
        tokio::time::timeout(self.timeout, async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.flush().await
        })
        .await
        .with_context(|| format!("Timed out writing: {}", cmd))?
        .with_context(|| format!("Failed to write: {}", cmd))
    }
}

#[async_trait]
impl ScpiTransport for TcpTransport {
    async fn write(&mut self, cmd: &str) -> Result<()> {
        self.send_line(cmd).await
    }

    async fn query(&mut self, cmd: &str) -> Result<String> {
        self.send_line(cmd).await?;

        let mut response = String::new();
        let read = tokio::time::timeout(self.timeout, self.reader.read_line(&mut response))
            .await
            .with_context(|| format!("Timed out waiting for response to: {}", cmd))?
            .with_context(|| format!("Failed to read response to: {}", cmd))?;
        if read == 0 {
            bail!("Connection to {} closed while waiting for: {}", self.address, cmd);
        }
        Ok(response.trim().to_string())
    }

    fn describe(&self) -> String {
        format!(
            "TcpTransport({} @ {}ms timeout)",
            self.address,
            self.timeout.as_millis()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal socket server: answers `*IDN?` and `*OPC?`, records everything else.
    async fn spawn_fake_scope() -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut received = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                match line.as_str() {
                    "*IDN?" => write_half
                        .write_all(b"TEKTRONIX,MSO24,C000001,CF:91.1CT FV:1.42.0.219\n")
                        .await
                        .unwrap(),
                    "*OPC?" => write_half.write_all(b"1\n").await.unwrap(),
                    _ => {}
                }
                received.push(line);
            }
            received
        });
        (address, handle)
    }

    #[tokio::test]
    async fn test_query_and_write_round_trip() {
        let (address, server) = spawn_fake_scope().await;
        let mut transport = TcpTransport::connect(&address, Duration::from_secs(2))
            .await
            .unwrap();

        let idn = transport.query("*IDN?").await.unwrap();
        assert!(idn.starts_with("TEKTRONIX,MSO24"));
        transport.write("afg:freq 1000").await.unwrap();
        assert_eq!(transport.query("*OPC?").await.unwrap(), "1");
        assert!(transport.describe().contains(&address));

        drop(transport);
        let received = server.await.unwrap();
        assert_eq!(received, vec!["*IDN?", "afg:freq 1000", "*OPC?"]);
    }

    #[tokio::test]
    async fn test_query_times_out_without_response() {
        let (address, _server) = spawn_fake_scope().await;
        let mut transport = TcpTransport::connect(&address, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(transport.timeout(), Duration::from_millis(100));

        let err = transport.query("CH1:SCAle?").await.unwrap_err();
        assert!(format!("{:#}", err).contains("Timed out"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpTransport::connect(&address, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
