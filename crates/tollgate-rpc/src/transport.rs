use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::{AgentAddress, RpcError};

/// Socket timeout used when none (or zero) is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest reply read from the agent in one call. Longer replies fail to
/// decode and count as no reply.
pub const MAX_REPLY_BYTES: usize = 4096;

/// One-shot stream connection to the agent.
///
/// Each [`round_trip`](Self::round_trip) connects, sends one frame, reads one
/// frame and drops the connection on every exit path. Connect, send and
/// receive are each bounded by the timeout.
#[derive(Debug, Clone)]
pub struct AgentTransport {
    address: AgentAddress,
    timeout: Duration,
}

impl AgentTransport {
    /// A zero timeout is replaced with [`DEFAULT_TIMEOUT`].
    pub fn new(address: AgentAddress, timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        Self { address, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends `frame` and returns the raw reply bytes.
    pub async fn round_trip(&self, frame: &[u8]) -> Result<Vec<u8>, RpcError> {
        match &self.address {
            AgentAddress::Tcp(host, port) => {
                let stream = self
                    .connect(TcpStream::connect((host.as_str(), *port)))
                    .await?;
                self.exchange(stream, frame).await
            }
            #[cfg(unix)]
            AgentAddress::Unix(path) => {
                let stream = self
                    .connect(tokio::net::UnixStream::connect(path))
                    .await?;
                self.exchange(stream, frame).await
            }
            #[cfg(not(unix))]
            AgentAddress::Unix(_) => Err(RpcError::Connect {
                address: self.address.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::Unsupported),
            }),
        }
    }

    async fn connect<S>(
        &self,
        connecting: impl Future<Output = std::io::Result<S>>,
    ) -> Result<S, RpcError> {
        timeout(self.timeout, connecting)
            .await
            .map_err(|_| RpcError::Timeout("connect"))?
            .map_err(|source| RpcError::Connect {
                address: self.address.to_string(),
                source,
            })
    }

    async fn exchange<S>(&self, mut stream: S, frame: &[u8]) -> Result<Vec<u8>, RpcError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        timeout(self.timeout, stream.write_all(frame))
            .await
            .map_err(|_| RpcError::Timeout("send"))??;

        let mut reply = vec![0u8; MAX_REPLY_BYTES];
        let n = timeout(self.timeout, stream.read(&mut reply))
            .await
            .map_err(|_| RpcError::Timeout("receive"))??;
        if n == 0 {
            return Err(RpcError::Closed);
        }
        reply.truncate(n);
        Ok(reply)
    }
}
