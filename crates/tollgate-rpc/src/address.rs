use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default agent socket path.
pub const DEFAULT_AGENT_SOCKET: &str = "/var/run/sigsci.sock";

/// Where the agent listens.
///
/// In configuration files a two-element array `["host", port]` selects TCP
/// and a plain string selects a Unix domain socket path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AgentAddress {
    Tcp(String, u16),
    Unix(PathBuf),
}

impl Default for AgentAddress {
    fn default() -> Self {
        Self::Unix(PathBuf::from(DEFAULT_AGENT_SOCKET))
    }
}

impl FromStr for AgentAddress {
    type Err = std::convert::Infallible;

    /// `host:port` parses as TCP, anything containing a `/` or lacking a
    /// numeric port is a socket path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.contains('/') {
            if let Some((host, port)) = s.rsplit_once(':') {
                if let Ok(port) = port.parse::<u16>() {
                    let host = host.trim_start_matches('[').trim_end_matches(']');
                    if !host.is_empty() {
                        return Ok(Self::Tcp(host.to_string(), port));
                    }
                }
            }
        }
        Ok(Self::Unix(PathBuf::from(s)))
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(host, port) if host.contains(':') => write!(f, "[{host}]:{port}"),
            Self::Tcp(host, port) => write!(f, "{host}:{port}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}
