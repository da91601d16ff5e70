use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::utils::{P2PError, Result};

pub const BOOTSTRAP_PROTOCOL: &str = "/mp2p/bootstrap";

/// Upper bound for a single protocol line, terminator included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// How the discovery response is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeMode {
    /// A JSON array of connect strings, `[]` when empty.
    #[default]
    JsonList,
    /// A single bare connect string, or an empty line.
    Single,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub protocol_id: String,
    pub discover_marker: String,
    pub greeting_marker: String,
    pub ack: String,
    pub exchange_mode: ExchangeMode,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            protocol_id: BOOTSTRAP_PROTOCOL.to_string(),
            discover_marker: "DISCOVER".to_string(),
            greeting_marker: "HELLO".to_string(),
            ack: "ACK".to_string(),
            exchange_mode: ExchangeMode::JsonList,
        }
    }
}

/// An inbound bootstrap message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Carries the sender's own connect string, empty if it has none.
    Discover { connect_string: String },
    Greeting,
    Unknown(String),
}

impl ProtocolConfig {
    pub fn parse_request(&self, line: &str) -> Request {
        if line == self.greeting_marker {
            return Request::Greeting;
        }

        if let Some(rest) = line.strip_prefix(self.discover_marker.as_str()) {
            if rest.is_empty() {
                return Request::Discover {
                    connect_string: String::new(),
                };
            }
            if let Some(payload) = rest.strip_prefix(' ') {
                return Request::Discover {
                    connect_string: payload.trim().to_string(),
                };
            }
        }

        Request::Unknown(line.to_string())
    }

    pub fn discover_request(&self, own_connect_string: Option<&str>) -> String {
        match own_connect_string {
            Some(addr) if !addr.is_empty() => format!("{} {}", self.discover_marker, addr),
            _ => self.discover_marker.clone(),
        }
    }

    pub fn encode_peers(&self, peers: &[String]) -> Result<String> {
        match self.exchange_mode {
            ExchangeMode::JsonList => {
                if peers.is_empty() {
                    return Ok("[]".to_string());
                }
                Ok(serde_json::to_string(peers)?)
            }
            ExchangeMode::Single => Ok(peers.first().cloned().unwrap_or_default()),
        }
    }

    pub fn decode_peers(&self, line: &str) -> Result<Vec<String>> {
        match self.exchange_mode {
            ExchangeMode::JsonList => serde_json::from_str(line).map_err(|e| {
                P2PError::DecodeError(format!("Malformed peer list {:?}: {}", line, e))
            }),
            ExchangeMode::Single => {
                let line = line.trim();
                if line.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![line.to_string()])
                }
            }
        }
    }
}

/// Read one `\n`-terminated line, without its terminator.
///
/// Fails with `StreamError` if the peer closes the stream before the
/// terminator arrives or the line exceeds [`MAX_LINE_LEN`].
pub async fn read_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let mut limited = (&mut *reader).take(MAX_LINE_LEN as u64);
    limited
        .read_line(&mut line)
        .await
        .map_err(|e| P2PError::StreamError(format!("Read failed: {}", e)))?;

    if !line.ends_with('\n') {
        return Err(P2PError::StreamError(if line.len() >= MAX_LINE_LEN {
            format!("Line exceeds {} bytes", MAX_LINE_LEN)
        } else {
            "Stream closed before end of line".to_string()
        }));
    }

    line.pop();
    if line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');

    writer
        .write_all(&buf)
        .await
        .map_err(|e| P2PError::StreamError(format!("Write failed: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| P2PError::StreamError(format!("Flush failed: {}", e)))?;
    Ok(())
}
