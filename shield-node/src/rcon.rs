//! Source RCON transport.
//!
//! Minimal client for the Source remote-console protocol: little-endian
//! framed packets carrying an id, a type and a NUL-terminated body. One
//! authenticated session per mitigation episode; commands are executed
//! synchronously, one response packet per request.

use crate::error::{Result, ShieldError};
use crate::secret::Secret;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// id + type fields plus the two trailing NULs
const PACKET_OVERHEAD: usize = 10;
const MAX_PACKET_BODY: usize = 4096;
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Authenticated command/response session with the game server.
#[async_trait]
pub trait RconSession: Send {
    async fn execute(&mut self, command: &str) -> Result<String>;
}

/// Opens an [`RconSession`]; one dial per mitigation episode.
#[async_trait]
pub trait RconConnector: Send + Sync {
    async fn dial(&self) -> Result<Box<dyn RconSession>>;
}

/// Encode one packet: `{size}{id}{type}{body}\0\0`, all integers i32 LE.
fn encode_packet(id: i32, kind: i32, body: &str) -> Vec<u8> {
    let size = (PACKET_OVERHEAD + body.len()) as i32;
    let mut buf = Vec::with_capacity(4 + size as usize + 2);
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&kind.to_le_bytes());
    buf.extend_from_slice(body.as_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf
}

/// Decode a frame (everything after the size field) into (id, type, body).
fn decode_frame(frame: &[u8]) -> Result<(i32, i32, String)> {
    if frame.len() < PACKET_OVERHEAD - 2 {
        return Err(ShieldError::Rcon(format!(
            "runt packet: {} bytes",
            frame.len()
        )));
    }

    let id = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let kind = i32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    let body = &frame[8..];
    // Trailing NULs are padding, not payload.
    let body = body.strip_suffix(&[0, 0]).unwrap_or(body);
    Ok((id, kind, String::from_utf8_lossy(body).into_owned()))
}

/// TCP connection to a Source server's RCON port.
pub struct RconConnection {
    stream: TcpStream,
    next_id: i32,
}

impl RconConnection {
    /// Connect and authenticate. A rejected password surfaces as an error;
    /// the connection is dropped on any failure path.
    pub async fn dial(address: &str, password: &str) -> Result<Self> {
        let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| ShieldError::Rcon(format!("dial {address} timed out")))??;

        let mut conn = Self { stream, next_id: 1 };
        conn.authenticate(password).await?;
        debug!(address, "RCON session established");
        Ok(conn)
    }

    async fn authenticate(&mut self, password: &str) -> Result<()> {
        let auth_id = self.send(SERVERDATA_AUTH, password).await?;

        // Some servers precede the auth response with an empty
        // RESPONSE_VALUE packet.
        for _ in 0..2 {
            let (id, kind, _body) = self.read_packet().await?;
            if kind != SERVERDATA_AUTH_RESPONSE {
                continue;
            }
            if id == -1 {
                return Err(ShieldError::Rcon("authentication rejected".to_string()));
            }
            if id != auth_id {
                return Err(ShieldError::Rcon(format!(
                    "auth response for unexpected request id {id}"
                )));
            }
            return Ok(());
        }

        Err(ShieldError::Rcon("no auth response received".to_string()))
    }

    async fn send(&mut self, kind: i32, body: &str) -> Result<i32> {
        if body.len() > MAX_PACKET_BODY {
            return Err(ShieldError::Rcon(format!(
                "command too long: {} bytes",
                body.len()
            )));
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.stream.write_all(&encode_packet(id, kind, body)).await?;
        Ok(id)
    }

    async fn read_packet(&mut self) -> Result<(i32, i32, String)> {
        let mut size_buf = [0u8; 4];
        self.stream.read_exact(&mut size_buf).await?;
        let size = i32::from_le_bytes(size_buf);

        let valid = (PACKET_OVERHEAD - 2) as i32..=(PACKET_OVERHEAD + MAX_PACKET_BODY) as i32;
        if !valid.contains(&size) {
            return Err(ShieldError::Rcon(format!("invalid packet size {size}")));
        }

        let mut frame = vec![0u8; size as usize];
        self.stream.read_exact(&mut frame).await?;
        decode_frame(&frame)
    }
}

#[async_trait]
impl RconSession for RconConnection {
    async fn execute(&mut self, command: &str) -> Result<String> {
        let request_id = self.send(SERVERDATA_EXECCOMMAND, command).await?;

        // Skip stray packets (e.g. late auth echoes) but don't spin forever.
        for _ in 0..4 {
            let (id, kind, body) = self.read_packet().await?;
            if kind == SERVERDATA_RESPONSE_VALUE && id == request_id {
                return Ok(body);
            }
            debug!(id, kind, "Skipping unexpected RCON packet");
        }

        Err(ShieldError::Rcon(format!(
            "no response for command '{command}'"
        )))
    }
}

/// Connector dialing a fixed game-server endpoint.
pub struct TcpRconConnector {
    address: String,
    password: Secret,
}

impl TcpRconConnector {
    pub fn new(address: String, password: Secret) -> Self {
        Self { address, password }
    }
}

#[async_trait]
impl RconConnector for TcpRconConnector {
    async fn dial(&self) -> Result<Box<dyn RconSession>> {
        let conn = RconConnection::dial(&self.address, self.password.expose()).await?;
        Ok(Box::new(conn))
    }
}
