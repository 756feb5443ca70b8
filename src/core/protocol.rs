//! Line-oriented chunk transfer protocol.
//!
//! One request per TCP connection:
//!
//! ```text
//! client -> server   GET <fileID> <offset> <size>\n
//! server -> client   OK <size>\n<size raw bytes>
//!                or  ERR <message>\n            (connection closed, no payload)
//! ```

use crate::utils::{Result, RippleError};

pub const INVALID_REQUEST: &str = "invalid request";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub file_id: String,
    pub offset: u64,
    pub size: u64,
}

impl ChunkRequest {
    pub fn new(file_id: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            file_id: file_id.into(),
            offset,
            size,
        }
    }

    pub fn encode(&self) -> String {
        format!("GET {} {} {}\n", self.file_id, self.offset, self.size)
    }

    /// Parse one request line. Anything but exactly four fields led by `GET` is rejected.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim().split(' ').collect();
        if parts.len() != 4 || parts[0] != "GET" || parts[1].is_empty() {
            return Err(RippleError::ProtocolError(INVALID_REQUEST.to_string()));
        }

        let offset = parts[2]
            .parse::<u64>()
            .map_err(|_| RippleError::ProtocolError(INVALID_REQUEST.to_string()))?;
        let size = parts[3]
            .parse::<u64>()
            .map_err(|_| RippleError::ProtocolError(INVALID_REQUEST.to_string()))?;

        Ok(Self::new(parts[1], offset, size))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResponse {
    Ok(u64),
    Err(String),
}

impl ChunkResponse {
    pub fn encode(&self) -> String {
        match self {
            ChunkResponse::Ok(size) => format!("OK {}\n", size),
            // Newlines inside the message would desynchronise the header.
            ChunkResponse::Err(msg) => format!("ERR {}\n", msg.replace(['\r', '\n'], " ")),
        }
    }

    /// Parse a status line on the client side. Only an `OK ` prefix counts as success.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(rest) = line.strip_prefix("OK ") {
            let size = rest.trim().parse::<u64>().map_err(|_| {
                RippleError::ProtocolError(format!("bad response: {}", line))
            })?;
            return Ok(ChunkResponse::Ok(size));
        }
        if let Some(msg) = line.strip_prefix("ERR ") {
            return Ok(ChunkResponse::Err(msg.to_string()));
        }
        Err(RippleError::ProtocolError(format!("bad response: {}", line)))
    }
}
