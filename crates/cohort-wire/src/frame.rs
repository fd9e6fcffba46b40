//! JSON datagram framing for packet transports
//!
//! Datagram = one JSON document. Client datagrams carry the sender's
//! connection id because packet transports have no connection identity.

use cohort_core::{CohortError, CohortResult, ConnectionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ClientMessage;

/// Maximum encoded datagram size (fits a single UDP payload)
pub const MAX_DATAGRAM_SIZE: usize = 65_000;

/// Client → relay datagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDatagram {
    pub from: ConnectionId,
    pub message: ClientMessage,
}

/// Serialize a message into a bounded datagram
pub fn encode_datagram<T: Serialize>(message: &T) -> CohortResult<Vec<u8>> {
    let bytes =
        serde_json::to_vec(message).map_err(|e| CohortError::EncodeError(e.to_string()))?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(CohortError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(bytes)
}

/// Parse a datagram
pub fn decode_datagram<T: DeserializeOwned>(buf: &[u8]) -> CohortResult<T> {
    if buf.len() > MAX_DATAGRAM_SIZE {
        return Err(CohortError::FrameTooLarge {
            size: buf.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    serde_json::from_slice(buf).map_err(|e| CohortError::DecodeError(e.to_string()))
}
