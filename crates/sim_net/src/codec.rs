//! MessagePack codec helpers.
//!
//! Thin wrappers around `rmp-serde`. All wire payloads use MessagePack for
//! compact binary serialisation, matching the encoding used for component
//! payloads inside [`sim_ecm::EcmState`].

use serde::{Serialize, de::DeserializeOwned};

use crate::error::NetError;

/// Encode a value to MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Encode`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    rmp_serde::to_vec(value).map_err(NetError::Encode)
}

/// Decode a value from MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Decode`] if deserialisation fails.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, NetError> {
    rmp_serde::from_slice(bytes).map_err(NetError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::StepAck;

    #[test]
    fn test_roundtrip_step_ack() {
        let ack = StepAck {
            instance_id: "secondary-1".to_string(),
            iterations: 17,
        };
        let bytes = encode(&ack).unwrap();
        let restored: StepAck = decode(&bytes).unwrap();
        assert_eq!(ack, restored);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<StepAck, _> = decode(&[0xC1, 0x00]);
        assert!(result.is_err());
    }
}
