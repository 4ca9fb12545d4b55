use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(#[source] bincode::Error),
    #[error("decode failed: {0}")]
    Decode(#[source] bincode::Error),
}

/// Canonical byte encoding shared by the wire protocol and the on-disk
/// tables. The only property callers rely on is that `digest(encode(x))`
/// is stable for a given `x` — this wraps `bincode`, the serializer this
/// codebase already uses end to end for wire and DB records.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(CodecError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        a: u32,
        b: Vec<u8>,
    }

    #[test]
    fn round_trips() {
        let s = Sample {
            a: 7,
            b: vec![1, 2, 3],
        };
        let bytes = encode(&s).unwrap();
        let back: Sample = decode(&bytes).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn encoding_is_deterministic() {
        let s = Sample {
            a: 1,
            b: vec![9, 9],
        };
        assert_eq!(encode(&s).unwrap(), encode(&s).unwrap());
    }
}
