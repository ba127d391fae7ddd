// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The schema-registry wire framing.
//!
//! Layout: one magic byte (`0x00`), a 4-byte big-endian schema id, then the
//! payload. Protobuf frames additionally carry a message-index array between
//! the id and the payload: a zigzag-varint count followed by that many
//! zigzag-varint indexes, with the single-entry array `[0]` compressed to
//! one zero byte.

use crate::CodecError;

/// Leading byte of every framed message.
pub const MAGIC_BYTE: u8 = 0x00;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    /// Registry-assigned schema id.
    pub schema_id: u32,
    /// Message-index array (empty for JSON/Avro frames).
    pub message_indexes: Vec<i32>,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// Encode a JSON/Avro frame: magic, id, payload.
#[must_use]
pub fn encode(schema_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(MAGIC_BYTE);
    out.extend_from_slice(&schema_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encode a Protobuf frame: magic, id, message indexes, payload.
#[must_use]
pub fn encode_with_indexes(schema_id: u32, indexes: &[i32], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + payload.len());
    out.push(MAGIC_BYTE);
    out.extend_from_slice(&schema_id.to_be_bytes());
    if indexes == [0] {
        // The registry convention compresses the common [0] array.
        out.push(0);
    } else {
        put_zigzag(&mut out, indexes.len() as i64);
        for idx in indexes {
            put_zigzag(&mut out, i64::from(*idx));
        }
    }
    out.extend_from_slice(payload);
    out
}

/// Decode a JSON/Avro frame.
///
/// # Errors
///
/// Returns [`CodecError::InvalidFrame`] when the frame is truncated or does
/// not start with the magic byte.
pub fn decode(bytes: &[u8]) -> Result<WireFrame, CodecError> {
    let (schema_id, rest) = strip_header(bytes)?;
    Ok(WireFrame {
        schema_id,
        message_indexes: Vec::new(),
        payload: rest.to_vec(),
    })
}

/// Decode a Protobuf frame (message indexes included).
///
/// # Errors
///
/// Returns [`CodecError::InvalidFrame`] when the frame is truncated, the
/// magic byte is wrong, or the index varints are malformed.
pub fn decode_with_indexes(bytes: &[u8]) -> Result<WireFrame, CodecError> {
    let (schema_id, rest) = strip_header(bytes)?;

    let mut cursor = 0usize;
    let count = get_zigzag(rest, &mut cursor)?;
    let message_indexes = if count == 0 {
        vec![0]
    } else {
        if count < 0 || count > 128 {
            return Err(CodecError::InvalidFrame {
                reason: format!("message-index count {count} out of range"),
            });
        }
        let mut indexes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let idx = get_zigzag(rest, &mut cursor)?;
            indexes.push(i32::try_from(idx).map_err(|_| CodecError::InvalidFrame {
                reason: format!("message index {idx} out of range"),
            })?);
        }
        indexes
    };

    Ok(WireFrame {
        schema_id,
        message_indexes,
        payload: rest[cursor..].to_vec(),
    })
}

fn strip_header(bytes: &[u8]) -> Result<(u32, &[u8]), CodecError> {
    if bytes.len() < 5 {
        return Err(CodecError::InvalidFrame {
            reason: format!("frame too short: {} bytes", bytes.len()),
        });
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(CodecError::InvalidFrame {
            reason: format!("bad magic byte: {:#04x}", bytes[0]),
        });
    }
    let schema_id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((schema_id, &bytes[5..]))
}

fn put_zigzag(out: &mut Vec<u8>, value: i64) {
    let mut encoded = ((value << 1) ^ (value >> 63)) as u64;
    loop {
        let mut byte = (encoded & 0x7f) as u8;
        encoded >>= 7;
        if encoded != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if encoded == 0 {
            break;
        }
    }
}

fn get_zigzag(bytes: &[u8], cursor: &mut usize) -> Result<i64, CodecError> {
    let mut shift = 0u32;
    let mut acc = 0u64;
    loop {
        let byte = *bytes.get(*cursor).ok_or_else(|| CodecError::InvalidFrame {
            reason: "truncated varint".into(),
        })?;
        *cursor += 1;
        acc |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(CodecError::InvalidFrame {
                reason: "varint overflow".into(),
            });
        }
    }
    Ok(((acc >> 1) as i64) ^ -((acc & 1) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_frame_roundtrip() {
        let framed = encode(42, b"payload");
        assert_eq!(framed[0], MAGIC_BYTE);
        let frame = decode(&framed).unwrap();
        assert_eq!(frame.schema_id, 42);
        assert!(frame.message_indexes.is_empty());
        assert_eq!(frame.payload, b"payload");
    }

    #[test]
    fn schema_id_is_big_endian() {
        let framed = encode(0x0102_0304, b"");
        assert_eq!(&framed[1..5], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn default_index_array_is_one_zero_byte() {
        let framed = encode_with_indexes(7, &[0], b"p");
        assert_eq!(framed[5], 0);
        assert_eq!(&framed[6..], b"p");
        let frame = decode_with_indexes(&framed).unwrap();
        assert_eq!(frame.message_indexes, vec![0]);
        assert_eq!(frame.payload, b"p");
    }

    #[test]
    fn nested_index_array_roundtrip() {
        let framed = encode_with_indexes(7, &[1, 2, 3], b"msg");
        let frame = decode_with_indexes(&framed).unwrap();
        assert_eq!(frame.schema_id, 7);
        assert_eq!(frame.message_indexes, vec![1, 2, 3]);
        assert_eq!(frame.payload, b"msg");
    }

    #[test]
    fn short_frame_is_rejected() {
        let err = decode(&[0x00, 0x01]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrame { .. }));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut framed = encode(1, b"x");
        framed[0] = 0x01;
        let err = decode(&framed).unwrap_err();
        match err {
            CodecError::InvalidFrame { reason } => assert!(reason.contains("magic")),
            other => panic!("expected InvalidFrame, got {other:?}"),
        }
    }

    #[test]
    fn truncated_varint_is_rejected() {
        // Magic + id, then a varint with its continuation bit set and no
        // following byte.
        let bytes = [0x00, 0, 0, 0, 1, 0x81];
        let err = decode_with_indexes(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrame { .. }));
    }

    #[test]
    fn empty_payload_is_fine() {
        let frame = decode(&encode(5, b"")).unwrap();
        assert!(frame.payload.is_empty());
    }
}
