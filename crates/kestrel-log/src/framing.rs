//! On-disk record and index framing.
//!
//! Record framing: `u32 totalSize` followed by `i64 offset`, `i64
//! timestampMs`, `u32 keyLen`, `key`, `u32 valueLen`, `value`, all
//! big-endian, with a length-prefixed header list appended after the value.
//! `u32::MAX` is reserved as the null-length sentinel for `key`/`value`
//! since `u32` itself cannot carry Kafka's usual `-1`.
//!
//! Index framing: offset-index entries are `i64 offset + i64 position` (16
//! bytes); time-index entries are `i64 timestampMs + i64 offset` (16 bytes).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use kestrel_common::error::{LogError, Result};
use kestrel_common::types::Record;

/// Sentinel length marking a null key/value.
const NULL_LEN: u32 = u32::MAX;

pub const INDEX_ENTRY_SIZE: usize = 16;
pub const TIME_INDEX_ENTRY_SIZE: usize = 16;

/// Encode a record into its on-disk frame, including the leading
/// `totalSize` prefix.
pub fn encode_record(record: &Record) -> Bytes {
    let key_len = record.key.as_ref().map_or(0, Bytes::len);
    let value_len = record.value.as_ref().map_or(0, Bytes::len);
    let headers_len: usize = record
        .headers
        .iter()
        .map(|(k, v)| 4 + k.len() + 4 + v.len())
        .sum();

    let body_len = 8 + 8 + 4 + key_len + 4 + value_len + 4 + headers_len;
    let mut buf = BytesMut::with_capacity(4 + body_len);

    buf.put_u32(body_len as u32);
    buf.put_i64(record.offset);
    buf.put_i64(record.timestamp);

    match &record.key {
        Some(k) => {
            buf.put_u32(k.len() as u32);
            buf.put_slice(k);
        }
        None => buf.put_u32(NULL_LEN),
    }

    match &record.value {
        Some(v) => {
            buf.put_u32(v.len() as u32);
            buf.put_slice(v);
        }
        None => buf.put_u32(NULL_LEN),
    }

    buf.put_u32(record.headers.len() as u32);
    for (k, v) in &record.headers {
        buf.put_u32(k.len() as u32);
        buf.put_slice(k);
        buf.put_u32(v.len() as u32);
        buf.put_slice(v);
    }

    buf.freeze()
}

/// Decode a single record frame (without the leading `totalSize`, which the
/// caller has already consumed to know `body`'s length).
pub fn decode_record_body(mut body: Bytes) -> Result<Record> {
    if body.len() < 8 + 8 + 4 {
        return Err(LogError::CorruptRecord {
            position: 0,
            reason: "record body too short".to_string(),
        }
        .into());
    }

    let offset = body.get_i64();
    let timestamp = body.get_i64();

    let key = read_length_prefixed(&mut body)?;
    let value = read_length_prefixed(&mut body)?;

    if body.remaining() < 4 {
        return Err(LogError::CorruptRecord {
            position: 0,
            reason: "missing header count".to_string(),
        }
        .into());
    }
    let header_count = body.get_u32();
    let mut headers = Vec::with_capacity(header_count as usize);
    for _ in 0..header_count {
        let k = read_length_prefixed(&mut body)?.unwrap_or_default();
        let v = read_length_prefixed(&mut body)?.unwrap_or_default();
        headers.push((k, v));
    }

    Ok(Record {
        offset,
        timestamp,
        key,
        value,
        headers,
    })
}

fn read_length_prefixed(body: &mut Bytes) -> Result<Option<Bytes>> {
    if body.remaining() < 4 {
        return Err(LogError::CorruptRecord {
            position: 0,
            reason: "missing length prefix".to_string(),
        }
        .into());
    }
    let len = body.get_u32();
    if len == NULL_LEN {
        return Ok(None);
    }
    let len = len as usize;
    if body.remaining() < len {
        return Err(LogError::CorruptRecord {
            position: 0,
            reason: "truncated field".to_string(),
        }
        .into());
    }
    Ok(Some(body.copy_to_bytes(len)))
}

/// Encode an offset-index entry.
pub fn encode_index_entry(offset: i64, position: u64) -> [u8; INDEX_ENTRY_SIZE] {
    let mut buf = [0u8; INDEX_ENTRY_SIZE];
    buf[0..8].copy_from_slice(&offset.to_be_bytes());
    buf[8..16].copy_from_slice(&(position as i64).to_be_bytes());
    buf
}

/// Decode an offset-index entry: `(offset, position)`.
pub fn decode_index_entry(buf: &[u8]) -> (i64, u64) {
    let offset = i64::from_be_bytes(buf[0..8].try_into().unwrap());
    let position = i64::from_be_bytes(buf[8..16].try_into().unwrap()) as u64;
    (offset, position)
}

/// Encode a time-index entry.
pub fn encode_time_index_entry(timestamp: i64, offset: i64) -> [u8; TIME_INDEX_ENTRY_SIZE] {
    let mut buf = [0u8; TIME_INDEX_ENTRY_SIZE];
    buf[0..8].copy_from_slice(&timestamp.to_be_bytes());
    buf[8..16].copy_from_slice(&offset.to_be_bytes());
    buf
}

/// Decode a time-index entry: `(timestamp, offset)`.
pub fn decode_time_index_entry(buf: &[u8]) -> (i64, i64) {
    let timestamp = i64::from_be_bytes(buf[0..8].try_into().unwrap());
    let offset = i64::from_be_bytes(buf[8..16].try_into().unwrap());
    (timestamp, offset)
}

/// Zero-padded 20-digit decimal filename stem for a base offset.
#[must_use]
pub fn base_offset_filename(base_offset: i64) -> String {
    format!("{base_offset:020}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips() {
        let record = Record {
            offset: 42,
            timestamp: 1234,
            key: Some(Bytes::from_static(b"key")),
            value: Some(Bytes::from_static(b"value")),
            headers: vec![(Bytes::from_static(b"h1"), Bytes::from_static(b"v1"))],
        };

        let encoded = encode_record(&record);
        let total_size = u32::from_be_bytes(encoded[0..4].try_into().unwrap()) as usize;
        let body = encoded.slice(4..4 + total_size);
        let decoded = decode_record_body(body).unwrap();

        assert_eq!(decoded, record);
    }

    #[test]
    fn tombstone_round_trips() {
        let record = Record {
            offset: 1,
            timestamp: 1,
            key: Some(Bytes::from_static(b"k")),
            value: None,
            headers: vec![],
        };
        let encoded = encode_record(&record);
        let total_size = u32::from_be_bytes(encoded[0..4].try_into().unwrap()) as usize;
        let decoded = decode_record_body(encoded.slice(4..4 + total_size)).unwrap();
        assert!(decoded.is_tombstone());
        assert_eq!(decoded.key, record.key);
    }

    #[test]
    fn filename_is_20_digit_zero_padded() {
        assert_eq!(base_offset_filename(0), "00000000000000000000");
        assert_eq!(base_offset_filename(42), "00000000000000000042");
    }
}
