//! Text protocol rows.
//!
//! A text row is a sequence of length-encoded strings, one per column,
//! with `0xFB` standing in for NULL. Decoding slices the packet buffer,
//! so column values share the packet's allocation.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{
    NULL_MARKER, read_bytes, read_lenenc_int_or_null, skip_lenenc_value, write_lenenc_bytes,
};
use crate::error::ProtocolError;

/// Decode the column values of a text row.
pub fn decode_text_row(payload: &Bytes, column_count: usize) -> Result<Vec<Option<Bytes>>, ProtocolError> {
    let mut src = payload.clone();
    let mut values = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        match read_lenenc_int_or_null(&mut src)? {
            None => values.push(None),
            Some(len) => {
                let len = usize::try_from(len)
                    .map_err(|_| ProtocolError::MalformedPacket("length overflow"))?;
                values.push(Some(read_bytes(&mut src, len)?));
            }
        }
    }
    if !src.is_empty() {
        return Err(ProtocolError::MalformedPacket("trailing bytes after row"));
    }
    Ok(values)
}

/// Lengths of the values in a text row without copying them out.
///
/// NULL columns report `None`.
pub fn text_row_lengths(payload: &[u8], column_count: usize) -> Result<Vec<Option<usize>>, ProtocolError> {
    let mut src = payload;
    (0..column_count).map(|_| skip_lenenc_value(&mut src)).collect()
}

/// Encode a text row (used by test servers).
#[must_use]
pub fn encode_text_row(values: &[Option<&[u8]>]) -> Bytes {
    let mut dst = BytesMut::new();
    for value in values {
        match value {
            Some(v) => write_lenenc_bytes(&mut dst, v),
            None => dst.put_u8(NULL_MARKER),
        }
    }
    dst.freeze()
}
