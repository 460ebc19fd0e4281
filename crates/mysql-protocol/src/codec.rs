//! Low-level encoding and decoding helpers.
//!
//! MySQL mixes fixed-width little-endian integers, NUL-terminated strings,
//! and "length-encoded" integers and strings. Every reader in this module
//! checks the remaining length before consuming, so truncated input yields
//! [`ProtocolError::UnexpectedEof`] instead of a panic.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Marker byte that encodes SQL NULL in a text-protocol row.
pub const NULL_MARKER: u8 = 0xFB;

fn ensure(src: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if src.remaining() < needed {
        Err(ProtocolError::eof(needed, src.remaining()))
    } else {
        Ok(())
    }
}

/// Read a single byte.
pub fn read_u8(src: &mut impl Buf) -> Result<u8, ProtocolError> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

/// Read a little-endian `u16`.
pub fn read_u16(src: &mut impl Buf) -> Result<u16, ProtocolError> {
    ensure(src, 2)?;
    Ok(src.get_u16_le())
}

/// Read a little-endian 3-byte integer.
pub fn read_u24(src: &mut impl Buf) -> Result<u32, ProtocolError> {
    ensure(src, 3)?;
    Ok(src.get_uint_le(3) as u32)
}

/// Read a little-endian `u32`.
pub fn read_u32(src: &mut impl Buf) -> Result<u32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_u32_le())
}

/// Read a length-encoded integer.
///
/// Returns `Ok(None)` for the `0xFB` NULL marker, which is only meaningful
/// inside text rows.
pub fn read_lenenc_int_or_null(src: &mut impl Buf) -> Result<Option<u64>, ProtocolError> {
    let first = read_u8(src)?;
    let value = match first {
        0x00..=0xFA => u64::from(first),
        0xFB => return Ok(None),
        0xFC => {
            ensure(src, 2)?;
            src.get_uint_le(2)
        }
        0xFD => {
            ensure(src, 3)?;
            src.get_uint_le(3)
        }
        0xFE => {
            ensure(src, 8)?;
            src.get_u64_le()
        }
        0xFF => return Err(ProtocolError::UnexpectedMarker(first)),
    };
    Ok(Some(value))
}

/// Read a length-encoded integer, rejecting the NULL marker.
pub fn read_lenenc_int(src: &mut impl Buf) -> Result<u64, ProtocolError> {
    read_lenenc_int_or_null(src)?.ok_or(ProtocolError::UnexpectedMarker(NULL_MARKER))
}

/// Read exactly `len` bytes without copying.
pub fn read_bytes(src: &mut Bytes, len: usize) -> Result<Bytes, ProtocolError> {
    ensure(src, len)?;
    Ok(src.split_to(len))
}

/// Read a length-encoded byte string without copying.
pub fn read_lenenc_bytes(src: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = read_lenenc_int(src)?;
    let len = usize::try_from(len).map_err(|_| ProtocolError::MalformedPacket("length overflow"))?;
    read_bytes(src, len)
}

/// Read a length-encoded string, replacing invalid UTF-8.
pub fn read_lenenc_string(src: &mut Bytes) -> Result<String, ProtocolError> {
    let raw = read_lenenc_bytes(src)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Read a NUL-terminated byte string. The terminator is consumed.
pub fn read_null_terminated(src: &mut Bytes) -> Result<Bytes, ProtocolError> {
    match src.iter().position(|&b| b == 0) {
        Some(pos) => {
            let value = src.split_to(pos);
            src.advance(1);
            Ok(value)
        }
        None => Err(ProtocolError::MalformedPacket("missing string terminator")),
    }
}

/// Read a NUL-terminated string, replacing invalid UTF-8.
pub fn read_null_terminated_string(src: &mut Bytes) -> Result<String, ProtocolError> {
    let raw = read_null_terminated(src)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Consume the rest of the buffer as a string.
pub fn read_eof_string(src: &mut Bytes) -> String {
    let rest = src.split_to(src.len());
    String::from_utf8_lossy(&rest).into_owned()
}

/// Skip a length-encoded value and return its length, or `None` for NULL.
pub fn skip_lenenc_value(src: &mut impl Buf) -> Result<Option<usize>, ProtocolError> {
    match read_lenenc_int_or_null(src)? {
        None => Ok(None),
        Some(len) => {
            let len =
                usize::try_from(len).map_err(|_| ProtocolError::MalformedPacket("length overflow"))?;
            ensure(src, len)?;
            src.advance(len);
            Ok(Some(len))
        }
    }
}

/// Number of bytes [`write_lenenc_int`] emits for `value`.
#[must_use]
pub const fn lenenc_int_len(value: u64) -> usize {
    if value < 251 {
        1
    } else if value < 1 << 16 {
        3
    } else if value < 1 << 24 {
        4
    } else {
        9
    }
}

/// Write a length-encoded integer.
pub fn write_lenenc_int(dst: &mut impl BufMut, value: u64) {
    if value < 251 {
        dst.put_u8(value as u8);
    } else if value < 1 << 16 {
        dst.put_u8(0xFC);
        dst.put_uint_le(value, 2);
    } else if value < 1 << 24 {
        dst.put_u8(0xFD);
        dst.put_uint_le(value, 3);
    } else {
        dst.put_u8(0xFE);
        dst.put_u64_le(value);
    }
}

/// Write a length-encoded byte string.
pub fn write_lenenc_bytes(dst: &mut impl BufMut, value: &[u8]) {
    write_lenenc_int(dst, value.len() as u64);
    dst.put_slice(value);
}

/// Write a NUL-terminated byte string.
pub fn write_null_terminated(dst: &mut impl BufMut, value: &[u8]) {
    dst.put_slice(value);
    dst.put_u8(0);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    #[test]
    fn test_lenenc_int_boundaries() {
        let cases: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (250, &[0xFA]),
            (251, &[0xFC, 0xFB, 0x00]),
            (0xFFFF, &[0xFC, 0xFF, 0xFF]),
            (0x1_0000, &[0xFD, 0x00, 0x00, 0x01]),
            (0x100_0000, &[0xFE, 0, 0, 0, 1, 0, 0, 0, 0]),
        ];
        for (value, encoded) in cases {
            let mut buf = BytesMut::new();
            write_lenenc_int(&mut buf, *value);
            assert_eq!(&buf[..], *encoded, "encoding {value}");
            assert_eq!(lenenc_int_len(*value), encoded.len());
        }
    }

    #[test]
    fn test_null_marker() {
        let mut src = Bytes::from_static(&[0xFB]);
        assert_eq!(read_lenenc_int_or_null(&mut src).unwrap(), None);

        let mut src = Bytes::from_static(&[0xFB]);
        assert!(read_lenenc_int(&mut src).is_err());
    }

    #[test]
    fn test_truncated_lenenc() {
        let mut src = Bytes::from_static(&[0xFD, 0x01]);
        assert_eq!(
            read_lenenc_int(&mut src),
            Err(ProtocolError::UnexpectedEof {
                expected: 3,
                actual: 1
            })
        );
    }

    #[test]
    fn test_null_terminated() {
        let mut src = Bytes::from_static(b"8.0.36\0rest");
        assert_eq!(read_null_terminated_string(&mut src).unwrap(), "8.0.36");
        assert_eq!(&src[..], b"rest");

        let mut src = Bytes::from_static(b"no terminator");
        assert!(read_null_terminated(&mut src).is_err());
    }

    #[test]
    fn test_lenenc_bytes_keeps_binary() {
        let mut buf = BytesMut::new();
        write_lenenc_bytes(&mut buf, b"a\0\xff");
        let mut src = buf.freeze();
        assert_eq!(&read_lenenc_bytes(&mut src).unwrap()[..], b"a\0\xff");
        assert!(src.is_empty());
    }

    #[test]
    fn test_skip_lenenc_value() {
        let mut src = Bytes::from_static(&[0x03, b'a', b'b', b'c', 0xFB, 0x00]);
        assert_eq!(skip_lenenc_value(&mut src).unwrap(), Some(3));
        assert_eq!(skip_lenenc_value(&mut src).unwrap(), None);
        assert_eq!(skip_lenenc_value(&mut src).unwrap(), Some(0));
        assert!(src.is_empty());
    }

    proptest! {
        #[test]
        fn prop_lenenc_int_decodes_what_was_written(value in any::<u64>()) {
            let mut buf = BytesMut::new();
            write_lenenc_int(&mut buf, value);
            prop_assert_eq!(buf.len(), lenenc_int_len(value));
            let mut src = buf.freeze();
            prop_assert_eq!(read_lenenc_int(&mut src).unwrap(), value);
        }

        #[test]
        fn prop_readers_never_panic(data in proptest::collection::vec(any::<u8>(), 0..32)) {
            let mut src = Bytes::from(data);
            let _ = read_lenenc_bytes(&mut src);
            let _ = read_null_terminated(&mut src);
            let _ = skip_lenenc_value(&mut src);
        }
    }
}
