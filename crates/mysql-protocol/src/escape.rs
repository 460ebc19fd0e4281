//! String literal escaping.

use crate::charset::Charset;

/// Escape `input` for inclusion in a single- or double-quoted SQL literal.
///
/// With `no_backslash_escapes` (the `NO_BACKSLASH_ESCAPES` sql mode) only
/// single quotes are doubled. Otherwise NUL, newline, carriage return,
/// backslash, both quotes and Ctrl-Z are backslash-escaped. Multi-byte
/// characters of `charset` are copied untouched so a trailing byte that
/// looks like `\` or `'` is never split off.
#[must_use]
pub fn escape_string(charset: &Charset, no_backslash_escapes: bool, input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 8 + 2);
    let mut i = 0;
    while i < input.len() {
        if let Some(len) = charset.multibyte_len(&input[i..]) {
            out.extend_from_slice(&input[i..i + len]);
            i += len;
            continue;
        }
        let byte = input[i];
        if no_backslash_escapes {
            if byte == b'\'' {
                out.push(b'\'');
            }
            out.push(byte);
        } else {
            match byte {
                0 => out.extend_from_slice(b"\\0"),
                b'\n' => out.extend_from_slice(b"\\n"),
                b'\r' => out.extend_from_slice(b"\\r"),
                b'\\' => out.extend_from_slice(b"\\\\"),
                b'\'' => out.extend_from_slice(b"\\'"),
                b'"' => out.extend_from_slice(b"\\\""),
                0x1A => out.extend_from_slice(b"\\Z"),
                _ => out.push(byte),
            }
        }
        i += 1;
    }
    out
}

/// Escape `input` and wrap it in single quotes.
#[must_use]
pub fn quote_string(charset: &Charset, no_backslash_escapes: bool, input: &[u8]) -> Vec<u8> {
    let escaped = escape_string(charset, no_backslash_escapes, input);
    let mut out = Vec::with_capacity(escaped.len() + 2);
    out.push(b'\'');
    out.extend_from_slice(&escaped);
    out.push(b'\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn utf8() -> &'static Charset {
        Charset::default_charset()
    }

    #[test]
    fn test_backslash_escapes() {
        assert_eq!(
            escape_string(utf8(), false, b"it's \"a\"\n\\\0\x1a"),
            b"it\\'s \\\"a\\\"\\n\\\\\\0\\Z".to_vec()
        );
    }

    #[test]
    fn test_no_backslash_escapes_doubles_quotes() {
        assert_eq!(escape_string(utf8(), true, b"it's \\n"), b"it''s \\n".to_vec());
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote_string(utf8(), false, b"O'Neil"), b"'O\\'Neil'".to_vec());
    }

    #[test]
    fn test_multibyte_trail_byte_not_escaped() {
        let Some(gbk) = Charset::by_name("gbk") else {
            unreachable!("gbk is in the table");
        };
        assert_eq!(escape_string(gbk, false, &[0xBF, 0x5C, b'\'']), vec![0xBF, 0x5C, b'\\', b'\'']);
    }

    proptest! {
        #[test]
        fn prop_escaped_has_no_bare_quote(input in proptest::collection::vec(any::<u8>(), 0..64)) {
            let escaped = escape_string(utf8(), false, &input);
            let mut i = 0;
            while i < escaped.len() {
                if escaped[i] == b'\\' {
                    i += 2;
                    continue;
                }
                prop_assert_ne!(escaped[i], b'\'');
                i += 1;
            }
        }
    }
}
