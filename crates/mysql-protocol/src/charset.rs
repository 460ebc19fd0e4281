//! Character sets and collations known to the client.

/// How a character set lays out multi-byte characters.
///
/// Only schemes whose trailing bytes can collide with ASCII need special
/// handling when escaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiByteScheme {
    /// Single-byte, or multi-byte with no ASCII in trailing bytes (UTF-8).
    AsciiSafe,
    /// Big5.
    Big5,
    /// GBK.
    Gbk,
    /// Shift-JIS and CP932.
    Sjis,
}

/// A character set / collation pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charset {
    /// Collation id used on the wire.
    pub number: u8,
    /// Character set name.
    pub name: &'static str,
    /// Collation name.
    pub collation: &'static str,
    /// Minimum bytes per character.
    pub mbminlen: u8,
    /// Maximum bytes per character.
    pub mbmaxlen: u8,
    /// Whether this is the default collation for `name`.
    pub primary: bool,
    /// Multi-byte layout.
    pub scheme: MultiByteScheme,
}

const fn cs(
    number: u8,
    name: &'static str,
    collation: &'static str,
    mbminlen: u8,
    mbmaxlen: u8,
    primary: bool,
    scheme: MultiByteScheme,
) -> Charset {
    Charset {
        number,
        name,
        collation,
        mbminlen,
        mbmaxlen,
        primary,
        scheme,
    }
}

use MultiByteScheme::{AsciiSafe, Big5, Gbk, Sjis};

static CHARSETS: &[Charset] = &[
    cs(1, "big5", "big5_chinese_ci", 1, 2, true, Big5),
    cs(8, "latin1", "latin1_swedish_ci", 1, 1, true, AsciiSafe),
    cs(11, "ascii", "ascii_general_ci", 1, 1, true, AsciiSafe),
    cs(13, "sjis", "sjis_japanese_ci", 1, 2, true, Sjis),
    cs(24, "gb2312", "gb2312_chinese_ci", 1, 2, true, AsciiSafe),
    cs(28, "gbk", "gbk_chinese_ci", 1, 2, true, Gbk),
    cs(33, "utf8", "utf8_general_ci", 1, 3, true, AsciiSafe),
    cs(45, "utf8mb4", "utf8mb4_general_ci", 1, 4, true, AsciiSafe),
    cs(46, "utf8mb4", "utf8mb4_bin", 1, 4, false, AsciiSafe),
    cs(47, "latin1", "latin1_bin", 1, 1, false, AsciiSafe),
    cs(63, "binary", "binary", 1, 1, true, AsciiSafe),
    cs(83, "utf8", "utf8_bin", 1, 3, false, AsciiSafe),
    cs(95, "cp932", "cp932_japanese_ci", 1, 2, true, Sjis),
    cs(192, "utf8", "utf8_unicode_ci", 1, 3, false, AsciiSafe),
    cs(224, "utf8mb4", "utf8mb4_unicode_ci", 1, 4, false, AsciiSafe),
    cs(255, "utf8mb4", "utf8mb4_0900_ai_ci", 1, 4, false, AsciiSafe),
];

/// Collation used when none is configured.
pub const DEFAULT_CHARSET_NUMBER: u8 = 45;

impl Charset {
    /// Look up a collation by id.
    #[must_use]
    pub fn by_number(number: u8) -> Option<&'static Self> {
        CHARSETS.iter().find(|c| c.number == number)
    }

    /// Look up the default collation of a character set.
    ///
    /// `utf8mb3` is accepted as an alias of `utf8`.
    #[must_use]
    pub fn by_name(name: &str) -> Option<&'static Self> {
        let name = name.trim();
        let name = if name.eq_ignore_ascii_case("utf8mb3") { "utf8" } else { name };
        CHARSETS
            .iter()
            .find(|c| c.primary && c.name.eq_ignore_ascii_case(name))
    }

    /// Default client collation (`utf8mb4_general_ci`).
    #[must_use]
    pub fn default_charset() -> &'static Self {
        Self::by_number(DEFAULT_CHARSET_NUMBER).unwrap_or(&CHARSETS[0])
    }

    /// Length of the multi-byte character starting at `bytes[0]`, or
    /// `None` when the leading byte is a single-byte character.
    #[must_use]
    pub fn multibyte_len(&self, bytes: &[u8]) -> Option<usize> {
        let (&lead, rest) = bytes.split_first()?;
        let &trail = rest.first()?;
        let valid = match self.scheme {
            AsciiSafe => false,
            Big5 => {
                (0xA1..=0xF9).contains(&lead)
                    && ((0x40..=0x7E).contains(&trail) || (0xA1..=0xFE).contains(&trail))
            }
            Gbk => (0x81..=0xFE).contains(&lead) && (0x40..=0xFE).contains(&trail) && trail != 0x7F,
            Sjis => {
                ((0x81..=0x9F).contains(&lead) || (0xE0..=0xFC).contains(&lead))
                    && ((0x40..=0x7E).contains(&trail) || (0x80..=0xFC).contains(&trail))
            }
        };
        valid.then_some(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(Charset::by_name("UTF8MB4").map(|c| c.number), Some(45));
        assert_eq!(Charset::by_name("utf8mb3").map(|c| c.collation), Some("utf8_general_ci"));
        assert_eq!(Charset::by_number(63).map(|c| c.name), Some("binary"));
        assert!(Charset::by_name("klingon").is_none());
        assert_eq!(Charset::default_charset().mbmaxlen, 4);
    }

    #[test]
    fn test_gbk_trailing_backslash() {
        let gbk = Charset::by_name("gbk").copied().unwrap_or(*Charset::default_charset());
        // 0xBF 0x5C is one GBK character whose trail byte is '\'.
        assert_eq!(gbk.multibyte_len(&[0xBF, 0x5C]), Some(2));
        assert_eq!(gbk.multibyte_len(b"a\\"), None);
        assert_eq!(Charset::default_charset().multibyte_len(&[0xBF, 0x5C]), None);
    }
}
