//! Column definitions (`ColumnDefinition41`) and type codes.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{read_lenenc_int, read_lenenc_string, read_u8, read_u16, read_u32, write_lenenc_bytes, write_lenenc_int};
use crate::error::ProtocolError;

/// Column type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum FieldType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    VarChar = 15,
    Bit = 16,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl FieldType {
    /// Map a wire type code to a known type.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Decimal,
            1 => Self::Tiny,
            2 => Self::Short,
            3 => Self::Long,
            4 => Self::Float,
            5 => Self::Double,
            6 => Self::Null,
            7 => Self::Timestamp,
            8 => Self::LongLong,
            9 => Self::Int24,
            10 => Self::Date,
            11 => Self::Time,
            12 => Self::DateTime,
            13 => Self::Year,
            14 => Self::NewDate,
            15 => Self::VarChar,
            16 => Self::Bit,
            245 => Self::Json,
            246 => Self::NewDecimal,
            247 => Self::Enum,
            248 => Self::Set,
            249 => Self::TinyBlob,
            250 => Self::MediumBlob,
            251 => Self::LongBlob,
            252 => Self::Blob,
            253 => Self::VarString,
            254 => Self::String,
            255 => Self::Geometry,
            _ => return None,
        })
    }

    /// Whether values of this type are numbers.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Decimal
                | Self::Tiny
                | Self::Short
                | Self::Long
                | Self::Float
                | Self::Double
                | Self::LongLong
                | Self::Int24
                | Self::Year
                | Self::NewDecimal
        )
    }
}

bitflags! {
    /// Column definition flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u16 {
        /// Column cannot be NULL.
        const NOT_NULL = 1;
        /// Part of the primary key.
        const PRI_KEY = 1 << 1;
        /// Part of a unique key.
        const UNIQUE_KEY = 1 << 2;
        /// Part of a non-unique key.
        const MULTIPLE_KEY = 1 << 3;
        /// BLOB or TEXT column.
        const BLOB = 1 << 4;
        /// Unsigned number.
        const UNSIGNED = 1 << 5;
        /// Zero-filled number.
        const ZEROFILL = 1 << 6;
        /// Binary collation.
        const BINARY = 1 << 7;
        /// ENUM column.
        const ENUM = 1 << 8;
        /// `AUTO_INCREMENT` column.
        const AUTO_INCREMENT = 1 << 9;
        /// TIMESTAMP column.
        const TIMESTAMP = 1 << 10;
        /// SET column.
        const SET = 1 << 11;
        /// Column has no default value.
        const NO_DEFAULT_VALUE = 1 << 12;
        /// Updated to `NOW()` on update.
        const ON_UPDATE_NOW = 1 << 13;
        /// Numeric column.
        const NUM = 1 << 15;
    }
}

/// One column of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Catalog, always `def`.
    pub catalog: String,
    /// Database.
    pub schema: String,
    /// Table alias.
    pub table: String,
    /// Physical table.
    pub org_table: String,
    /// Column alias.
    pub name: String,
    /// Physical column.
    pub org_name: String,
    /// Collation id.
    pub character_set: u16,
    /// Declared display width.
    pub column_length: u32,
    /// Raw type code.
    pub column_type: u8,
    /// Definition flags.
    pub flags: ColumnFlags,
    /// Decimal digits.
    pub decimals: u8,
}

impl ColumnDefinition {
    /// Decode a column definition payload.
    pub fn decode(mut src: Bytes) -> Result<Self, ProtocolError> {
        let catalog = read_lenenc_string(&mut src)?;
        let schema = read_lenenc_string(&mut src)?;
        let table = read_lenenc_string(&mut src)?;
        let org_table = read_lenenc_string(&mut src)?;
        let name = read_lenenc_string(&mut src)?;
        let org_name = read_lenenc_string(&mut src)?;
        let fixed_len = read_lenenc_int(&mut src)?;
        if fixed_len < 10 {
            return Err(ProtocolError::MalformedPacket("short column definition"));
        }
        let character_set = read_u16(&mut src)?;
        let column_length = read_u32(&mut src)?;
        let column_type = read_u8(&mut src)?;
        let flags = ColumnFlags::from_bits_retain(read_u16(&mut src)?);
        let decimals = read_u8(&mut src)?;
        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            character_set,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    /// Encode the definition (used by test servers).
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(64);
        for part in [
            &self.catalog,
            &self.schema,
            &self.table,
            &self.org_table,
            &self.name,
            &self.org_name,
        ] {
            write_lenenc_bytes(&mut dst, part.as_bytes());
        }
        write_lenenc_int(&mut dst, 0x0C);
        dst.put_u16_le(self.character_set);
        dst.put_u32_le(self.column_length);
        dst.put_u8(self.column_type);
        dst.put_u16_le(self.flags.bits());
        dst.put_u8(self.decimals);
        dst.put_u16_le(0);
        dst.freeze()
    }

    /// Known type, if the code is recognized.
    #[must_use]
    pub const fn field_type(&self) -> Option<FieldType> {
        FieldType::from_u8(self.column_type)
    }

    /// Whether the column may hold NULL.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        !self.flags.contains(ColumnFlags::NOT_NULL)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> ColumnDefinition {
        ColumnDefinition {
            catalog: "def".into(),
            schema: "shop".into(),
            table: "o".into(),
            org_table: "orders".into(),
            name: "total".into(),
            org_name: "amount".into(),
            character_set: 63,
            column_length: 11,
            column_type: FieldType::Long as u8,
            flags: ColumnFlags::NUM,
            decimals: 0,
        }
    }

    #[test]
    fn test_decode_column_definition() {
        let column = ColumnDefinition::decode(sample().encode()).unwrap();
        assert_eq!(column, sample());
        assert_eq!(column.field_type(), Some(FieldType::Long));
        assert!(column.is_nullable());
    }

    #[test]
    fn test_short_fixed_block_rejected() {
        let encoded = sample().encode();
        let truncated = encoded.slice(..encoded.len() - 8);
        assert!(ColumnDefinition::decode(truncated).is_err());
    }

    #[test]
    fn test_unknown_type_code() {
        assert_eq!(FieldType::from_u8(100), None);
        assert!(FieldType::NewDecimal.is_numeric());
        assert!(!FieldType::VarString.is_numeric());
    }
}
