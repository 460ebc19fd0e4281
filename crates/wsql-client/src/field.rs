//! Column metadata.

use mysql_protocol::{ColumnDefinition, ColumnFlags, FieldType};

/// Description of one result column.
///
/// Built once when a result is created and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    org_name: String,
    table: String,
    org_table: String,
    db: String,
    catalog: String,
    length: u64,
    max_length: u64,
    decimals: u8,
    charsetnr: u16,
    flags: ColumnFlags,
    type_code: u8,
}

impl Field {
    pub(crate) fn new(definition: ColumnDefinition, max_length: u64) -> Self {
        Self {
            name: definition.name,
            org_name: definition.org_name,
            table: definition.table,
            org_table: definition.org_table,
            db: definition.schema,
            catalog: definition.catalog,
            length: u64::from(definition.column_length),
            max_length,
            decimals: definition.decimals,
            charsetnr: definition.character_set,
            flags: definition.flags,
            type_code: definition.column_type,
        }
    }

    /// Column name or alias.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Original column name.
    #[must_use]
    pub fn org_name(&self) -> &str {
        &self.org_name
    }

    /// Table name or alias.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Original table name.
    #[must_use]
    pub fn org_table(&self) -> &str {
        &self.org_table
    }

    /// Database (schema) name.
    #[must_use]
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Catalog, always `def` on current servers.
    #[must_use]
    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    /// Declared column width.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Longest value in the result; zero for streamed results.
    #[must_use]
    pub fn max_length(&self) -> u64 {
        self.max_length
    }

    /// Number of decimals.
    #[must_use]
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Character set / collation number.
    #[must_use]
    pub fn charsetnr(&self) -> u16 {
        self.charsetnr
    }

    /// Column flags.
    #[must_use]
    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    /// Raw MySQL type code.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        self.type_code
    }

    /// Decoded type, when the code is known.
    #[must_use]
    pub fn field_type(&self) -> Option<FieldType> {
        FieldType::from_u8(self.type_code)
    }

    /// Whether NULL values are allowed.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        !self.flags.contains(ColumnFlags::NOT_NULL)
    }

    /// The DB-API style description entry for this column.
    #[must_use]
    pub fn description(&self) -> ColumnDescription {
        ColumnDescription {
            name: self.name.clone(),
            type_code: self.type_code,
            display_size: self.max_length,
            internal_size: self.length,
            precision: self.length,
            scale: self.decimals,
            null_ok: self.is_nullable(),
        }
    }
}

/// One entry of [`ResultStream::description`](crate::ResultStream::description):
/// `(name, type_code, max_length, length, length, decimals, nullable)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    /// Column name.
    pub name: String,
    /// Raw type code.
    pub type_code: u8,
    /// Observed maximum value length.
    pub display_size: u64,
    /// Declared width.
    pub internal_size: u64,
    /// Declared width, repeated.
    pub precision: u64,
    /// Number of decimals.
    pub scale: u8,
    /// Whether NULL is allowed.
    pub null_ok: bool,
}

impl ColumnDescription {
    /// The entry as a plain tuple.
    #[must_use]
    pub fn into_tuple(self) -> (String, u8, u64, u64, u64, u8, bool) {
        (
            self.name,
            self.type_code,
            self.display_size,
            self.internal_size,
            self.precision,
            self.scale,
            self.null_ok,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(flags: ColumnFlags) -> ColumnDefinition {
        ColumnDefinition {
            catalog: "def".into(),
            schema: "shop".into(),
            table: "o".into(),
            org_table: "orders".into(),
            name: "total".into(),
            org_name: "total_amount".into(),
            character_set: 63,
            column_length: 12,
            column_type: FieldType::NewDecimal as u8,
            flags,
            decimals: 2,
        }
    }

    #[test]
    fn test_field_from_definition() {
        let field = Field::new(definition(ColumnFlags::NOT_NULL), 7);
        assert_eq!(field.name(), "total");
        assert_eq!(field.org_name(), "total_amount");
        assert_eq!(field.table(), "o");
        assert_eq!(field.org_table(), "orders");
        assert_eq!(field.db(), "shop");
        assert_eq!(field.catalog(), "def");
        assert_eq!(field.length(), 12);
        assert_eq!(field.max_length(), 7);
        assert_eq!(field.charsetnr(), 63);
        assert_eq!(field.field_type(), Some(FieldType::NewDecimal));
        assert!(!field.is_nullable());
    }

    #[test]
    fn test_description_shape() {
        let field = Field::new(definition(ColumnFlags::empty()), 5);
        let tuple = field.description().into_tuple();
        assert_eq!(
            tuple,
            ("total".to_string(), FieldType::NewDecimal as u8, 5, 12, 12, 2, true)
        );
    }
}
