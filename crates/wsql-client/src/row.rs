//! Result rows.
//!
//! Values are the exact bytes the server sent, or `None` for SQL NULL.
//! They are slices of the received packet, so a row holds no copies.

use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;

use crate::field::Field;

/// One row of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    values: Vec<Option<Bytes>>,
    fields: Arc<[Field]>,
}

impl Row {
    pub(crate) fn new(values: Vec<Option<Bytes>>, fields: Arc<[Field]>) -> Self {
        Self { values, fields }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value of column `index`; `None` for NULL or out of range.
    #[must_use]
    pub fn get_bytes(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index)?.as_deref()
    }

    /// Column value as text, replacing invalid UTF-8.
    #[must_use]
    pub fn get_str(&self, index: usize) -> Option<Cow<'_, str>> {
        self.get_bytes(index).map(String::from_utf8_lossy)
    }

    /// Raw value of the first column called `name`.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&[u8]> {
        let index = self.fields.iter().position(|f| f.name() == name)?;
        self.get_bytes(index)
    }

    /// Whether column `index` is NULL.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.values.get(index), Some(None))
    }

    /// Column metadata shared with the owning result.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[Option<Bytes>] {
        &self.values
    }

    /// Take the values out of the row.
    #[must_use]
    pub fn into_values(self) -> Vec<Option<Bytes>> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access() {
        let row = Row::new(
            vec![Some(Bytes::from_static(b"42")), None, Some(Bytes::new())],
            Arc::from(Vec::new()),
        );
        assert_eq!(row.len(), 3);
        assert_eq!(row.get_bytes(0), Some(&b"42"[..]));
        assert_eq!(row.get_str(0).as_deref(), Some("42"));
        assert!(row.is_null(1));
        assert!(!row.is_null(2));
        assert_eq!(row.get_bytes(2), Some(&b""[..]));
        assert!(!row.is_null(9));
        assert_eq!(row.get_bytes(9), None);
        assert_eq!(row.get_by_name("missing"), None);
    }
}
