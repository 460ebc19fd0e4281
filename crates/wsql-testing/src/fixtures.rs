//! Canned tables for tests.

use mysql_protocol::ColumnFlags;

use crate::mock_server::{MockColumn, MockResponse, MockServerBuilder};

/// A table a mock server can answer `SELECT * FROM <name>` for.
#[derive(Debug, Clone)]
pub struct TableFixture {
    /// Table name.
    pub name: String,
    /// Column definitions.
    pub columns: Vec<MockColumn>,
    /// Rows as text, `None` is SQL NULL.
    pub rows: Vec<Vec<Option<String>>>,
}

impl TableFixture {
    /// Create an empty fixture.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Add a column.
    #[must_use]
    pub fn with_column(mut self, column: MockColumn) -> Self {
        let table = self.name.clone();
        self.columns.push(column.with_table(table));
        self
    }

    /// Add a row.
    #[must_use]
    pub fn with_row(mut self, row: Vec<Option<&str>>) -> Self {
        self.rows
            .push(row.into_iter().map(|v| v.map(str::to_string)).collect());
        self
    }

    /// Three customers, one with a NULL email.
    #[must_use]
    pub fn customers() -> Self {
        Self::new("customers")
            .with_column(
                MockColumn::long("id")
                    .not_null()
                    .with_flags(ColumnFlags::PRI_KEY | ColumnFlags::AUTO_INCREMENT),
            )
            .with_column(MockColumn::varchar("name", 64).not_null())
            .with_column(MockColumn::varchar("email", 128))
            .with_column(MockColumn::decimal("balance", 10, 2).not_null())
            .with_row(vec![Some("1"), Some("Alice"), Some("alice@example.com"), Some("10.50")])
            .with_row(vec![Some("2"), Some("Bob"), None, Some("0.00")])
            .with_row(vec![Some("3"), Some("Carol"), Some("carol@example.com"), Some("1234.75")])
    }

    /// A single BIGINT column `n` holding `1..=count`.
    #[must_use]
    pub fn numbers(count: u64) -> Self {
        let mut fixture = Self::new("numbers").with_column(MockColumn::longlong("n").not_null());
        fixture.rows = (1..=count).map(|n| vec![Some(n.to_string())]).collect();
        fixture
    }

    /// `SELECT * FROM <name>`.
    #[must_use]
    pub fn select_sql(&self) -> String {
        format!("SELECT * FROM {}", self.name)
    }

    /// The result set for [`select_sql`](Self::select_sql).
    #[must_use]
    pub fn response(&self) -> MockResponse {
        let rows = self
            .rows
            .iter()
            .map(|row| row.iter().map(|v| v.as_deref()).collect())
            .collect();
        MockResponse::rows(self.columns.clone(), rows)
    }

    /// Register the select with `builder`.
    #[must_use]
    pub fn install(&self, builder: MockServerBuilder) -> MockServerBuilder {
        builder.with_response(self.select_sql(), self.response())
    }
}
