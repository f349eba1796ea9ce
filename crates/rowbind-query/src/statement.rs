//! SELECT, INSERT, UPDATE and DELETE statements.
//!
//! Each statement renders to `(sql, params)` through `to_sql`. Table and
//! column lists may be left empty at construction; the session fills them
//! from the record type before rendering.

use crate::placeholder::PlaceholderStyle;
use crate::predicate::{Order, Predicate, render_where};
use rowbind_core::{Error, Result, Value};
use std::fmt;

/// SELECT statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectStatement {
    columns: Vec<String>,
    table: String,
    predicates: Vec<Predicate>,
    order: Vec<Order>,
    limit: Option<u64>,
    offset: Option<u64>,
    style: PlaceholderStyle,
}

impl SelectStatement {
    /// Select the given columns. An empty list or `*` selects every mapped
    /// column of the record it is run against.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn placeholder(mut self, style: PlaceholderStyle) -> Self {
        self.style = style;
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether the column list still has to be filled from a record.
    pub fn selects_all(&self) -> bool {
        self.columns.is_empty() || (self.columns.len() == 1 && self.columns[0] == "*")
    }

    /// Fill the column list if it selects all columns.
    pub fn fill_columns(&mut self, columns: Vec<String>) {
        if self.selects_all() {
            self.columns = columns;
        }
    }

    /// Fill the table name if none was given.
    pub fn fill_table(&mut self, table: &str) {
        if self.table.is_empty() {
            self.table = table.to_string();
        }
    }

    pub fn set_placeholder(&mut self, style: PlaceholderStyle) {
        self.style = style;
    }

    /// The same query counting its rows: `COUNT(1)` with no ordering or
    /// paging.
    pub fn count(&self) -> SelectStatement {
        SelectStatement {
            columns: vec!["COUNT(1)".to_string()],
            table: self.table.clone(),
            predicates: self.predicates.clone(),
            order: Vec::new(),
            limit: None,
            offset: None,
            style: self.style,
        }
    }

    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        if self.table.is_empty() {
            return Err(Error::config("SELECT statement has no table"));
        }
        if self.columns.is_empty() {
            return Err(Error::config("SELECT statement has no columns"));
        }

        let mut params = Vec::new();
        let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), self.table);
        sql.push_str(&render_where(&self.predicates, self.style, &mut params));
        if !self.order.is_empty() {
            let terms: Vec<String> = self.order.iter().map(Order::to_sql).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok((sql, params))
    }
}

/// INSERT statement with one or more value rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertStatement {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    style: PlaceholderStyle,
}

impl InsertStatement {
    pub fn into_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn values(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn placeholder(mut self, style: PlaceholderStyle) -> Self {
        self.style = style;
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        if self.table.is_empty() {
            return Err(Error::config("INSERT statement has no table"));
        }
        if self.columns.is_empty() {
            return Err(Error::config("INSERT statement has no columns"));
        }
        if self.rows.is_empty() {
            return Err(Error::config("INSERT statement has no values"));
        }

        let mut params = Vec::with_capacity(self.columns.len() * self.rows.len());
        let mut tuples = Vec::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(Error::config(format!(
                    "INSERT row {i} has {} values for {} columns",
                    row.len(),
                    self.columns.len()
                )));
            }
            let marks: Vec<String> = row
                .iter()
                .map(|value| {
                    params.push(value.clone());
                    self.style.placeholder(params.len())
                })
                .collect();
            tuples.push(format!("({})", marks.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            self.columns.join(", "),
            tuples.join(", ")
        );
        Ok((sql, params))
    }
}

/// UPDATE statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateStatement {
    table: String,
    sets: Vec<(String, Value)>,
    predicates: Vec<Predicate>,
    style: PlaceholderStyle,
}

impl UpdateStatement {
    pub fn table_name(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sets.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn placeholder(mut self, style: PlaceholderStyle) -> Self {
        self.style = style;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fill_table(&mut self, table: &str) {
        if self.table.is_empty() {
            self.table = table.to_string();
        }
    }

    pub fn set_placeholder(&mut self, style: PlaceholderStyle) {
        self.style = style;
    }

    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        if self.table.is_empty() {
            return Err(Error::config("UPDATE statement has no table"));
        }
        if self.sets.is_empty() {
            return Err(Error::config("UPDATE statement has no SET entries"));
        }

        let mut params = Vec::new();
        let assignments: Vec<String> = self
            .sets
            .iter()
            .map(|(column, value)| {
                params.push(value.clone());
                format!("{column} = {}", self.style.placeholder(params.len()))
            })
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.table, assignments.join(", "));
        sql.push_str(&render_where(&self.predicates, self.style, &mut params));
        Ok((sql, params))
    }
}

/// DELETE statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteStatement {
    table: String,
    predicates: Vec<Predicate>,
    style: PlaceholderStyle,
}

impl DeleteStatement {
    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn placeholder(mut self, style: PlaceholderStyle) -> Self {
        self.style = style;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fill_table(&mut self, table: &str) {
        if self.table.is_empty() {
            self.table = table.to_string();
        }
    }

    pub fn set_placeholder(&mut self, style: PlaceholderStyle) {
        self.style = style;
    }

    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        if self.table.is_empty() {
            return Err(Error::config("DELETE statement has no table"));
        }
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.table);
        sql.push_str(&render_where(&self.predicates, self.style, &mut params));
        Ok((sql, params))
    }
}

/// Kind of a pending statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
        })
    }
}

/// Any statement a session can hold pending.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Select(_) => StatementKind::Select,
            Statement::Insert(_) => StatementKind::Insert,
            Statement::Update(_) => StatementKind::Update,
            Statement::Delete(_) => StatementKind::Delete,
        }
    }

    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        match self {
            Statement::Select(st) => st.to_sql(),
            Statement::Insert(st) => st.to_sql(),
            Statement::Update(st) => st.to_sql(),
            Statement::Delete(st) => st.to_sql(),
        }
    }
}

impl From<SelectStatement> for Statement {
    fn from(st: SelectStatement) -> Self {
        Statement::Select(st)
    }
}

impl From<InsertStatement> for Statement {
    fn from(st: InsertStatement) -> Self {
        Statement::Insert(st)
    }
}

impl From<UpdateStatement> for Statement {
    fn from(st: UpdateStatement) -> Self {
        Statement::Update(st)
    }
}

impl From<DeleteStatement> for Statement {
    fn from(st: DeleteStatement) -> Self {
        Statement::Delete(st)
    }
}

/// Start a SELECT of the given columns.
pub fn select<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> SelectStatement {
    SelectStatement::new(columns)
}

/// Start an INSERT.
pub fn insert() -> InsertStatement {
    InsertStatement::default()
}

/// Start an UPDATE.
pub fn update() -> UpdateStatement {
    UpdateStatement::default()
}

/// Start a DELETE.
pub fn delete() -> DeleteStatement {
    DeleteStatement::default()
}

/// Statement factory bound to a placeholder style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementBuilder {
    style: PlaceholderStyle,
}

impl StatementBuilder {
    pub fn new(style: PlaceholderStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> PlaceholderStyle {
        self.style
    }

    pub fn select<S: Into<String>>(&self, columns: impl IntoIterator<Item = S>) -> SelectStatement {
        select(columns).placeholder(self.style)
    }

    pub fn insert(&self) -> InsertStatement {
        insert().placeholder(self.style)
    }

    pub fn update(&self) -> UpdateStatement {
        update().placeholder(self.style)
    }

    pub fn delete(&self) -> DeleteStatement {
        delete().placeholder(self.style)
    }
}
