//! Typed statements produced by the parser

use crate::models::Value;

/// `[database.]name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub database: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(database: Option<&str>, name: &str) -> Self {
        Self {
            database: database.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// True when the table belongs to `database` (unqualified tables do)
    pub fn is_in(&self, database: &str) -> bool {
        self.database
            .as_deref()
            .map_or(true, |d| d.eq_ignore_ascii_case(database))
    }

    pub fn qualified(&self) -> String {
        match &self.database {
            Some(db) => format!("{}.{}", db, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

/// `column = literal`
#[derive(Debug, Clone, PartialEq)]
pub struct Equality {
    pub column: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub projection: Projection,
    pub from: TableRef,
    pub filter: Vec<Equality>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: TableRef,
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: TableRef,
    pub filter: Vec<Equality>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    ShowTables { database: Option<String> },
    Select(Select),
    Insert(Insert),
    Delete(Delete),
}

/// Find the value a conjunction of equalities assigns to `column`
pub fn filter_value<'a>(filter: &'a [Equality], column: &str) -> Option<&'a Value> {
    filter
        .iter()
        .find(|e| e.column.eq_ignore_ascii_case(column))
        .map(|e| &e.value)
}
