//! SQL statement subset understood by the predictor tables
//!
//! The front end hands raw statement text to [`parse`]; the resulting
//! [`Statement`] is routed by [`crate::tables::VirtualTables`].

mod ast;
mod eval;
mod parser;

pub use ast::{filter_value, Delete, Equality, Insert, Projection, Select, Statement, TableRef};
pub use eval::apply_select;
pub use parser::{parse, ParseError};

use crate::error::PredictorError;

impl From<ParseError> for PredictorError {
    fn from(e: ParseError) -> Self {
        PredictorError::InvalidStatement(e.to_string())
    }
}
