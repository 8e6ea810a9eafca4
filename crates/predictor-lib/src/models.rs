//! Core data models for the predictor tables
//!
//! Relational values and row sets exchanged with clients and datasources,
//! plus the catalog records that describe predictors and datasources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A single relational scalar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value; numeric text is accepted
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if f.is_finite() => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Equality used by WHERE clauses: numbers compare numerically, everything
    /// else compares by its rendered text.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Int(_) | Value::Float(_), _) | (_, Value::Int(_) | Value::Float(_)) => {
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => (a - b).abs() < 1e-9,
                    _ => self.to_string() == other.to_string(),
                }
            }
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A feature row keyed by column name
pub type Row = HashMap<String, Value>;

/// Ordered row set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Iterate over the values of one column, NULL where a row is short
    pub fn column_values<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |r| r.get(idx).unwrap_or(&Value::Null)))
    }

    /// Convert each row into a keyed record
    pub fn records(&self) -> Vec<Row> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned().chain(std::iter::repeat(Value::Null)))
                    .collect()
            })
            .collect()
    }

    /// Check that every row has one value per column
    pub fn validate(&self) -> Result<(), String> {
        if let Some((i, row)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != self.columns.len())
        {
            return Err(format!(
                "row {} has {} values, expected {}",
                i,
                row.len(),
                self.columns.len()
            ));
        }
        Ok(())
    }
}

/// Lifecycle status of a predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictorStatus {
    Generating,
    Training,
    Complete,
    Error,
}

impl PredictorStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PredictorStatus::Complete | PredictorStatus::Error)
    }

    fn rank(&self) -> u8 {
        match self {
            PredictorStatus::Generating => 0,
            PredictorStatus::Training => 1,
            PredictorStatus::Complete | PredictorStatus::Error => 2,
        }
    }

    /// Transitions only move forward; terminal states absorb
    pub fn can_transition_to(&self, next: PredictorStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        next.rank() >= self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictorStatus::Generating => "generating",
            PredictorStatus::Training => "training",
            PredictorStatus::Complete => "complete",
            PredictorStatus::Error => "error",
        }
    }
}

impl fmt::Display for PredictorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a predictor's training data comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum DataSource {
    /// A query run against the integration database
    Query(String),
    /// A registered datasource name
    External(String),
}

impl DataSource {
    /// Build from the two mutually exclusive insert columns
    pub fn from_parts(query: Option<String>, external: Option<String>) -> Result<Self, String> {
        let query = query.filter(|q| !q.trim().is_empty());
        let external = external.filter(|e| !e.trim().is_empty());
        match (query, external) {
            (Some(q), None) => Ok(DataSource::Query(q)),
            (None, Some(e)) => Ok(DataSource::External(e.trim().to_string())),
            (Some(_), Some(_)) => {
                Err("only one of select_data_query and external_datasource may be set".to_string())
            }
            (None, None) => {
                Err("one of select_data_query or external_datasource is required".to_string())
            }
        }
    }

    pub fn query(&self) -> Option<&str> {
        match self {
            DataSource::Query(q) => Some(q),
            DataSource::External(_) => None,
        }
    }

    pub fn external(&self) -> Option<&str> {
        match self {
            DataSource::External(e) => Some(e),
            DataSource::Query(_) => None,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Query(q) => write!(f, "query '{}'", q),
            DataSource::External(e) => write!(f, "datasource '{}'", e),
        }
    }
}

/// Options accepted in the `training_options` JSON document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingOptions {
    #[serde(default)]
    pub join_learn_process: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_training_in_x_seconds: Option<u64>,
    /// Unrecognized options, kept so they round-trip through the catalog
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TrainingOptions {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Trained model produced by a learner; the payload is private to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub id: Uuid,
    pub learner: String,
    pub trained_at: DateTime<Utc>,
    /// True when training was finalized by its deadline before converging
    pub early_stopped: bool,
    pub epochs: usize,
    pub payload: serde_json::Value,
}

impl ModelArtifact {
    pub fn new(learner: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            learner: learner.into(),
            trained_at: Utc::now(),
            early_stopped: false,
            epochs: 0,
            payload,
        }
    }
}

/// Catalog entry for a predictor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorRecord {
    pub name: String,
    pub predict_columns: Vec<String>,
    pub status: PredictorStatus,
    pub data_source: DataSource,
    pub training_options: TrainingOptions,
    /// Present once the predictor is complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Arc<ModelArtifact>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Bumped on every write
    pub version: u64,
    /// Number of successful trainings
    #[serde(default)]
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PredictorRecord {
    pub fn new(
        name: impl Into<String>,
        predict_columns: Vec<String>,
        data_source: DataSource,
        training_options: TrainingOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            predict_columns,
            status: PredictorStatus::Generating,
            data_source,
            training_options,
            model: None,
            error_message: None,
            version: 1,
            generation: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_predicted(&self, column: &str) -> bool {
        self.predict_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Kind of ingested datasource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    File,
    Db,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::File => write!(f, "file"),
            SourceKind::Db => write!(f, "db"),
        }
    }
}

/// Registered datasource metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceRecord {
    pub name: String,
    pub source_kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub registered_at: DateTime<Utc>,
}

/// One predicted target column of a result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedColumn {
    pub column: String,
    pub value: Value,
    pub confidence: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub explanation: String,
}

/// Result row of a predictor table: the input columns plus predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub input: Vec<(String, Value)>,
    pub predictions: Vec<PredictedColumn>,
}

impl PredictionRow {
    /// Resolve a result column, NULL for columns this row doesn't carry
    pub fn get(&self, column: &str) -> Value {
        for p in &self.predictions {
            if p.column.eq_ignore_ascii_case(column) {
                return p.value.clone();
            }
            if let Some(suffix) = strip_prefix_ci(column, &p.column).and_then(|s| s.strip_prefix('_')) {
                match suffix.to_ascii_lowercase().as_str() {
                    "confidence" => return Value::Float(p.confidence),
                    "min" => return p.lower.into(),
                    "max" => return p.upper.into(),
                    "explain" => return Value::Text(p.explanation.clone()),
                    _ => {}
                }
            }
        }
        self.input
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(column))
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null)
    }

    /// Column names of `SELECT *` over this row
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .input
            .iter()
            .filter(|(c, _)| !self.predictions.iter().any(|p| p.column.eq_ignore_ascii_case(c)))
            .map(|(c, _)| c.clone())
            .collect();
        for p in &self.predictions {
            names.push(p.column.clone());
            for suffix in ["confidence", "min", "max", "explain"] {
                names.push(format!("{}_{}", p.column, suffix));
            }
        }
        names
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s.is_char_boundary(prefix.len()) && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
