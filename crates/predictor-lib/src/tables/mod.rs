//! Virtual tables behind the predictor database
//!
//! [`VirtualTables::execute`] parses a statement and routes it:
//! - `predictors`: the catalog (list, create, delete)
//! - `commands`: the command queue
//! - any other table in the predictor database: that predictor's results
//! - `SELECT`s against other databases go to the integration database

mod commands;
mod predictors;

pub use commands::{Command, CommandsTable};
pub use predictors::{PredictionQuery, PredictorsTable};

use crate::datasource::QuerySource;
use crate::error::{PredictorError, Result};
use crate::models::{DataSource, Dataset, PredictionRow, PredictorRecord, TrainingOptions, Value};
use crate::observability::ServiceMetrics;
use crate::orchestrator::TrainingRequest;
use crate::sql::{self, filter_value, Delete, Insert, Projection, Select, Statement};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const PREDICTORS_TABLE: &str = "predictors";
pub const COMMANDS_TABLE: &str = "commands";

/// Columns of the predictors table
pub const PREDICTOR_COLUMNS: &[&str] = &[
    "name",
    "status",
    "predict",
    "select_data_query",
    "external_datasource",
    "training_options",
    "error",
    "created_at",
    "updated_at",
];

/// Column order of `INSERT INTO predictors VALUES (...)` without a column list
pub const DEFAULT_INSERT_COLUMNS: &[&str] = &[
    "name",
    "predict",
    "select_data_query",
    "external_datasource",
    "training_options",
];

/// Result of one statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutput {
    Rows(Dataset),
    Affected(u64),
}

pub struct VirtualTables {
    database: String,
    predictors: Arc<PredictorsTable>,
    commands: CommandsTable,
    integration: Arc<dyn QuerySource>,
    metrics: ServiceMetrics,
}

impl VirtualTables {
    pub fn new(
        database: impl Into<String>,
        predictors: Arc<PredictorsTable>,
        commands: CommandsTable,
        integration: Arc<dyn QuerySource>,
    ) -> Self {
        Self {
            database: database.into(),
            predictors,
            commands,
            integration,
            metrics: ServiceMetrics::new(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn predictors(&self) -> &Arc<PredictorsTable> {
        &self.predictors
    }

    pub fn commands(&self) -> &CommandsTable {
        &self.commands
    }

    pub async fn execute(&self, sql: &str) -> Result<QueryOutput> {
        let result = self.dispatch(sql).await;
        if let Err(e) = &result {
            self.metrics.inc_statement_error(e.code());
            debug!(error = %e, code = e.code(), "Statement failed");
        }
        result
    }

    async fn dispatch(&self, sql: &str) -> Result<QueryOutput> {
        match sql::parse(sql)? {
            Statement::ShowTables { database } => self.show_tables(database.as_deref()).await,
            Statement::Select(select) if !select.from.is_in(&self.database) => {
                Ok(QueryOutput::Rows(self.integration.fetch(sql).await?))
            }
            Statement::Select(select) => self.select(&select).await,
            Statement::Insert(insert) => self.insert(&insert).await,
            Statement::Delete(delete) => self.delete(&delete).await,
        }
    }

    fn check_database(&self, table: &sql::TableRef) -> Result<()> {
        if table.is_in(&self.database) {
            Ok(())
        } else {
            Err(PredictorError::InvalidStatement(format!(
                "only SELECT is supported outside the '{}' database",
                self.database
            )))
        }
    }

    async fn show_tables(&self, database: Option<&str>) -> Result<QueryOutput> {
        if let Some(db) = database {
            if !db.eq_ignore_ascii_case(&self.database) {
                return Err(PredictorError::InvalidStatement(format!(
                    "unknown database '{}'",
                    db
                )));
            }
        }
        let mut rows = vec![
            vec![Value::from(PREDICTORS_TABLE)],
            vec![Value::from(COMMANDS_TABLE)],
        ];
        rows.extend(
            self.predictors
                .list()
                .await?
                .into_iter()
                .map(|r| vec![Value::Text(r.name)]),
        );
        Ok(QueryOutput::Rows(Dataset::new(vec!["table_name".to_string()], rows)))
    }

    async fn select(&self, select: &Select) -> Result<QueryOutput> {
        let table = select.from.name.as_str();
        if table.eq_ignore_ascii_case(PREDICTORS_TABLE) {
            let records = self.predictors.list().await?;
            let catalog = predictors_dataset(&records);
            return sql::apply_select(select, &catalog)
                .map(QueryOutput::Rows)
                .map_err(PredictorError::InvalidStatement);
        }
        if table.eq_ignore_ascii_case(COMMANDS_TABLE) {
            let empty = Dataset::empty(vec!["command".to_string()]);
            return sql::apply_select(select, &empty)
                .map(QueryOutput::Rows)
                .map_err(PredictorError::InvalidStatement);
        }

        let record = self.predictors.get(table).await?;
        let query = prediction_query(select)?;
        let mut rows = self.predictors.query(&record.name, query).await?;
        if let Some(limit) = select.limit {
            rows.truncate(limit);
        }
        Ok(QueryOutput::Rows(result_dataset(&record, &rows, &select.projection)))
    }

    async fn insert(&self, insert: &Insert) -> Result<QueryOutput> {
        self.check_database(&insert.table)?;
        let table = insert.table.name.as_str();

        if table.eq_ignore_ascii_case(PREDICTORS_TABLE) {
            let columns: Vec<String> = match &insert.columns {
                Some(cols) => cols.clone(),
                None => DEFAULT_INSERT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            };
            let mut created = 0;
            for row in &insert.rows {
                let request = training_request(&columns, row)?;
                self.predictors.create(request).await?;
                created += 1;
            }
            return Ok(QueryOutput::Affected(created));
        }

        if table.eq_ignore_ascii_case(COMMANDS_TABLE) {
            if let Some(cols) = &insert.columns {
                if cols.len() != 1 || !cols[0].eq_ignore_ascii_case("command") {
                    return Err(PredictorError::InvalidStatement(
                        "the commands table has a single 'command' column".to_string(),
                    ));
                }
            }
            let mut executed = 0;
            for row in &insert.rows {
                match row.as_slice() {
                    [Value::Text(command)] => self.commands.execute(command).await?,
                    [other] => return Err(PredictorError::UnknownCommand(other.to_string())),
                    _ => {
                        return Err(PredictorError::InvalidStatement(
                            "a command is a single string value".to_string(),
                        ))
                    }
                }
                executed += 1;
            }
            return Ok(QueryOutput::Affected(executed));
        }

        Err(PredictorError::InvalidStatement(format!(
            "table '{}' does not accept inserts",
            insert.table.qualified()
        )))
    }

    async fn delete(&self, delete: &Delete) -> Result<QueryOutput> {
        self.check_database(&delete.table)?;
        if !delete.table.name.eq_ignore_ascii_case(PREDICTORS_TABLE) {
            return Err(PredictorError::InvalidStatement(format!(
                "table '{}' does not accept deletes",
                delete.table.qualified()
            )));
        }
        if delete.filter.is_empty() {
            return Err(PredictorError::InvalidRequest(
                "DELETE FROM predictors needs a WHERE clause".to_string(),
            ));
        }

        let records = self.predictors.list().await?;
        let select = Select {
            projection: Projection::Columns(vec!["name".to_string()]),
            from: delete.table.clone(),
            filter: delete.filter.clone(),
            limit: None,
        };
        let matching = sql::apply_select(&select, &predictors_dataset(&records))
            .map_err(PredictorError::InvalidStatement)?;

        if matching.is_empty() {
            if let Some(name) = filter_value(&delete.filter, "name") {
                return Err(PredictorError::NotFound(name.to_string()));
            }
        }
        let mut deleted = 0;
        for row in &matching.rows {
            if let Some(Value::Text(name)) = row.first() {
                self.predictors.delete(name).await?;
                deleted += 1;
            }
        }
        Ok(QueryOutput::Affected(deleted))
    }
}

/// One row per record in `PREDICTOR_COLUMNS` order
fn predictors_dataset(records: &[PredictorRecord]) -> Dataset {
    let rows = records
        .iter()
        .map(|r| {
            vec![
                Value::Text(r.name.clone()),
                Value::from(r.status.as_str()),
                Value::Text(r.predict_columns.join(", ")),
                r.data_source.query().map(str::to_string).into(),
                r.data_source.external().map(str::to_string).into(),
                Value::Text(r.training_options.to_json()),
                r.error_message.clone().into(),
                Value::Text(r.created_at.to_rfc3339()),
                Value::Text(r.updated_at.to_rfc3339()),
            ]
        })
        .collect();
    Dataset::new(PREDICTOR_COLUMNS.iter().map(|c| c.to_string()).collect(), rows)
}

/// Text view of a literal; NULL and blank strings are absent
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Text(s) if s.trim().is_empty() => None,
        Value::Text(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn training_request(columns: &[String], row: &[Value]) -> Result<TrainingRequest> {
    if row.len() != columns.len() {
        return Err(PredictorError::InvalidStatement(format!(
            "{} values for {} columns",
            row.len(),
            columns.len()
        )));
    }

    let mut name = None;
    let mut predict = None;
    let mut query = None;
    let mut external = None;
    let mut options = None;
    for (column, value) in columns.iter().zip(row) {
        let slot = match column.to_ascii_lowercase().as_str() {
            "name" => &mut name,
            "predict" => &mut predict,
            "select_data_query" => &mut query,
            "external_datasource" => &mut external,
            "training_options" => &mut options,
            other => {
                return Err(PredictorError::InvalidStatement(format!(
                    "unknown predictors column '{}'",
                    other
                )))
            }
        };
        *slot = text_of(value);
    }

    let name = name
        .map(|n| n.trim().to_string())
        .ok_or_else(|| PredictorError::InvalidRequest("name is required".to_string()))?;
    if name.eq_ignore_ascii_case(PREDICTORS_TABLE) || name.eq_ignore_ascii_case(COMMANDS_TABLE) {
        return Err(PredictorError::InvalidRequest(format!(
            "'{}' is a reserved table name",
            name
        )));
    }
    let predict_columns: Vec<String> = predict
        .unwrap_or_default()
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    let data_source =
        DataSource::from_parts(query, external).map_err(PredictorError::InvalidRequest)?;
    let options = TrainingOptions::parse(options.as_deref().unwrap_or(""))
        .map_err(|e| PredictorError::InvalidRequest(format!("invalid training_options: {}", e)))?;

    Ok(TrainingRequest {
        name,
        predict_columns,
        data_source,
        options,
    })
}

/// Point query unless the WHERE clause names a data query or datasource
fn prediction_query(select: &Select) -> Result<PredictionQuery> {
    let text = |column: &str| -> Result<Option<String>> {
        match filter_value(&select.filter, column) {
            None => Ok(None),
            Some(value) => text_of(value).map(Some).ok_or_else(|| {
                PredictorError::InvalidRequest(format!("{} must be a non-empty string", column))
            }),
        }
    };
    let query = text("select_data_query")?;
    let external = text("external_datasource")?;

    let rest: Vec<(String, Value)> = select
        .filter
        .iter()
        .filter(|eq| {
            !eq.column.eq_ignore_ascii_case("select_data_query")
                && !eq.column.eq_ignore_ascii_case("external_datasource")
        })
        .map(|eq| (eq.column.clone(), eq.value.clone()))
        .collect();

    if query.is_none() && external.is_none() {
        return Ok(PredictionQuery::Point(rest));
    }
    let source = DataSource::from_parts(query, external).map_err(PredictorError::InvalidRequest)?;
    Ok(PredictionQuery::Batch {
        source,
        overrides: rest,
    })
}

/// Project prediction rows onto the requested columns
fn result_dataset(record: &PredictorRecord, rows: &[PredictionRow], projection: &Projection) -> Dataset {
    let columns = match projection {
        Projection::Columns(cols) => cols.clone(),
        Projection::All => match rows.first() {
            Some(row) => row.column_names(),
            None => record
                .predict_columns
                .iter()
                .flat_map(|t| {
                    std::iter::once(t.clone()).chain(
                        ["confidence", "min", "max", "explain"]
                            .into_iter()
                            .map(move |s| format!("{}_{}", t, s)),
                    )
                })
                .collect(),
        },
    };
    let values = rows
        .iter()
        .map(|row| columns.iter().map(|c| row.get(c)).collect())
        .collect();
    Dataset::new(columns, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse;

    fn select(sql: &str) -> Select {
        match parse(sql).unwrap() {
            Statement::Select(s) => s,
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn test_training_request_default_column_order() {
        let columns: Vec<String> = DEFAULT_INSERT_COLUMNS.iter().map(|c| c.to_string()).collect();
        let request = training_request(
            &columns,
            &[
                "p".into(),
                "rental_price, location".into(),
                Value::Null,
                "rentals".into(),
                r#"{"join_learn_process": true}"#.into(),
            ],
        )
        .unwrap();
        assert_eq!(request.name, "p");
        assert_eq!(request.predict_columns, vec!["rental_price", "location"]);
        assert_eq!(request.data_source, DataSource::External("rentals".into()));
        assert!(request.options.join_learn_process);
    }

    #[test]
    fn test_training_request_errors() {
        let columns = vec!["name".to_string(), "predict".to_string()];
        let err = training_request(&columns, &["p".into(), "x".into()]).unwrap_err();
        assert_eq!(err.code(), "invalid_request");

        let err = training_request(&columns, &["p".into()]).unwrap_err();
        assert_eq!(err.code(), "invalid_statement");

        let columns = vec!["name".to_string(), "bogus".to_string()];
        assert!(training_request(&columns, &["p".into(), "x".into()]).is_err());

        let columns = vec![
            "name".to_string(),
            "predict".to_string(),
            "select_data_query".to_string(),
            "training_options".to_string(),
        ];
        let err = training_request(
            &columns,
            &["p".into(), "y".into(), "select 1 from t".into(), "{not json".into()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("training_options"));

        let err = training_request(
            &columns,
            &["commands".into(), "y".into(), "select * from t".into(), Value::Null],
        )
        .unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_prediction_query_modes() {
        assert_eq!(
            prediction_query(&select("select * from mindsdb.p where sqft = 1000")).unwrap(),
            PredictionQuery::Point(vec![("sqft".to_string(), Value::Int(1000))])
        );

        let batch = prediction_query(&select(
            "select * from mindsdb.p where select_data_query = 'select * from t' and location = 'good'",
        ))
        .unwrap();
        assert_eq!(
            batch,
            PredictionQuery::Batch {
                source: DataSource::Query("select * from t".into()),
                overrides: vec![("location".to_string(), "good".into())],
            }
        );

        let both = prediction_query(&select(
            "select * from p where select_data_query = 'q' and external_datasource = 'ds'",
        ));
        assert_eq!(both.unwrap_err().code(), "invalid_request");
    }

    #[test]
    fn test_predictors_dataset_columns() {
        let mut record = PredictorRecord::new(
            "p",
            vec!["a".to_string(), "b".to_string()],
            DataSource::Query("select * from t".into()),
            TrainingOptions::default(),
        );
        record.error_message = Some("boom".into());
        let ds = predictors_dataset(&[record]);
        assert_eq!(ds.columns.len(), PREDICTOR_COLUMNS.len());
        assert_eq!(ds.rows[0][1], Value::from("generating"));
        assert_eq!(ds.rows[0][2], Value::from("a, b"));
        assert_eq!(ds.rows[0][3], Value::from("select * from t"));
        assert_eq!(ds.rows[0][4], Value::Null);
        assert_eq!(ds.rows[0][6], Value::from("boom"));
    }
}
