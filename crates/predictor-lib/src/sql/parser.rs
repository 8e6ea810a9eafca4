//! Pest-based parser for the statement subset

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use super::ast::*;
use crate::models::Value;

#[derive(Parser)]
#[grammar = "sql/grammar.pest"]
struct StatementParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("{0}")]
    Pest(#[from] Box<pest::error::Error<Rule>>),
}

/// Parse one statement
pub fn parse(source: &str) -> Result<Statement, ParseError> {
    let mut pairs = StatementParser::parse(Rule::statement, source).map_err(Box::new)?;
    let statement = pairs
        .next()
        .and_then(|p| p.into_inner().next())
        .ok_or_else(|| ParseError::Syntax("empty statement".to_string()))?;

    match statement.as_rule() {
        Rule::show_tables => {
            let database = statement.into_inner().next().map(parse_ident);
            Ok(Statement::ShowTables { database })
        }
        Rule::select_stmt => parse_select(statement).map(Statement::Select),
        Rule::insert_stmt => parse_insert(statement).map(Statement::Insert),
        Rule::delete_stmt => parse_delete(statement).map(Statement::Delete),
        other => Err(ParseError::Syntax(format!("unexpected {:?}", other))),
    }
}

fn parse_select(pair: Pair<Rule>) -> Result<Select, ParseError> {
    let mut projection = Projection::All;
    let mut from = None;
    let mut filter = Vec::new();
    let mut limit = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::projection => projection = parse_projection(part)?,
            Rule::table_ref => from = Some(parse_table_ref(part)?),
            Rule::where_clause => filter = parse_where(part)?,
            Rule::limit_clause => {
                let raw = part.into_inner().next().map(|p| p.as_str()).unwrap_or("");
                limit = Some(
                    raw.parse::<usize>()
                        .map_err(|_| ParseError::Syntax(format!("invalid LIMIT '{}'", raw)))?,
                );
            }
            _ => {}
        }
    }

    Ok(Select {
        projection,
        from: from.ok_or_else(|| ParseError::Syntax("missing FROM".to_string()))?,
        filter,
        limit,
    })
}

fn parse_insert(pair: Pair<Rule>) -> Result<Insert, ParseError> {
    let mut table = None;
    let mut columns = None;
    let mut rows = Vec::new();

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::table_ref => table = Some(parse_table_ref(part)?),
            Rule::insert_columns => {
                let list = part
                    .into_inner()
                    .next()
                    .ok_or_else(|| ParseError::Syntax("empty column list".to_string()))?;
                columns = Some(list.into_inner().map(parse_ident).collect());
            }
            Rule::tuple => {
                let row = part
                    .into_inner()
                    .map(parse_literal)
                    .collect::<Result<Vec<_>, _>>()?;
                rows.push(row);
            }
            _ => {}
        }
    }

    Ok(Insert {
        table: table.ok_or_else(|| ParseError::Syntax("missing INTO".to_string()))?,
        columns,
        rows,
    })
}

fn parse_delete(pair: Pair<Rule>) -> Result<Delete, ParseError> {
    let mut table = None;
    let mut filter = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::table_ref => table = Some(parse_table_ref(part)?),
            Rule::where_clause => filter = parse_where(part)?,
            _ => {}
        }
    }
    Ok(Delete {
        table: table.ok_or_else(|| ParseError::Syntax("missing FROM".to_string()))?,
        filter,
    })
}

fn parse_projection(pair: Pair<Rule>) -> Result<Projection, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::Syntax("empty projection".to_string()))?;
    match inner.as_rule() {
        Rule::star => Ok(Projection::All),
        _ => Ok(Projection::Columns(inner.into_inner().map(parse_ident).collect())),
    }
}

fn parse_where(pair: Pair<Rule>) -> Result<Vec<Equality>, ParseError> {
    pair.into_inner()
        .map(|eq| {
            let mut inner = eq.into_inner();
            let column = inner
                .next()
                .map(parse_ident)
                .ok_or_else(|| ParseError::Syntax("missing column in WHERE".to_string()))?;
            let value = inner
                .next()
                .ok_or_else(|| ParseError::Syntax("missing value in WHERE".to_string()))
                .and_then(parse_literal)?;
            Ok(Equality { column, value })
        })
        .collect()
}

fn parse_table_ref(pair: Pair<Rule>) -> Result<TableRef, ParseError> {
    let parts: Vec<String> = pair.into_inner().map(parse_ident).collect();
    match parts.as_slice() {
        [name] => Ok(TableRef::new(None, name)),
        [db, name] => Ok(TableRef::new(Some(db), name)),
        _ => Err(ParseError::Syntax("invalid table reference".to_string())),
    }
}

fn parse_ident(pair: Pair<Rule>) -> String {
    match pair.into_inner().next() {
        Some(inner) if inner.as_rule() == Rule::quoted_ident => inner
            .into_inner()
            .next()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default(),
        Some(inner) => inner.as_str().to_string(),
        None => String::new(),
    }
}

fn parse_literal(pair: Pair<Rule>) -> Result<Value, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::Syntax("empty literal".to_string()))?;
    let raw = inner.as_str();
    match inner.as_rule() {
        Rule::string => {
            let body = inner
                .into_inner()
                .next()
                .map(|p| p.as_str())
                .unwrap_or("");
            Ok(Value::Text(body.replace("''", "'")))
        }
        Rule::integer => raw
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| raw.parse::<f64>().map(Value::Float))
            .map_err(|_| ParseError::Syntax(format!("invalid number '{}'", raw))),
        Rule::float => raw
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| ParseError::Syntax(format!("invalid number '{}'", raw))),
        Rule::boolean => Ok(Value::Bool(raw.eq_ignore_ascii_case("true"))),
        Rule::null => Ok(Value::Null),
        other => Err(ParseError::Syntax(format!("unexpected literal {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_predictor_insert() {
        let stmt = parse(
            r#"
            insert into mindsdb.predictors (name, predict, select_data_query, training_options) values
            (
                'test_predictor',
                'rental_price, location',
                'select * from test_data.home_rentals limit 100',
                '{"join_learn_process": true, "stop_training_in_x_seconds": 3}'
            );
            "#,
        )
        .unwrap();

        let Statement::Insert(insert) = stmt else {
            panic!("expected insert");
        };
        assert_eq!(insert.table, TableRef::new(Some("mindsdb"), "predictors"));
        assert_eq!(
            insert.columns.unwrap(),
            vec!["name", "predict", "select_data_query", "training_options"]
        );
        assert_eq!(insert.rows.len(), 1);
        assert_eq!(insert.rows[0][0], Value::Text("test_predictor".into()));
        assert_eq!(
            insert.rows[0][3],
            Value::Text(r#"{"join_learn_process": true, "stop_training_in_x_seconds": 3}"#.into())
        );
    }

    #[test]
    fn test_parse_point_query() {
        let stmt = parse(
            "SELECT rental_price, location, sqft, rental_price_confidence \
             FROM mindsdb.test_predictor WHERE sqft=1000;",
        )
        .unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected select");
        };
        assert_eq!(
            select.projection,
            Projection::Columns(vec![
                "rental_price".into(),
                "location".into(),
                "sqft".into(),
                "rental_price_confidence".into()
            ])
        );
        assert_eq!(select.from.name, "test_predictor");
        assert_eq!(
            select.filter,
            vec![Equality {
                column: "sqft".into(),
                value: Value::Int(1000)
            }]
        );
        assert_eq!(select.limit, None);
    }

    #[test]
    fn test_parse_select_with_limit_and_conjunction() {
        let stmt = parse("select * from test_data.home_rentals where a = 'x' and b = -2.5 limit 3").unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected select");
        };
        assert_eq!(select.projection, Projection::All);
        assert_eq!(select.filter.len(), 2);
        assert_eq!(select.filter[1].value, Value::Float(-2.5));
        assert_eq!(select.limit, Some(3));
    }

    #[test]
    fn test_parse_command_insert_and_escapes() {
        let stmt = parse("insert into mindsdb.commands values ('delete predictor it''s')").unwrap();
        let Statement::Insert(insert) = stmt else {
            panic!("expected insert");
        };
        assert!(insert.columns.is_none());
        assert_eq!(insert.rows[0][0], Value::Text("delete predictor it's".into()));
    }

    #[test]
    fn test_parse_show_and_delete() {
        assert_eq!(
            parse("show tables from mindsdb").unwrap(),
            Statement::ShowTables {
                database: Some("mindsdb".into())
            }
        );
        let Statement::Delete(delete) =
            parse("DELETE FROM `mindsdb`.predictors WHERE name = 'p1'").unwrap()
        else {
            panic!("expected delete");
        };
        assert_eq!(delete.table.database.as_deref(), Some("mindsdb"));
        assert_eq!(filter_value(&delete.filter, "NAME"), Some(&Value::Text("p1".into())));
    }

    #[test]
    fn test_parse_literals() {
        let Statement::Insert(insert) =
            parse("insert into t values (1, 2.0, true, NULL, 'a')").unwrap()
        else {
            panic!("expected insert");
        };
        assert_eq!(
            insert.rows[0],
            vec![
                Value::Int(1),
                Value::Float(2.0),
                Value::Bool(true),
                Value::Null,
                Value::Text("a".into())
            ]
        );
    }

    #[test]
    fn test_rejects_unsupported_sql() {
        assert!(parse("update t set a = 1").is_err());
        assert!(parse("select from").is_err());
        assert!(parse("").is_err());
    }
}
