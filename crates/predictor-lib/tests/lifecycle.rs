//! End-to-end predictor lifecycle through SQL statements

use predictor_lib::catalog::FileCatalog;
use predictor_lib::{
    Dataset, PredictorEngine, PredictorStatus, QueryOutput, Session, SourceKind, Value,
};
use std::sync::Arc;

const LOCATIONS: [&str; 3] = ["poor", "good", "great"];

fn home_rentals(rows: i64) -> Dataset {
    Dataset::new(
        vec![
            "sqft".into(),
            "number_of_rooms".into(),
            "location".into(),
            "days_on_market".into(),
            "rental_price".into(),
        ],
        (0..rows)
            .map(|i| {
                let sqft = 400 + (i * 37) % 1200;
                let rooms = 1 + sqft / 400;
                let location = LOCATIONS[(i % 3) as usize];
                let premium = (i % 3) * 150;
                vec![
                    Value::Int(sqft),
                    Value::Int(rooms),
                    Value::from(location),
                    Value::Int(5 + (i * 7) % 40),
                    Value::Int(300 + sqft * 2 + premium),
                ]
            })
            .collect(),
    )
}

fn rows(output: QueryOutput) -> Dataset {
    match output {
        QueryOutput::Rows(data) => data,
        other => panic!("expected rows, got {:?}", other),
    }
}

fn cell<'a>(data: &'a Dataset, row: usize, column: &str) -> &'a Value {
    let idx = data
        .column_index(column)
        .unwrap_or_else(|| panic!("no column {} in {:?}", column, data.columns));
    &data.rows[row][idx]
}

async fn table_names(session: &Session) -> Vec<String> {
    rows(session.execute("show tables").await.unwrap())
        .rows
        .into_iter()
        .map(|r| r[0].to_string())
        .collect()
}

async fn engine() -> PredictorEngine {
    let engine = PredictorEngine::in_memory();
    engine
        .database()
        .load_table("test_data.home_rentals", home_rentals(150))
        .unwrap();
    engine.start().await.unwrap();
    engine
}

const CREATE_HOME_RENTALS: &str = "
    insert into mindsdb.predictors (name, predict, select_data_query, training_options) values
    (
        'test_predictor',
        'rental_price, location',
        'select * from test_data.home_rentals limit 100',
        '{\"join_learn_process\": true, \"stop_training_in_x_seconds\": 3}'
    );
";

const RESULT_COLUMNS: &str = "rental_price, location, sqft, number_of_rooms, \
     rental_price_confidence, rental_price_min, rental_price_max, rental_price_explain, \
     location_confidence, location_min";

async fn assert_created(session: &Session, name: &str) {
    let listed = rows(
        session
            .execute(&format!(
                "select status from mindsdb.predictors where name = '{}'",
                name
            ))
            .await
            .unwrap(),
    );
    assert_eq!(listed.len(), 1);
    assert_eq!(cell(&listed, 0, "status"), &Value::from("complete"));
    assert!(table_names(session).await.contains(&name.to_string()));
}

/// Checks one result row of a `rental_price, location` predictor
fn assert_prediction_row(data: &Dataset, row: usize) {
    assert!(!cell(data, row, "rental_price").is_null());
    assert!(cell(data, row, "location").as_str().is_some());

    let confidence = cell(data, row, "rental_price_confidence");
    assert!(matches!(confidence, Value::Float(c) if (0.0..=1.0).contains(c)));
    let estimate = cell(data, row, "rental_price").as_f64().unwrap();
    let Value::Float(lower) = *cell(data, row, "rental_price_min") else {
        panic!("rental_price_min should be a float");
    };
    let Value::Float(upper) = *cell(data, row, "rental_price_max") else {
        panic!("rental_price_max should be a float");
    };
    assert!(lower <= estimate && estimate <= upper);
    let explain = cell(data, row, "rental_price_explain").as_str().unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(explain).is_ok());

    // categorical targets carry confidence but no bounds
    assert!(matches!(cell(data, row, "location_confidence"), Value::Float(_)));
    assert!(cell(data, row, "location_min").is_null());
}

#[tokio::test]
async fn test_predictor_lifecycle() {
    let engine = engine().await;
    let session = engine.session();

    // Initial state
    let tables = table_names(&session).await;
    assert!(tables.contains(&"predictors".to_string()));
    assert!(tables.contains(&"commands".to_string()));
    assert!(!tables.contains(&"test_predictor".to_string()));

    // Create and wait for training
    let created = session.execute(CREATE_HOME_RENTALS).await.unwrap();
    assert_eq!(created, QueryOutput::Affected(1));
    assert_created(&session, "test_predictor").await;
    let record = engine.tables().predictors().get("test_predictor").await.unwrap();
    assert_eq!(record.predict_columns, vec!["rental_price", "location"]);
    assert_eq!(record.training_options.stop_training_in_x_seconds, Some(3));

    // External datasource
    engine
        .datasources()
        .register("test_external", SourceKind::File, Some("test.csv".into()), home_rentals(100))
        .await
        .unwrap();
    session
        .execute(
            "insert into mindsdb.predictors (name, predict, external_datasource, training_options) values
             (
                 'test_predictor_external',
                 'rental_price, location',
                 'test_external',
                 '{\"join_learn_process\": true, \"stop_training_in_x_seconds\": 3}'
             );",
        )
        .await
        .unwrap();
    assert_created(&session, "test_predictor_external").await;
    let external = rows(
        session
            .execute(&format!(
                "select {} from mindsdb.test_predictor_external where external_datasource='test_external'",
                RESULT_COLUMNS
            ))
            .await
            .unwrap(),
    );
    assert!(!external.is_empty());
    assert_prediction_row(&external, 0);

    // Point query
    let point = rows(
        session
            .execute(&format!(
                "select {} from mindsdb.test_predictor where sqft=1000;",
                RESULT_COLUMNS
            ))
            .await
            .unwrap(),
    );
    assert_eq!(point.len(), 1);
    assert_prediction_row(&point, 0);
    assert_eq!(cell(&point, 0, "sqft"), &Value::Int(1000));
    assert!(cell(&point, 0, "number_of_rooms").is_null());

    // Batch query from a sub-query
    let batch = rows(
        session
            .execute(&format!(
                "select {} from mindsdb.test_predictor \
                 where select_data_query='select * from test_data.home_rentals limit 3';",
                RESULT_COLUMNS
            ))
            .await
            .unwrap(),
    );
    assert_eq!(batch.len(), 3);
    for i in 0..3 {
        assert_prediction_row(&batch, i);
        assert!(!cell(&batch, i, "number_of_rooms").is_null());
    }

    // Delete through the command queue
    session
        .execute("insert into mindsdb.commands values ('delete predictor test_predictor');")
        .await
        .unwrap();
    assert!(!table_names(&session).await.contains(&"test_predictor".to_string()));
    let err = session
        .execute("select * from mindsdb.test_predictor where sqft=1000")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    // The name is free again
    session.execute(CREATE_HOME_RENTALS).await.unwrap();
    assert_created(&session, "test_predictor").await;
    assert_eq!(
        engine.orchestrator().status("test_predictor").await.unwrap(),
        PredictorStatus::Complete
    );

    // Delete through a statement
    let deleted = session
        .execute("delete from mindsdb.predictors where name='test_predictor';")
        .await
        .unwrap();
    assert_eq!(deleted, QueryOutput::Affected(1));
    let tables = table_names(&session).await;
    assert!(!tables.contains(&"test_predictor".to_string()));
    assert!(tables.contains(&"test_predictor_external".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_train_once() {
    let engine = engine().await;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let session = engine.session();
            tokio::spawn(async move { session.execute(CREATE_HOME_RENTALS).await })
        })
        .collect();

    let watcher = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for _ in 0..100 {
                assert!(engine.orchestrator().active_jobs() <= 1);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
    };

    let mut created = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(output) => {
                assert_eq!(output, QueryOutput::Affected(1));
                created += 1;
            }
            Err(e) => assert!(
                matches!(e.code(), "training_in_progress" | "duplicate_name"),
                "unexpected error {}",
                e.code()
            ),
        }
    }
    watcher.await.unwrap();

    assert_eq!(created, 1);
    let record = engine.tables().predictors().get("test_predictor").await.unwrap();
    assert_eq!(record.status, PredictorStatus::Complete);
    assert_eq!(record.generation, 1);
}

#[tokio::test]
async fn test_failed_training_is_queryable_as_error() {
    let engine = engine().await;
    let session = engine.session();

    let err = session
        .execute(
            "insert into mindsdb.predictors (name, predict, select_data_query, training_options) \
             values ('broken', 'no_such_column', 'select * from test_data.home_rentals', \
             '{\"join_learn_process\": true}')",
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "training_failed");

    let listed = rows(
        session
            .execute("select status, error from mindsdb.predictors where name = 'broken'")
            .await
            .unwrap(),
    );
    assert_eq!(cell(&listed, 0, "status"), &Value::from("error"));
    assert!(!cell(&listed, 0, "error").is_null());

    let err = session
        .execute("select * from mindsdb.broken where sqft = 1000")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "model_not_ready");
}

#[tokio::test]
async fn test_retrain_command_keeps_serving() {
    let engine = engine().await;
    let session = engine.session();
    session
        .execute(
            "insert into mindsdb.predictors (name, predict, select_data_query, training_options) \
             values ('p', 'rental_price', 'select * from test_data.home_rentals', \
             '{\"join_learn_process\": true}')",
        )
        .await
        .unwrap();
    let before = engine.tables().predictors().get("p").await.unwrap();

    session
        .execute("insert into mindsdb.commands values ('retrain predictor p')")
        .await
        .unwrap();

    let after = engine.tables().predictors().get("p").await.unwrap();
    assert_eq!(after.status, PredictorStatus::Complete);
    assert_eq!(after.generation, before.generation + 1);
    assert_ne!(
        after.model.as_ref().unwrap().id,
        before.model.as_ref().unwrap().id
    );
}

#[tokio::test]
async fn test_predictors_survive_restart_with_file_catalog() {
    let dir = tempfile::tempdir().unwrap();

    let first = PredictorEngine::builder()
        .catalog(Arc::new(FileCatalog::open(dir.path()).await.unwrap()))
        .build();
    first
        .database()
        .load_table("test_data.home_rentals", home_rentals(60))
        .unwrap();
    first.start().await.unwrap();
    first
        .session()
        .execute(
            "insert into mindsdb.predictors (name, predict, select_data_query, training_options) \
             values ('durable', 'rental_price', 'select * from test_data.home_rentals', \
             '{\"join_learn_process\": true}')",
        )
        .await
        .unwrap();
    first.shutdown("restart").await;

    let second = PredictorEngine::builder()
        .catalog(Arc::new(FileCatalog::open(dir.path()).await.unwrap()))
        .build();
    second.start().await.unwrap();
    let point = rows(
        second
            .session()
            .execute("select rental_price from mindsdb.durable where sqft = 900")
            .await
            .unwrap(),
    );
    assert!(point.rows[0][0].as_f64().is_some());
}
