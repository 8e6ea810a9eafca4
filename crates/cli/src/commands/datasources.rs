//! Datasource registry commands

use anyhow::Result;
use std::path::Path;
use tabled::Tabled;

use super::read_dataset;
use crate::client::{ApiClient, DatasourceRecord, RegisterDatasourceRequest};
use crate::output::{print_success, print_table, OutputFormat};

#[derive(Tabled, serde::Serialize)]
struct DatasourceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "Columns")]
    columns: usize,
    #[tabled(rename = "Rows")]
    rows: usize,
    #[tabled(rename = "Registered")]
    registered_at: String,
}

pub async fn list_datasources(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let datasources: Vec<DatasourceRecord> = client.get("api/v1/datasources").await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&datasources)?);
        return Ok(());
    }
    let rows: Vec<DatasourceRow> = datasources
        .into_iter()
        .map(|d| DatasourceRow {
            name: d.name,
            kind: d.source_kind,
            location: d.location.unwrap_or_else(|| "-".to_string()),
            columns: d.columns.len(),
            rows: d.row_count,
            registered_at: d.registered_at,
        })
        .collect();
    print_table(&rows, format)
}

pub async fn register_datasource(
    client: &ApiClient,
    name: &str,
    file: &Path,
    kind: &str,
    location: Option<String>,
) -> Result<()> {
    let data = read_dataset(file)?;
    let request = RegisterDatasourceRequest {
        kind: kind.to_string(),
        location: location.or_else(|| Some(file.display().to_string())),
        data,
    };
    let record: DatasourceRecord = client
        .post(&format!("api/v1/datasources/{}", name), &request)
        .await?;
    print_success(&format!(
        "Datasource '{}' registered ({} rows)",
        record.name, record.row_count
    ));
    Ok(())
}

pub async fn drop_datasource(client: &ApiClient, name: &str) -> Result<()> {
    client.delete(&format!("api/v1/datasources/{}", name)).await?;
    print_success(&format!("Datasource '{}' dropped", name));
    Ok(())
}
