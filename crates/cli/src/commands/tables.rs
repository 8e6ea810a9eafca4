//! Tables of the integration database

use anyhow::Result;
use std::path::Path;

use super::read_dataset;
use crate::client::ApiClient;
use crate::output::{print_success, print_warning, OutputFormat};

pub async fn list_tables(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let tables: Vec<String> = client.get("api/v1/tables").await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tables)?),
        OutputFormat::Table if tables.is_empty() => print_warning("No tables loaded"),
        OutputFormat::Table => {
            for table in tables {
                println!("{}", table);
            }
        }
    }
    Ok(())
}

/// `table` is `db.table`, as used in `select_data_query`
pub async fn load_table(client: &ApiClient, table: &str, file: &Path) -> Result<()> {
    if !table.contains('.') {
        anyhow::bail!("table name must be qualified as <database>.<table>");
    }
    let data = read_dataset(file)?;
    let rows = data.rows.len();
    client
        .post_empty(&format!("api/v1/tables/{}", table), &data)
        .await?;
    print_success(&format!("Loaded {} rows into {}", rows, table));
    Ok(())
}

pub async fn drop_table(client: &ApiClient, table: &str) -> Result<()> {
    client.delete(&format!("api/v1/tables/{}", table)).await?;
    print_success(&format!("Table {} dropped", table));
    Ok(())
}
