//! Run SQL statements against the predictor database

use anyhow::Result;

use crate::client::{ApiClient, SqlResponse};
use crate::output::{print_success, print_warning, render_rows, OutputFormat};

pub async fn run_sql(client: &ApiClient, statement: &str, format: OutputFormat) -> Result<()> {
    let response = client.sql(statement).await?;
    print_response(&response, format)
}

fn print_response(response: &SqlResponse, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response)?);
        }
        OutputFormat::Table if response.columns.is_empty() => {
            print_success(&format!("{} row(s) affected", response.affected_rows));
        }
        OutputFormat::Table if response.rows.is_empty() => {
            print_warning("Empty result set");
        }
        OutputFormat::Table => {
            println!("{}", render_rows(&response.columns, &response.rows));
            println!("\n{} row(s)", response.rows.len());
        }
    }
    Ok(())
}
