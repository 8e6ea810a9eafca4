//! Predictor management commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, PredictorSummary};
use crate::output::{color_status, print_success, print_table, print_warning, OutputFormat};

/// Row for the predictors table
#[derive(Tabled, serde::Serialize)]
struct PredictorRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Predict")]
    predict: String,
    #[tabled(rename = "Data Source")]
    data_source: String,
    #[tabled(rename = "Gen")]
    generation: u64,
    #[tabled(rename = "Updated")]
    updated_at: String,
}

impl From<&PredictorSummary> for PredictorRow {
    fn from(p: &PredictorSummary) -> Self {
        let status = if p.training && p.status == "complete" {
            format!("{} (retraining)", color_status(&p.status))
        } else {
            color_status(&p.status)
        };
        Self {
            name: p.name.clone(),
            status,
            predict: p.predict.join(", "),
            data_source: p.data_source.clone(),
            generation: p.generation,
            updated_at: p.updated_at.clone(),
        }
    }
}

pub async fn list_predictors(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let predictors: Vec<PredictorSummary> = client.get("api/v1/predictors").await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&predictors)?);
        }
        OutputFormat::Table => {
            if predictors.is_empty() {
                print_warning("No predictors found");
                return Ok(());
            }
            let rows: Vec<PredictorRow> = predictors.iter().map(PredictorRow::from).collect();
            print_table(&rows, format)?;
            println!("\nTotal: {} predictors", predictors.len());
        }
    }

    Ok(())
}

pub async fn show_predictor(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let predictor: PredictorSummary = client.get(&format!("api/v1/predictors/{}", name)).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&predictor)?);
        }
        OutputFormat::Table => {
            print_table(&[PredictorRow::from(&predictor)], format)?;
            if let Some(error) = &predictor.error {
                print_warning(&format!("Last error: {}", error));
            }
        }
    }

    Ok(())
}

pub async fn delete_predictor(client: &ApiClient, name: &str) -> Result<()> {
    client.delete(&format!("api/v1/predictors/{}", name)).await?;
    print_success(&format!("Predictor '{}' deleted", name));
    Ok(())
}

/// Blocks until the new model is serving
pub async fn retrain_predictor(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let predictor: PredictorSummary = client
        .post(&format!("api/v1/predictors/{}/retrain", name), &serde_json::json!({}))
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&predictor)?),
        OutputFormat::Table => print_success(&format!(
            "Predictor '{}' retrained (generation {})",
            predictor.name, predictor.generation
        )),
    }
    Ok(())
}
