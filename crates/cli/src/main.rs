//! Predictor Tables CLI
//!
//! A command-line tool for running SQL against the predictor database and
//! managing predictors, datasources and integration tables.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{datasources, predictors, sql, tables};
use output::{print_error, print_info, print_success, OutputFormat};
use std::path::PathBuf;

/// Predictor Tables CLI
#[derive(Parser)]
#[command(name = "pq")]
#[command(author, version, about = "CLI for SQL-addressable predictors", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via PQ_API_URL env var)
    #[arg(long, env = "PQ_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, global = true)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a SQL statement
    Sql {
        /// Statement text, e.g. "select * from mindsdb.predictors"
        statement: String,
    },

    /// Manage predictors
    #[command(subcommand)]
    Predictors(PredictorCommands),

    /// Manage datasources
    #[command(subcommand)]
    Datasources(DatasourceCommands),

    /// Manage tables of the integration database
    #[command(subcommand)]
    Tables(TableCommands),

    /// Show or change the CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum PredictorCommands {
    /// List predictors
    List,

    /// Show one predictor
    Show {
        /// Predictor name
        name: String,
    },

    /// Delete a predictor, cancelling its training
    Delete {
        /// Predictor name
        name: String,
    },

    /// Retrain a complete predictor from its data source
    Retrain {
        /// Predictor name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum DatasourceCommands {
    /// List datasources
    List,

    /// Register a datasource from a dataset JSON file
    Register {
        /// Datasource name
        name: String,

        /// File with {"columns": [...], "rows": [[...]]}
        file: PathBuf,

        /// Datasource kind (file, db)
        #[arg(long, default_value = "file")]
        kind: String,

        /// Location recorded with the datasource (defaults to the file path)
        #[arg(long)]
        location: Option<String>,
    },

    /// Remove a datasource
    Drop {
        /// Datasource name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum TableCommands {
    /// List loaded tables
    List,

    /// Load a dataset JSON file as <database>.<table>
    Load {
        /// Qualified table name
        table: String,

        /// File with {"columns": [...], "rows": [[...]]}
        file: PathBuf,
    },

    /// Drop a loaded table
    Drop {
        /// Qualified table name
        table: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Store the API URL in the config file
    SetApiUrl {
        /// API endpoint URL
        url: String,
    },
}

fn resolve_format(flag: Option<OutputFormat>, config: &config::Config) -> OutputFormat {
    flag.or_else(|| {
        config
            .default_format
            .as_deref()
            .and_then(|f| OutputFormat::from_str(f, true).ok())
    })
    .unwrap_or_default()
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = config::Config::load()?;
    let api_url = config.resolve_api_url(cli.api_url.as_deref());
    let format = resolve_format(cli.format, &config);

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;
    if cli.verbose {
        print_info(&format!("Using API at {}", client.base_url()));
    }

    // Execute command
    match cli.command {
        Commands::Sql { statement } => {
            sql::run_sql(&client, &statement, format).await?;
        }
        Commands::Predictors(cmd) => match cmd {
            PredictorCommands::List => predictors::list_predictors(&client, format).await?,
            PredictorCommands::Show { name } => {
                predictors::show_predictor(&client, &name, format).await?
            }
            PredictorCommands::Delete { name } => {
                predictors::delete_predictor(&client, &name).await?
            }
            PredictorCommands::Retrain { name } => {
                predictors::retrain_predictor(&client, &name, format).await?
            }
        },
        Commands::Datasources(cmd) => match cmd {
            DatasourceCommands::List => datasources::list_datasources(&client, format).await?,
            DatasourceCommands::Register {
                name,
                file,
                kind,
                location,
            } => {
                datasources::register_datasource(&client, &name, &file, &kind, location).await?
            }
            DatasourceCommands::Drop { name } => {
                datasources::drop_datasource(&client, &name).await?
            }
        },
        Commands::Tables(cmd) => match cmd {
            TableCommands::List => tables::list_tables(&client, format).await?,
            TableCommands::Load { table, file } => {
                tables::load_table(&client, &table, &file).await?
            }
            TableCommands::Drop { table } => tables::drop_table(&client, &table).await?,
        },
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => {
                println!("api_url: {}", api_url);
                println!("format: {:?}", format);
                println!("file: {}", config::Config::config_path()?.display());
            }
            ConfigCommands::SetApiUrl { url } => {
                url::Url::parse(&url)?;
                config.api_url = Some(url);
                let path = config.save()?;
                print_success(&format!("Saved {}", path.display()));
            }
        },
    }

    Ok(())
}
