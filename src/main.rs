use clap::Parser;
use r2d2::Pool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use ops_intel::alerts::{default_metrics, evaluate_alerts};
use ops_intel::config::{AppConfig, CliArgs};
use ops_intel::db::db_pool::DuckDbConnectionManager;
use ops_intel::db::executor::QueryExecutor;
use ops_intel::db::loader;
use ops_intel::llm::LlmManager;
use ops_intel::util::logging::init_tracing;
use ops_intel::web;
use ops_intel::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("Initializing DuckDB connection pool");
    let db_manager = DuckDbConnectionManager::new(config.database.connection_string.clone());
    let pool = Pool::builder()
        .max_size(config.database.pool_size as u32)
        .build(db_manager)?;

    // Load the dataset once; it is read-only for the rest of the process.
    let csv_path = PathBuf::from(&config.dataset.csv_path);
    if csv_path.exists() {
        let rows = loader::load_csv(&pool, &csv_path, &config.dataset.table_name)?;
        info!("Dataset ready: {} rows", rows);
    } else if loader::table_exists(&pool, &config.dataset.table_name)? {
        info!(
            "CSV not found at {}; using previously loaded table '{}'",
            csv_path.display(),
            config.dataset.table_name
        );
    } else {
        error!(
            "No dataset available: CSV missing at {} and table '{}' not loaded",
            csv_path.display(),
            config.dataset.table_name
        );
        return Err("no dataset available".into());
    }

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = Arc::new(LlmManager::new(&config.llm)?);

    let executor = Arc::new(QueryExecutor::new(
        pool,
        config.dataset.table_name.clone(),
    ));

    // Startup alert pass, logged for the operations team
    match default_metrics(&executor).await {
        Ok(metrics) => {
            if let Err(e) = evaluate_alerts(&executor, &metrics, &config.alerts, None).await {
                error!("Startup alert evaluation failed: {}", e);
                // Continue anyway; alerts can be re-run on demand
            }
        }
        Err(e) => error!("Failed to build metric definitions: {}", e),
    }

    let app_state = Arc::new(AppState::new(config.clone(), executor, llm_manager));

    // Start the web server
    info!(
        "Starting ops-intel server on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.to_string().into());
        }
    }

    Ok(())
}
