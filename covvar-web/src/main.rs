use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use covvar_web::api::{ApiServer, AppState};
use covvar_web::config::AppConfig;
use covvar_web::logging::init_logging;
use covvar_web::purge::JobPurgeService;
use covvar_web::utils::fs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();

    // Keep the guard alive so buffered file logs are flushed on exit
    let (logging_config, _log_guard) = init_logging(&config.log_dir)?;

    fs::ensure_dir_all_with_op("creating jobs directory", &config.jobs_dir).await?;
    fs::ensure_dir_all_with_op("creating upload directory", &config.upload_dir).await?;

    let cancel_token = CancellationToken::new();
    logging_config.start_retention_cleanup(cancel_token.clone());
    JobPurgeService::from_app_config(&config).start_background_task(cancel_token.clone());

    tracing::info!(
        jobs_dir = %config.jobs_dir.display(),
        tool = %config.tool.program.display(),
        "covvar-web starting"
    );

    let server = ApiServer::with_state(
        config.server.clone(),
        AppState::from_config(Arc::new(config)),
    );
    let server_token = server.cancel_token();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        cancel_token.cancel();
        server_token.cancel();
    });

    server.run().await?;

    tracing::info!("covvar-web stopped");
    Ok(())
}
