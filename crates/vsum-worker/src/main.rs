//! Pipeline worker binary.

use tracing::{error, info};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vsum_worker::{BatchExecutor, MlStageProvider, PipelineConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "vsum=info".parse::<Directive>() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vsum-worker");

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Pipeline config: {:?}", config);

    let provider = MlStageProvider::new(config.ml.clone(), config.splice.clone());
    let executor = BatchExecutor::new(config, provider);

    match executor.run().await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                spliced = summary.totals.spliced,
                errored = summary.totals.errored,
                "Run finished"
            );
        }
        Err(e) => {
            error!("Pipeline run failed: {}", e);
            std::process::exit(1);
        }
    }
}
