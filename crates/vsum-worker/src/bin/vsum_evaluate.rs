//! Score processed items against human importance annotations.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vsum_worker::{EvaluationConfig, Evaluator, MlStageProvider, PipelineConfig, EVALUATION_SUMMARY_FILENAME};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "vsum=info".parse::<Directive>() {
        env_filter = env_filter.add_directive(directive);
    }
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(env_filter)
        .init();

    let config = PipelineConfig::from_env().context("loading pipeline configuration")?;
    let evaluation = EvaluationConfig::from_env().context("loading evaluation configuration")?;
    info!(annotations = %evaluation.annotations_path.display(), "Starting vsum-evaluate");

    let provider = MlStageProvider::new(config.ml.clone(), config.splice.clone());
    let output_dir = config.output_dir.clone();
    let report = Evaluator::new(config, evaluation, provider).run().await?;

    println!(
        "vsum-evaluate: {} evaluated, {} skipped, mean f1 {}, written to {}",
        report.items.len(),
        report.skipped.len(),
        report
            .mean
            .f1
            .map(|f| format!("{:.3}", f))
            .unwrap_or_else(|| "n/a".to_string()),
        output_dir.join(EVALUATION_SUMMARY_FILENAME).display()
    );
    Ok(())
}
