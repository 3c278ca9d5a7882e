use std::path::Path;

use anyhow::Context;

use vsum_media::{check_ffmpeg, check_ffprobe};
use vsum_ml_client::MlClient;
use vsum_worker::{MlStageProvider, PipelineConfig, StageProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = PipelineConfig::from_env()?;

    println!(
        "vsum-selfcheck: video_dir={} output_dir={}",
        config.video_dir.display(),
        config.output_dir.display()
    );
    config.validate()?;
    MlStageProvider::new(config.ml.clone(), config.splice.clone()).validate()?;

    ensure_readable_dir(&config.video_dir).await?;
    ensure_workdir(&config.output_dir).await?;
    check_ffmpeg().context("ffmpeg not available")?;
    check_ffprobe().context("ffprobe not available")?;

    let client = MlClient::new(config.ml.client_config()?)?;
    client
        .health()
        .await
        .with_context(|| format!("ML service at {} is not healthy", client.base_url()))?;

    println!("vsum-selfcheck: ok");
    Ok(())
}

async fn ensure_readable_dir(path: &Path) -> anyhow::Result<()> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot stat {}", path.display()))?;
    anyhow::ensure!(metadata.is_dir(), "{} is not a directory", path.display());
    let _entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    Ok(())
}

async fn ensure_workdir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("cannot create {}", path.display()))?;
    Ok(())
}
