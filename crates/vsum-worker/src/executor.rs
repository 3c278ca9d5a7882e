//! Batch executor.
//!
//! Items are processed in batches of `batch_size`. Within a batch every stage
//! runs for all items before the next stage starts, so each stage's
//! processor is acquired at most once per batch and released before the next
//! one is loaded. State is checkpointed after every item-stage.

use std::path::PathBuf;
use std::time::Instant;

use futures::future::join_all;
use tracing::{info, warn, Instrument};

use vsum_media::get_duration;
use vsum_models::{keys, Document, ItemProgress, ItemStage, Stage, TrackRegistry};
use vsum_storage::DocumentStore;

use crate::collaborators::{Embedder, KeyframeExtractor, Splicer, Summarizer, Transcriber};
use crate::config::PipelineConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::ItemLogger;
use crate::memo;
use crate::metrics;
use crate::provider::StageProvider;
use crate::stages::{self, PIPELINE_TRACKS};
use crate::summary::{ItemReport, RunSummary};

/// Processor held for the duration of one stage of one batch.
enum Processor {
    Transcriber(Box<dyn Transcriber>),
    Summarizer(Box<dyn Summarizer>),
    Embedder(Box<dyn Embedder>),
    KeyframeExtractor(Box<dyn KeyframeExtractor>),
    Splicer(Box<dyn Splicer>),
    Filter,
}

/// In-memory state of one item for the current run.
struct ItemRun {
    id: String,
    video_path: PathBuf,
    spliced_path: PathBuf,
    document: Option<Document>,
    progress: ItemProgress,
    report: ItemReport,
}

impl ItemRun {
    fn new(config: &PipelineConfig, id: &str) -> Self {
        Self {
            id: id.to_string(),
            video_path: config.video_path(id),
            spliced_path: config.spliced_path(id),
            document: None,
            progress: ItemProgress::new(),
            report: ItemReport::new(id),
        }
    }

    /// Mark the item errored without touching persisted state.
    fn abandon(&mut self, stage: Option<Stage>, message: String) {
        self.progress.state = ItemStage::Errored;
        self.progress.failed_stage = stage;
        self.progress.error_message = Some(message);
    }

    /// Mark the item errored. A rejected transition is logged and the
    /// current state kept.
    fn fail(&mut self, stage: Stage, message: String) {
        if let Err(e) = self.progress.fail(stage, message) {
            warn!(item_id = %self.id, stage = %stage, error = %e, "Failed to record item failure");
        }
    }

    fn into_report(mut self) -> ItemReport {
        self.report.state = self.progress.state;
        self.report.failed_stage = self.progress.failed_stage;
        self.report.error = self.progress.error_message.clone();
        if let Some(doc) = &self.document {
            self.report.total_sentences = doc.len();
            self.report.retained = doc
                .get_metadata(keys::FILTERED_SENTENCES)
                .and_then(|v| v.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            if self.report.total_sentences > 0 {
                self.report.retained_ratio = self.report.retained as f64 / self.report.total_sentences as f64;
            }
        }
        self.report
    }
}

/// Runs the pipeline over every configured item.
pub struct BatchExecutor<P: StageProvider> {
    config: PipelineConfig,
    provider: P,
    registry: TrackRegistry,
    store: DocumentStore,
}

impl<P: StageProvider> BatchExecutor<P> {
    pub fn new(config: PipelineConfig, provider: P) -> Self {
        let store = DocumentStore::new(&config.output_dir, &config.output_filename, config.compress_state);
        Self {
            config,
            provider,
            registry: TrackRegistry::with_defaults(),
            store,
        }
    }

    /// Use a registry with additional track types.
    pub fn with_registry(mut self, registry: TrackRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Process every item and write the run summary.
    ///
    /// Configuration problems are reported before any item is touched; all
    /// other failures are recorded on the item and the run continues.
    pub async fn run(&self) -> WorkerResult<RunSummary> {
        self.config.validate()?;
        self.provider.validate()?;
        self.registry
            .ensure_registered(PIPELINE_TRACKS)
            .map_err(|e| WorkerError::config_error(e.to_string()))?;

        let items = self.discover_items().await?;
        let batch_size = self.config.batch_size;
        info!(
            items = items.len(),
            batch_size,
            output_dir = %self.config.output_dir.display(),
            "Starting pipeline run"
        );

        let mut summary = RunSummary::start();
        let batch_count = items.len().div_ceil(batch_size);
        for (batch_idx, batch) in items.chunks(batch_size).enumerate() {
            info!(batch = batch_idx + 1, of = batch_count, items = batch.len(), "Processing batch");
            let reports = self.run_batch(batch, &mut summary).await;
            for report in reports {
                summary.push(report);
            }
        }

        summary.finish();
        let path = self.store.save_run_summary(&summary).await?;
        info!(
            path = %path.display(),
            items = summary.totals.items,
            spliced = summary.totals.spliced,
            errored = summary.totals.errored,
            skipped = summary.totals.skipped,
            "Pipeline run complete"
        );
        Ok(summary)
    }

    /// Explicit item list, or every subdirectory of the video dir that holds
    /// the configured video file, sorted.
    async fn discover_items(&self) -> WorkerResult<Vec<String>> {
        let items = match &self.config.items {
            Some(items) => items.clone(),
            None => {
                let mut entries = tokio::fs::read_dir(&self.config.video_dir).await.map_err(|e| {
                    WorkerError::config_error(format!(
                        "cannot read VSUM_VIDEO_DIR {}: {}",
                        self.config.video_dir.display(),
                        e
                    ))
                })?;
                let mut found = Vec::new();
                while let Some(entry) = entries.next_entry().await? {
                    if !entry.file_type().await?.is_dir() {
                        continue;
                    }
                    let id = entry.file_name().to_string_lossy().to_string();
                    if tokio::fs::try_exists(self.config.video_path(&id)).await? {
                        found.push(id);
                    }
                }
                found.sort();
                found
            }
        };

        for id in &items {
            self.store
                .item_dir(id)
                .map_err(|e| WorkerError::config_error(format!("invalid item id: {}", e)))?;
        }
        Ok(items)
    }

    async fn run_batch(&self, batch: &[String], summary: &mut RunSummary) -> Vec<ItemReport> {
        let mut runs = join_all(batch.iter().map(|id| self.load_item(id))).await;

        for stage in Stage::ALL {
            self.run_stage(stage, &mut runs).await;
        }

        if self.config.media_metrics {
            self.measure_durations(&runs, summary).await;
        }

        runs.into_iter().map(ItemRun::into_report).collect()
    }

    /// Restore an item from its checkpoint.
    async fn load_item(&self, id: &str) -> ItemRun {
        let mut run = ItemRun::new(&self.config, id);
        let logger = ItemLogger::new(id, "load");

        match self.store.load(id).await {
            Ok(None) => logger.log_start("no checkpoint, starting fresh"),
            Ok(Some(record)) if record.has_error() => {
                if self.config.retry_errored {
                    logger.log_start("retrying previously errored item");
                } else {
                    let message = record
                        .metadata
                        .get(keys::ERROR)
                        .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
                        .unwrap_or_default();
                    logger.log_warning(&format!("skipping previously errored item: {}", message));
                    run.report.skipped = true;
                    run.abandon(None, message);
                }
            }
            Ok(Some(record)) => match Document::from_record(record, &self.registry, &PIPELINE_TRACKS) {
                Ok(doc) => {
                    logger.log_start(&format!("resumed from checkpoint with {} sentences", doc.len()));
                    run.document = Some(doc);
                }
                Err(e) => {
                    logger.log_error(&format!("checkpoint is unusable: {}", e));
                    run.abandon(None, e.to_string());
                }
            },
            Err(e) => {
                logger.log_error(&format!("failed to load checkpoint: {}", e));
                run.abandon(None, e.to_string());
            }
        }
        run
    }

    async fn run_stage(&self, stage: Stage, runs: &mut [ItemRun]) {
        let mut pending = Vec::new();
        for (idx, run) in runs.iter_mut().enumerate() {
            if !run.progress.can_run(stage) {
                continue;
            }
            if memo::is_complete(stage, run.document.as_ref(), &run.spliced_path) {
                metrics::record_memo_hit(stage);
                run.report.memo_hits.push(stage);
                if let Err(e) = run.progress.advance(stage) {
                    run.abandon(Some(stage), e.to_string());
                }
                continue;
            }
            pending.push(idx);
        }

        if pending.is_empty() {
            return;
        }

        let processor = match self.acquire(stage).await {
            Ok(processor) => processor,
            Err(e) => {
                let e = e.for_stage(stage);
                warn!(stage = %stage, items = pending.len(), error = %e, "Failed to acquire processor");
                for idx in pending {
                    let run = &mut runs[idx];
                    metrics::record_item_error(stage);
                    run.fail(stage, e.to_string());
                }
                return;
            }
        };
        info!(stage = %stage, items = pending.len(), "Processor acquired");

        for idx in pending {
            let run = &mut runs[idx];
            let logger = ItemLogger::new(&run.id, stage.as_str());
            let started = Instant::now();

            let result = self
                .process(stage, &processor, run, &logger)
                .instrument(logger.create_span())
                .await;
            metrics::record_stage_run(stage, started.elapsed().as_secs_f64());

            match result {
                Ok(()) => {
                    if let Err(e) = run.progress.advance(stage) {
                        run.abandon(Some(stage), e.to_string());
                        continue;
                    }
                    if let Err(e) = self.persist(run).await {
                        logger.log_error(&format!("failed to checkpoint: {}", e));
                        run.abandon(Some(stage), e.to_string());
                        continue;
                    }
                    logger.log_completion(&format!("{:.2}s", started.elapsed().as_secs_f64()));
                }
                Err(e) => self.record_failure(stage, run, &logger, e.for_stage(stage)).await,
            }
        }

        drop(processor);
        info!(stage = %stage, "Processor released");
    }

    async fn acquire(&self, stage: Stage) -> WorkerResult<Processor> {
        Ok(match stage {
            Stage::Transcribe => Processor::Transcriber(self.provider.transcriber().await?),
            Stage::Summarize => Processor::Summarizer(self.provider.summarizer().await?),
            Stage::Score => Processor::Embedder(self.provider.embedder().await?),
            Stage::Keyframe => Processor::KeyframeExtractor(self.provider.keyframe_extractor().await?),
            Stage::Filter => Processor::Filter,
            Stage::Splice => Processor::Splicer(self.provider.splicer().await?),
        })
    }

    async fn process(&self, stage: Stage, processor: &Processor, run: &mut ItemRun, logger: &ItemLogger) -> WorkerResult<()> {
        logger.log_start(&run.video_path.display().to_string());

        if let Processor::Transcriber(transcriber) = processor {
            let doc = stages::transcribe(transcriber.as_ref(), &run.video_path, &self.registry).await?;
            logger.log_progress(&format!("{} sentences", doc.len()));
            run.document = Some(doc);
            return Ok(());
        }

        let doc = run
            .document
            .as_mut()
            .ok_or_else(|| WorkerError::validation(stage, "no transcribed document"))?;

        match processor {
            Processor::Summarizer(summarizer) => stages::summarize(summarizer.as_ref(), doc).await,
            Processor::Embedder(embedder) => stages::score(embedder.as_ref(), doc).await,
            Processor::KeyframeExtractor(extractor) => {
                stages::keyframe(extractor.as_ref(), &run.video_path, doc).await
            }
            Processor::Filter => {
                let stats = stages::filter(doc, &self.config.filter)?;
                logger.log_progress(&format!(
                    "retained {}/{} sentences ({:?})",
                    stats.retained, stats.total, stats.status
                ));
                Ok(())
            }
            Processor::Splicer(splicer) => {
                let outcome = stages::splice(splicer.as_ref(), &run.video_path, &run.spliced_path, doc).await?;
                logger.log_progress(&format!("{:?}", outcome));
                Ok(())
            }
            Processor::Transcriber(_) => Ok(()),
        }
    }

    async fn persist(&self, run: &ItemRun) -> WorkerResult<()> {
        if let Some(doc) = &run.document {
            self.store.save(&run.id, &doc.to_record()).await?;
        }
        Ok(())
    }

    /// Record a stage failure on the document, checkpoint it and mark the
    /// item errored.
    async fn record_failure(&self, stage: Stage, run: &mut ItemRun, logger: &ItemLogger, error: WorkerError) {
        let message = error.to_string();
        logger.log_error(&message);
        metrics::record_item_error(stage);

        let doc = match run.document.take() {
            Some(mut doc) if stage != Stage::Transcribe => {
                doc.upsert_metadata(keys::ERROR, serde_json::Value::String(message.clone()));
                doc
            }
            _ => Document::empty_with_error(message.clone()),
        };
        run.document = Some(doc);

        if let Err(e) = self.persist(run).await {
            logger.log_error(&format!("failed to checkpoint error state: {}", e));
        }
        run.fail(stage, message);
    }

    /// Log and accumulate original versus spliced duration for the batch.
    async fn measure_durations(&self, runs: &[ItemRun], summary: &mut RunSummary) {
        let mut original_total = 0.0;
        let mut spliced_total = 0.0;
        let mut measured = 0usize;

        for run in runs.iter().filter(|r| r.progress.state == ItemStage::Spliced) {
            let original = get_duration(&run.video_path).await;
            let spliced = get_duration(&run.spliced_path).await;
            match (original, spliced) {
                (Ok(original), Ok(spliced)) => {
                    original_total += original;
                    spliced_total += spliced;
                    measured += 1;
                    summary.add_durations(original, spliced);
                }
                (Err(e), _) | (_, Err(e)) => {
                    ItemLogger::new(&run.id, "metrics").log_warning(&format!("could not read durations: {}", e));
                }
            }
        }

        if measured > 0 {
            info!(
                items = measured,
                original = %vsum_models::format_seconds(original_total),
                spliced = %vsum_models::format_seconds(spliced_total),
                ratio = spliced_total / original_total.max(f64::EPSILON),
                "Batch media durations"
            );
        }
    }
}
