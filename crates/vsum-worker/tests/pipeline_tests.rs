//! Batch executor integration tests.
//!
//! The fake transcriber reads its transcript from the "video" file itself,
//! so each item's input is a JSON list of transcript entries on disk.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use vsum_media::SpliceOutcome;
use vsum_models::{keys, ItemStage, Stage, TimeRange, TranscriptEntry};
use vsum_storage::{DocumentStore, RUN_SUMMARY_FILENAME};
use vsum_worker::{
    BatchExecutor, Embedder, KeyframeExtractor, PipelineConfig, Splicer, StageProvider, Summarizer, Transcriber,
    WorkerError, WorkerResult,
};

#[derive(Default)]
struct Counters {
    transcribe_calls: AtomicUsize,
    summarize_calls: AtomicUsize,
    embed_calls: AtomicUsize,
    keyframe_calls: AtomicUsize,
    splice_calls: AtomicUsize,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
}

impl Counters {
    fn collaborator_calls(&self) -> usize {
        self.transcribe_calls.load(Ordering::SeqCst)
            + self.summarize_calls.load(Ordering::SeqCst)
            + self.embed_calls.load(Ordering::SeqCst)
            + self.keyframe_calls.load(Ordering::SeqCst)
            + self.splice_calls.load(Ordering::SeqCst)
    }
}

/// Counts the release of a processor when dropped.
struct Release(Arc<Counters>);

impl Drop for Release {
    fn drop(&mut self) {
        self.0.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct FakeProvider {
    counters: Arc<Counters>,
    invalid_config: Arc<AtomicBool>,
    embedder_unavailable: Arc<AtomicBool>,
}

impl FakeProvider {
    fn release(&self) -> Release {
        self.counters.acquisitions.fetch_add(1, Ordering::SeqCst);
        Release(Arc::clone(&self.counters))
    }
}

struct FakeTranscriber {
    counters: Arc<Counters>,
    _release: Release,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, media_path: &Path) -> WorkerResult<Vec<TranscriptEntry>> {
        self.counters.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        let raw = tokio::fs::read(media_path)
            .await
            .map_err(|e| WorkerError::collaborator(Stage::Transcribe, format!("{}: {}", media_path.display(), e)))?;
        serde_json::from_slice(&raw).map_err(|e| WorkerError::collaborator(Stage::Transcribe, e.to_string()))
    }
}

/// Returns the first transcript line as the summary.
struct FakeSummarizer {
    counters: Arc<Counters>,
    _release: Release,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, text: &str) -> WorkerResult<String> {
        self.counters.summarize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.lines().next().unwrap_or_default().to_string())
    }
}

/// Texts mentioning "important" point along x, everything else along y.
struct FakeEmbedder {
    counters: Arc<Counters>,
    _release: Release,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> WorkerResult<Vec<Vec<f32>>> {
        self.counters.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| if t.contains("important") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
            .collect())
    }
}

/// No visual salience anywhere.
struct FakeKeyframes {
    counters: Arc<Counters>,
    _release: Release,
}

#[async_trait]
impl KeyframeExtractor for FakeKeyframes {
    async fn extract(&self, _media_path: &Path, boundaries: &[(f64, f64)]) -> WorkerResult<Vec<u32>> {
        self.counters.keyframe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0; boundaries.len()])
    }
}

/// Writes the requested ranges as JSON instead of encoding media.
struct FakeSplicer {
    counters: Arc<Counters>,
    _release: Release,
}

#[async_trait]
impl Splicer for FakeSplicer {
    async fn splice(&self, _input: &Path, ranges: &[TimeRange], output: &Path) -> WorkerResult<SpliceOutcome> {
        self.counters.splice_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec(ranges).map_err(|e| WorkerError::collaborator(Stage::Splice, e.to_string()))?;
        tokio::fs::write(output, body).await?;
        Ok(SpliceOutcome::Created)
    }
}

#[async_trait]
impl StageProvider for FakeProvider {
    fn validate(&self) -> WorkerResult<()> {
        if self.invalid_config.load(Ordering::SeqCst) {
            return Err(WorkerError::config_error("VSUM_ML_SERVICE_URL not set"));
        }
        Ok(())
    }

    async fn transcriber(&self) -> WorkerResult<Box<dyn Transcriber>> {
        Ok(Box::new(FakeTranscriber {
            counters: Arc::clone(&self.counters),
            _release: self.release(),
        }))
    }

    async fn summarizer(&self) -> WorkerResult<Box<dyn Summarizer>> {
        Ok(Box::new(FakeSummarizer {
            counters: Arc::clone(&self.counters),
            _release: self.release(),
        }))
    }

    async fn embedder(&self) -> WorkerResult<Box<dyn Embedder>> {
        if self.embedder_unavailable.load(Ordering::SeqCst) {
            return Err(WorkerError::collaborator(Stage::Score, "embedding model failed to load"));
        }
        Ok(Box::new(FakeEmbedder {
            counters: Arc::clone(&self.counters),
            _release: self.release(),
        }))
    }

    async fn keyframe_extractor(&self) -> WorkerResult<Box<dyn KeyframeExtractor>> {
        Ok(Box::new(FakeKeyframes {
            counters: Arc::clone(&self.counters),
            _release: self.release(),
        }))
    }

    async fn splicer(&self) -> WorkerResult<Box<dyn Splicer>> {
        Ok(Box::new(FakeSplicer {
            counters: Arc::clone(&self.counters),
            _release: self.release(),
        }))
    }
}

struct Fixture {
    _dir: TempDir,
    video_dir: PathBuf,
    output_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let video_dir = dir.path().join("videos");
        let output_dir = dir.path().join("output");
        std::fs::create_dir_all(&video_dir).unwrap();
        Self {
            _dir: dir,
            video_dir,
            output_dir,
        }
    }

    /// Four on-topic sentences, one off-topic sentence and a silent gap at 6..7.
    fn add_item(&self, id: &str) {
        self.add_item_with(
            id,
            json!([
                {"text": "This is important.", "start": 0.0, "end": 2.0, "speaker": "A"},
                {"text": "Still important here.", "start": 2.0, "end": 4.0, "speaker": "A"},
                {"text": "Filler words.", "start": 4.0, "end": 6.0, "speaker": "B"},
                {"text": "More important stuff.", "start": 7.0, "end": 9.0, "speaker": "A"},
                {"text": "Another important point.", "start": 9.0, "end": 11.0, "speaker": "A"}
            ]),
        );
    }

    fn add_item_with(&self, id: &str, transcript: serde_json::Value) {
        let item_dir = self.video_dir.join(id);
        std::fs::create_dir_all(&item_dir).unwrap();
        std::fs::write(item_dir.join("source_video.mp4"), transcript.to_string()).unwrap();
    }

    fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new(&self.video_dir, &self.output_dir);
        config.media_metrics = false;
        config
    }

    fn store(&self) -> DocumentStore {
        DocumentStore::new(&self.output_dir, "output.json", false)
    }
}

#[tokio::test]
async fn test_end_to_end_splices_retained_sentences() {
    let fixture = Fixture::new();
    fixture.add_item("lecture-01");
    let provider = FakeProvider::default();

    let summary = BatchExecutor::new(fixture.config(), provider.clone()).run().await.unwrap();

    assert_eq!(summary.totals.items, 1);
    assert_eq!(summary.totals.spliced, 1);
    let report = summary.report("lecture-01").unwrap();
    assert_eq!(report.state, ItemStage::Spliced);
    // combined scores [0.5, 0.5, 0, 0, 0.5, 0.5]: mean 1/3, std ~0.236
    assert_eq!(report.total_sentences, 6);
    assert_eq!(report.retained, 4);

    let record = fixture.store().load("lecture-01").await.unwrap().unwrap();
    assert!(!record.has_error());
    assert_eq!(
        record.metadata.get(keys::FILTERED_SENTENCES),
        Some(&json!([[0.0, 2.0], [2.0, 4.0], [7.0, 9.0], [9.0, 11.0]]))
    );
    assert_eq!(record.metadata.get(keys::SUMMARY), Some(&json!("A: This is important.")));
    let stats = record.metadata.get(keys::FILTER_STATS).unwrap();
    assert_eq!(stats["status"], json!("applied"));
    let lower = stats["lower_cutoff"].as_f64().unwrap();
    assert!(lower > 0.0 && lower < 0.5);

    let spliced = std::fs::read(fixture.output_dir.join("lecture-01").join("summary.mp4")).unwrap();
    let ranges: Vec<(f64, f64)> = serde_json::from_slice(&spliced).unwrap();
    assert_eq!(ranges, vec![(0.0, 4.0), (7.0, 11.0)]);
    assert!(fixture.output_dir.join(RUN_SUMMARY_FILENAME).exists());
}

#[tokio::test]
async fn test_second_run_is_fully_memoized() {
    let fixture = Fixture::new();
    fixture.add_item("a");
    fixture.add_item("b");
    let provider = FakeProvider::default();

    BatchExecutor::new(fixture.config(), provider.clone()).run().await.unwrap();
    let calls = provider.counters.collaborator_calls();
    let acquisitions = provider.counters.acquisitions.load(Ordering::SeqCst);
    let record_before = std::fs::read(fixture.output_dir.join("a").join("output.json")).unwrap();

    let summary = BatchExecutor::new(fixture.config(), provider.clone()).run().await.unwrap();

    assert_eq!(provider.counters.collaborator_calls(), calls);
    assert_eq!(provider.counters.acquisitions.load(Ordering::SeqCst), acquisitions);
    assert!(summary.items.iter().all(|r| r.fully_memoized()));
    assert_eq!(summary.totals.spliced, 2);
    let record_after = std::fs::read(fixture.output_dir.join("a").join("output.json")).unwrap();
    assert_eq!(record_before, record_after);
}

#[tokio::test]
async fn test_empty_text_entry_does_not_defeat_memoization() {
    let fixture = Fixture::new();
    fixture.add_item_with(
        "pauses",
        json!([
            {"text": "This is important.", "start": 0.0, "end": 2.0, "speaker": "A"},
            {"text": "", "start": 2.0, "end": 3.0, "speaker": "B"},
            {"text": "Other words.", "start": 3.0, "end": 4.0, "speaker": "B"},
            {"text": "More important.", "start": 4.0, "end": 5.0, "speaker": "A"}
        ]),
    );
    let provider = FakeProvider::default();

    let summary = BatchExecutor::new(fixture.config(), provider.clone()).run().await.unwrap();
    assert_eq!(summary.report("pauses").unwrap().state, ItemStage::Spliced);
    let calls = provider.counters.collaborator_calls();

    let summary = BatchExecutor::new(fixture.config(), provider.clone()).run().await.unwrap();

    let report = summary.report("pauses").unwrap();
    assert_eq!(report.state, ItemStage::Spliced);
    assert_eq!(report.memo_hits, Stage::ALL.to_vec());
    assert_eq!(provider.counters.transcribe_calls.load(Ordering::SeqCst), 1);
    assert_eq!(provider.counters.collaborator_calls(), calls);
}

#[tokio::test]
async fn test_processors_are_acquired_once_per_stage_per_batch() {
    let fixture = Fixture::new();
    fixture.add_item("a");
    fixture.add_item("b");
    fixture.add_item("c");
    let mut config = fixture.config();
    config.batch_size = 2;
    let provider = FakeProvider::default();

    BatchExecutor::new(config, provider.clone()).run().await.unwrap();

    // five acquiring stages, two batches
    assert_eq!(provider.counters.acquisitions.load(Ordering::SeqCst), 10);
    assert_eq!(provider.counters.releases.load(Ordering::SeqCst), 10);
    assert_eq!(provider.counters.transcribe_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_missing_media_errors_item_and_batch_continues() {
    let fixture = Fixture::new();
    fixture.add_item("good");
    let mut config = fixture.config();
    config.items = Some(vec!["missing".to_string(), "good".to_string()]);
    config.batch_size = 2;
    let provider = FakeProvider::default();

    let summary = BatchExecutor::new(config.clone(), provider.clone()).run().await.unwrap();

    let missing = summary.report("missing").unwrap();
    assert_eq!(missing.state, ItemStage::Errored);
    assert_eq!(missing.failed_stage, Some(Stage::Transcribe));
    assert_eq!(summary.report("good").unwrap().state, ItemStage::Spliced);

    let record = fixture.store().load("missing").await.unwrap().unwrap();
    assert!(record.has_error());
    assert!(record.sentences.is_empty());

    // errored items are skipped on later runs
    let calls = provider.counters.transcribe_calls.load(Ordering::SeqCst);
    let summary = BatchExecutor::new(config, provider.clone()).run().await.unwrap();
    let missing = summary.report("missing").unwrap();
    assert!(missing.skipped);
    assert_eq!(missing.state, ItemStage::Errored);
    assert_eq!(summary.totals.skipped, 1);
    assert_eq!(provider.counters.transcribe_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_retry_errored_restarts_item() {
    let fixture = Fixture::new();
    let mut config = fixture.config();
    config.items = Some(vec!["late".to_string()]);
    let provider = FakeProvider::default();

    let summary = BatchExecutor::new(config.clone(), provider.clone()).run().await.unwrap();
    assert_eq!(summary.report("late").unwrap().state, ItemStage::Errored);

    fixture.add_item("late");
    config.retry_errored = true;
    let summary = BatchExecutor::new(config, provider.clone()).run().await.unwrap();

    let report = summary.report("late").unwrap();
    assert_eq!(report.state, ItemStage::Spliced);
    assert!(!report.skipped);
    assert!(!fixture.store().load("late").await.unwrap().unwrap().has_error());
}

#[tokio::test]
async fn test_resume_after_acquisition_failure() {
    let fixture = Fixture::new();
    fixture.add_item("a");
    let provider = FakeProvider::default();
    provider.embedder_unavailable.store(true, Ordering::SeqCst);

    let summary = BatchExecutor::new(fixture.config(), provider.clone()).run().await.unwrap();
    let report = summary.report("a").unwrap();
    assert_eq!(report.state, ItemStage::Errored);
    assert_eq!(report.failed_stage, Some(Stage::Score));

    // the checkpoint keeps the completed stages and no error
    let record = fixture.store().load("a").await.unwrap().unwrap();
    assert!(!record.has_error());
    assert!(record.metadata.contains_key(keys::SUMMARY));

    provider.embedder_unavailable.store(false, Ordering::SeqCst);
    let summary = BatchExecutor::new(fixture.config(), provider.clone()).run().await.unwrap();
    let report = summary.report("a").unwrap();
    assert_eq!(report.state, ItemStage::Spliced);
    assert_eq!(report.memo_hits, vec![Stage::Transcribe, Stage::Summarize]);
    assert_eq!(provider.counters.transcribe_calls.load(Ordering::SeqCst), 1);
    assert_eq!(provider.counters.summarize_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_configuration_error_aborts_before_any_item() {
    let fixture = Fixture::new();
    fixture.add_item("a");
    let provider = FakeProvider::default();
    provider.invalid_config.store(true, Ordering::SeqCst);

    let err = BatchExecutor::new(fixture.config(), provider.clone()).run().await.unwrap_err();

    assert!(err.is_fatal_for_run());
    assert_eq!(provider.counters.acquisitions.load(Ordering::SeqCst), 0);
    assert_eq!(provider.counters.collaborator_calls(), 0);
    assert!(!fixture.output_dir.exists());
}

#[tokio::test]
async fn test_invalid_filter_config_is_a_configuration_error() {
    let fixture = Fixture::new();
    fixture.add_item("a");
    let mut config = fixture.config();
    config.filter.alpha = 2.0;
    let provider = FakeProvider::default();

    let err = BatchExecutor::new(config, provider.clone()).run().await.unwrap_err();
    assert!(matches!(err, WorkerError::Config(_)));
    assert_eq!(provider.counters.collaborator_calls(), 0);
}

#[tokio::test]
async fn test_items_are_discovered_from_video_dir() {
    let fixture = Fixture::new();
    fixture.add_item("b");
    fixture.add_item("a");
    std::fs::create_dir_all(fixture.video_dir.join("empty")).unwrap();
    let provider = FakeProvider::default();

    let summary = BatchExecutor::new(fixture.config(), provider).run().await.unwrap();
    let ids: Vec<&str> = summary.items.iter().map(|r| r.item_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}
