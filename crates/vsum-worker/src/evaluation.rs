//! Summary evaluation against TvSum-style importance annotations.
//!
//! Every annotated video carries several annotators' importance scores, one
//! per fixed-length segment. Sentence scores are aligned to those segments by
//! temporal IoU, then compared with rank correlation and thresholded
//! precision/recall. When an item has a reference text, the retained
//! transcript is also compared with ROUGE and embedding similarity.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use vsum_models::{keys, Document, ScoredSpan, TimeRange, TrackRegistry};
use vsum_storage::DocumentStore;

use crate::config::{EvaluationConfig, PipelineConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::ItemLogger;
use crate::metrics;
use crate::provider::StageProvider;
use crate::stages::PIPELINE_TRACKS;

/// Aggregate report written next to the item directories.
pub const EVALUATION_SUMMARY_FILENAME: &str = "evaluation_summary.json";

/// All annotations for one video.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationSet {
    pub category: String,
    /// One score list per annotator, one score per segment
    pub annotations: Vec<Vec<f64>>,
}

/// Parse `{item_id}\t{category}\t{s1,s2,...}` rows.
///
/// Rows with fewer than three columns are ignored; repeated ids append
/// another annotator.
pub fn parse_annotations(text: &str) -> WorkerResult<BTreeMap<String, AnnotationSet>> {
    let mut sets: BTreeMap<String, AnnotationSet> = BTreeMap::new();
    for (line_no, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 || fields[0].trim().is_empty() {
            continue;
        }
        let scores = fields[2]
            .split(',')
            .map(|s| s.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WorkerError::evaluation(format!("line {}: invalid score: {}", line_no + 1, e)))?;

        sets.entry(fields[0].trim().to_string())
            .or_insert_with(|| AnnotationSet {
                category: fields[1].trim().to_string(),
                annotations: Vec::new(),
            })
            .annotations
            .push(scores);
    }
    Ok(sets)
}

pub async fn load_annotations(path: &Path) -> WorkerResult<BTreeMap<String, AnnotationSet>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| WorkerError::evaluation(format!("cannot read {}: {}", path.display(), e)))?;
    parse_annotations(&text)
}

/// Intersection over union of two time spans.
pub fn temporal_iou(a: (f64, f64), b: (f64, f64)) -> f64 {
    let intersection = (a.1.min(b.1) - a.0.max(b.0)).max(0.0);
    let union = a.1.max(b.1) - a.0.min(b.0);
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Consecutive `segment_secs` spans carrying one annotator's scores.
pub fn annotation_spans(scores: &[f64], segment_secs: f64) -> Vec<ScoredSpan> {
    scores
        .iter()
        .enumerate()
        .map(|(i, score)| ScoredSpan {
            score: Some(*score),
            timestamp: (i as f64 * segment_secs, (i + 1) as f64 * segment_secs),
        })
        .collect()
}

/// Predicted and annotated scores paired per annotated segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub predicted: Vec<f64>,
    pub truth: Vec<f64>,
    /// Segments matched by at least one sentence
    pub matched: usize,
}

/// Pair every annotated segment with the mean score of the sentences that
/// overlap it by at least `iou_threshold`; unmatched segments get 0.
pub fn align_scores(predicted: &[ScoredSpan], truth: &[ScoredSpan], iou_threshold: f64) -> Alignment {
    let mut alignment = Alignment {
        predicted: Vec::with_capacity(truth.len()),
        truth: Vec::with_capacity(truth.len()),
        matched: 0,
    };
    for segment in truth {
        let matches: Vec<f64> = predicted
            .iter()
            .filter(|p| temporal_iou(segment.timestamp, p.timestamp) >= iou_threshold)
            .map(|p| p.score.unwrap_or(0.0))
            .collect();
        if matches.is_empty() {
            alignment.predicted.push(0.0);
        } else {
            alignment.matched += 1;
            alignment.predicted.push(matches.iter().sum::<f64>() / matches.len() as f64);
        }
        alignment.truth.push(segment.score.unwrap_or(0.0));
    }
    alignment
}

/// Map `[0, 1]` scores linearly onto `range`.
pub fn rescale(scores: &[f64], range: (f64, f64)) -> Vec<f64> {
    let (lo, hi) = range;
    scores.iter().map(|s| lo + (hi - lo) * s.clamp(0.0, 1.0)).collect()
}

/// 1-based ranks; ties share the mean of their positions.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| values[*a].total_cmp(&values[*b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for idx in &order[i..=j] {
            ranks[*idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        cov += (a - mx) * (b - my);
        vx += (a - mx).powi(2);
        vy += (b - my).powi(2);
    }
    let denom = (vx * vy).sqrt();
    if denom == 0.0 {
        None
    } else {
        Some(cov / denom)
    }
}

/// Spearman's rho over tie-averaged ranks. `None` when either side is
/// constant.
pub fn spearman_rho(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() {
        return None;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

/// Kendall's tau-b. `None` when either side is constant.
pub fn kendall_tau(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let (mut concordant, mut discordant) = (0i64, 0i64);
    let (mut tied_x, mut tied_y) = (0i64, 0i64);
    for i in 0..x.len() {
        for j in (i + 1)..x.len() {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];
            if dx == 0.0 {
                tied_x += 1;
            }
            if dy == 0.0 {
                tied_y += 1;
            }
            if dx != 0.0 && dy != 0.0 {
                if (dx > 0.0) == (dy > 0.0) {
                    concordant += 1;
                } else {
                    discordant += 1;
                }
            }
        }
    }
    let pairs = (x.len() * (x.len() - 1) / 2) as f64;
    let denom = ((pairs - tied_x as f64) * (pairs - tied_y as f64)).sqrt();
    if denom == 0.0 {
        None
    } else {
        Some((concordant - discordant) as f64 / denom)
    }
}

/// Precision, recall and F1 of one comparison. Undefined ratios are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PrfScore {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl PrfScore {
    fn from_counts(hits: usize, predicted: usize, actual: usize) -> Self {
        let ratio = |a: usize, b: usize| if b == 0 { 0.0 } else { a as f64 / b as f64 };
        let precision = ratio(hits, predicted);
        let recall = ratio(hits, actual);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self { precision, recall, f1 }
    }
}

/// Binary classification scores with "important" meaning `>= threshold`.
pub fn binary_scores(predicted: &[f64], truth: &[f64], threshold: f64) -> PrfScore {
    let (mut tp, mut predicted_pos, mut actual_pos) = (0, 0, 0);
    for (p, t) in predicted.iter().zip(truth) {
        let p = *p >= threshold;
        let t = *t >= threshold;
        if p {
            predicted_pos += 1;
        }
        if t {
            actual_pos += 1;
        }
        if p && t {
            tp += 1;
        }
    }
    PrfScore::from_counts(tp, predicted_pos, actual_pos)
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn rouge_n(candidate: &[String], reference: &[String], n: usize) -> PrfScore {
    let grams = |tokens: &[String]| -> HashMap<Vec<String>, usize> {
        let mut counts = HashMap::new();
        if tokens.len() >= n {
            for gram in tokens.windows(n) {
                *counts.entry(gram.to_vec()).or_insert(0) += 1;
            }
        }
        counts
    };
    let cand = grams(candidate);
    let refs = grams(reference);
    let overlap: usize = cand
        .iter()
        .map(|(gram, count)| (*count).min(refs.get(gram).copied().unwrap_or(0)))
        .sum();
    PrfScore::from_counts(overlap, cand.values().sum(), refs.values().sum())
}

fn rouge_l(candidate: &[String], reference: &[String]) -> PrfScore {
    let mut prev = vec![0usize; reference.len() + 1];
    let mut curr = vec![0usize; reference.len() + 1];
    for c in candidate {
        for (j, r) in reference.iter().enumerate() {
            curr[j + 1] = if c == r { prev[j] + 1 } else { prev[j + 1].max(curr[j]) };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[reference.len()];
    PrfScore::from_counts(lcs, candidate.len(), reference.len())
}

/// ROUGE-1, ROUGE-2 and ROUGE-L over lowercase alphanumeric tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RougeScores {
    pub rouge1: PrfScore,
    pub rouge2: PrfScore,
    pub rouge_l: PrfScore,
}

pub fn rouge(candidate: &str, reference: &str) -> RougeScores {
    let candidate = tokenize(candidate);
    let reference = tokenize(reference);
    RougeScores {
        rouge1: rouge_n(&candidate, &reference, 1),
        rouge2: rouge_n(&candidate, &reference, 2),
        rouge_l: rouge_l(&candidate, &reference),
    }
}

/// Spoken text of the sentences the filter retained, in order.
pub fn retained_text(doc: &Document) -> String {
    let retained: Vec<TimeRange> = doc
        .get_metadata(keys::FILTERED_SENTENCES)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    doc.sentences()
        .iter()
        .filter(|s| !s.is_placeholder())
        .filter(|s| retained.iter().any(|r| r.start == s.start() && r.end == s.end()))
        .map(|s| s.joined_text())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scores against one annotator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatorScores {
    pub kendall_tau: Option<f64>,
    pub spearman_rho: Option<f64>,
    #[serde(flatten)]
    pub importance: PrfScore,
    /// Annotated segments matched by at least one sentence
    pub matched_segments: usize,
    pub total_segments: usize,
}

/// Compare sentence scores with every annotator of one video.
pub fn score_against_annotations(
    predicted: &[ScoredSpan],
    set: &AnnotationSet,
    config: &EvaluationConfig,
) -> Vec<AnnotatorScores> {
    set.annotations
        .iter()
        .map(|scores| {
            let truth = annotation_spans(scores, config.segment_secs);
            let alignment = align_scores(predicted, &truth, config.iou_threshold);
            let scaled = rescale(&alignment.predicted, config.score_range);
            AnnotatorScores {
                kendall_tau: kendall_tau(&alignment.predicted, &alignment.truth),
                spearman_rho: spearman_rho(&alignment.predicted, &alignment.truth),
                importance: binary_scores(&scaled, &alignment.truth, config.importance_threshold),
                matched_segments: alignment.matched,
                total_segments: truth.len(),
            }
        })
        .collect()
}

fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Means over annotators or items. Correlations skip undefined values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricMeans {
    pub kendall_tau: Option<f64>,
    pub spearman_rho: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
}

impl MetricMeans {
    pub fn of_annotators(scores: &[AnnotatorScores]) -> Self {
        Self {
            kendall_tau: mean_of(scores.iter().filter_map(|s| s.kendall_tau)),
            spearman_rho: mean_of(scores.iter().filter_map(|s| s.spearman_rho)),
            precision: mean_of(scores.iter().map(|s| s.importance.precision)),
            recall: mean_of(scores.iter().map(|s| s.importance.recall)),
            f1: mean_of(scores.iter().map(|s| s.importance.f1)),
        }
    }

    fn of_items(items: &[ItemEvaluation]) -> Self {
        Self {
            kendall_tau: mean_of(items.iter().filter_map(|i| i.mean.kendall_tau)),
            spearman_rho: mean_of(items.iter().filter_map(|i| i.mean.spearman_rho)),
            precision: mean_of(items.iter().filter_map(|i| i.mean.precision)),
            recall: mean_of(items.iter().filter_map(|i| i.mean.recall)),
            f1: mean_of(items.iter().filter_map(|i| i.mean.f1)),
        }
    }
}

/// Evaluation of one item, written to its report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEvaluation {
    pub item_id: String,
    pub category: String,
    pub annotators: Vec<AnnotatorScores>,
    pub mean: MetricMeans,
    pub retained_ratio: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rouge: Option<RougeScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_similarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub item_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items: Vec<ItemEvaluation>,
    pub skipped: Vec<SkippedItem>,
    pub mean: MetricMeans,
    pub mean_rouge_l_f1: Option<f64>,
    pub mean_embedding_similarity: Option<f64>,
}

impl EvaluationReport {
    fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            items: Vec::new(),
            skipped: Vec::new(),
            mean: MetricMeans::default(),
            mean_rouge_l_f1: None,
            mean_embedding_similarity: None,
        }
    }

    fn finish(&mut self) {
        self.mean = MetricMeans::of_items(&self.items);
        self.mean_rouge_l_f1 = mean_of(self.items.iter().filter_map(|i| i.rouge.map(|r| r.rouge_l.f1)));
        self.mean_embedding_similarity = mean_of(self.items.iter().filter_map(|i| i.embedding_similarity));
        self.finished_at = Some(Utc::now());
    }

    pub fn item(&self, item_id: &str) -> Option<&ItemEvaluation> {
        self.items.iter().find(|i| i.item_id == item_id)
    }
}

/// Candidate and reference text waiting for embedding similarity.
struct PendingSimilarity {
    index: usize,
    candidate: String,
    reference: String,
}

/// Scores processed items against annotations.
pub struct Evaluator<P: StageProvider> {
    config: PipelineConfig,
    evaluation: EvaluationConfig,
    provider: P,
    registry: TrackRegistry,
    store: DocumentStore,
}

impl<P: StageProvider> Evaluator<P> {
    pub fn new(config: PipelineConfig, evaluation: EvaluationConfig, provider: P) -> Self {
        let store = DocumentStore::new(&config.output_dir, &config.output_filename, config.compress_state);
        Self {
            config,
            evaluation,
            provider,
            registry: TrackRegistry::with_defaults(),
            store,
        }
    }

    /// Evaluate every annotated item (or the configured item list) and write
    /// per-item reports plus the aggregate summary.
    ///
    /// Items without annotations, checkpoint or filter output are skipped.
    pub async fn run(&self) -> WorkerResult<EvaluationReport> {
        self.config.validate()?;
        self.evaluation.validate()?;
        if self.evaluation.report_filename == self.config.output_filename {
            return Err(WorkerError::config_error(
                "VSUM_EVAL_REPORT_FILENAME must differ from VSUM_OUTPUT_FILENAME",
            ));
        }

        let annotations = load_annotations(&self.evaluation.annotations_path).await?;
        let items: Vec<String> = match &self.config.items {
            Some(items) => items.clone(),
            None => annotations.keys().cloned().collect(),
        };
        info!(items = items.len(), annotated = annotations.len(), "Starting evaluation");

        let mut report = EvaluationReport::start();
        let mut pending = Vec::new();
        for id in &items {
            let logger = ItemLogger::new(id, "evaluate");
            match self.evaluate_item(id, &annotations).await {
                Ok((evaluation, texts)) => {
                    if let Some((candidate, reference)) = texts {
                        pending.push(PendingSimilarity {
                            index: report.items.len(),
                            candidate,
                            reference,
                        });
                    }
                    logger.log_completion(&format!("{} annotators compared", evaluation.annotators.len()));
                    metrics::record_evaluation("evaluated");
                    report.items.push(evaluation);
                }
                Err(reason) => {
                    logger.log_warning(&format!("skipped: {}", reason));
                    metrics::record_evaluation("skipped");
                    report.skipped.push(SkippedItem {
                        item_id: id.clone(),
                        reason,
                    });
                }
            }
        }

        if !pending.is_empty() {
            self.embedding_similarities(&mut report, pending).await;
        }
        report.finish();

        for item in &report.items {
            self.store
                .save_item_report(&item.item_id, &self.evaluation.report_filename, item)
                .await?;
        }
        let path = self.store.save_report(EVALUATION_SUMMARY_FILENAME, &report).await?;
        info!(
            evaluated = report.items.len(),
            skipped = report.skipped.len(),
            path = %path.display(),
            "Evaluation complete"
        );
        Ok(report)
    }

    /// Score one item; `Err` carries the reason it was skipped.
    async fn evaluate_item(
        &self,
        id: &str,
        annotations: &BTreeMap<String, AnnotationSet>,
    ) -> Result<(ItemEvaluation, Option<(String, String)>), String> {
        let set = annotations.get(id).ok_or_else(|| "no annotations".to_string())?;
        let record = self
            .store
            .load(id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "no checkpoint".to_string())?;
        if record.has_error() {
            return Err("item failed during processing".to_string());
        }
        let doc = Document::from_record(record, &self.registry, &PIPELINE_TRACKS).map_err(|e| e.to_string())?;

        let predicted = doc.aggregate_scores();
        if predicted.is_empty() || predicted.iter().any(|s| s.score.is_none()) {
            return Err("item has not been filtered".to_string());
        }

        let annotators = score_against_annotations(&predicted, set, &self.evaluation);
        let retained = doc
            .get_metadata(keys::FILTERED_SENTENCES)
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        let mut evaluation = ItemEvaluation {
            item_id: id.to_string(),
            category: set.category.clone(),
            mean: MetricMeans::of_annotators(&annotators),
            annotators,
            retained_ratio: retained as f64 / doc.len() as f64,
            rouge: None,
            embedding_similarity: None,
        };

        let reference_path = self.config.video_dir.join(id).join(&self.evaluation.reference_filename);
        let texts = match tokio::fs::read_to_string(&reference_path).await {
            Ok(reference) if !reference.trim().is_empty() => {
                let candidate = retained_text(&doc);
                evaluation.rouge = Some(rouge(&candidate, &reference));
                Some((candidate, reference))
            }
            _ => None,
        };
        Ok((evaluation, texts))
    }

    /// Acquire the embedder once for every pending item and release it after.
    async fn embedding_similarities(&self, report: &mut EvaluationReport, pending: Vec<PendingSimilarity>) {
        let embedder = match self.provider.embedder().await {
            Ok(embedder) => embedder,
            Err(e) => {
                warn!(items = pending.len(), error = %e, "Embedder unavailable, skipping embedding similarity");
                return;
            }
        };
        for item in pending {
            let Some(evaluation) = report.items.get_mut(item.index) else {
                continue;
            };
            match embedder.embed_batch(&[item.candidate, item.reference]).await {
                Ok(vectors) if vectors.len() == 2 => {
                    evaluation.embedding_similarity = Some(embedder.similarity(&vectors[0], &vectors[1]));
                }
                Ok(vectors) => {
                    warn!(item_id = %evaluation.item_id, got = vectors.len(), "Expected 2 embeddings");
                }
                Err(e) => {
                    warn!(item_id = %evaluation.item_id, error = %e, "Embedding similarity failed");
                }
            }
        }
    }
}
