//! Request processing: truncation, classification, lexicon scoring and
//! persistence for single texts, and classification-only batches.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::classifier::{top_of, ClassifierOutput};
use crate::config::PipelineLimits;
use crate::db::{SentimentStore, Stats};
use crate::error::AnalysisError;
use crate::lexicon::score_words;
use crate::models::{ModelBundle, ModelManager};
use crate::normalize::TextNormalizer;
use crate::sentiment::{AnalysisRecord, BatchResult, LabelMap, LabelScore};

pub struct AnalysisPipeline {
    models: Arc<ModelManager>,
    store: SentimentStore,
    labels: LabelMap,
    normalizer: TextNormalizer,
    limits: PipelineLimits,
}

impl AnalysisPipeline {
    pub fn new(
        models: Arc<ModelManager>,
        store: SentimentStore,
        labels: LabelMap,
        limits: PipelineLimits,
    ) -> Self {
        Self {
            models,
            store,
            labels,
            normalizer: TextNormalizer::new(limits.max_input_tokens),
            limits,
        }
    }

    pub fn models(&self) -> &ModelManager {
        &self.models
    }

    pub fn store(&self) -> &SentimentStore {
        &self.store
    }

    /// Analyzes one text and stores the result.
    ///
    /// Nothing is returned unless the record was committed.
    pub async fn analyze_single(&self, text: &str) -> Result<AnalysisRecord, AnalysisError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AnalysisError::EmptyText);
        }

        let bundle = self.models.bundle().await?;
        let record = self.score(&bundle, text).await?;

        self.store.insert(&record).await.map_err(|e| {
            error!(error = %e, "failed to store analysis");
            AnalysisError::Database(e)
        })?;

        info!(
            sentiment = %record.sentiment,
            score = record.score,
            words = record.word_sentiments.len(),
            "analysis stored"
        );
        Ok(record)
    }

    async fn score(&self, bundle: &ModelBundle, text: &str) -> Result<AnalysisRecord, AnalysisError> {
        let text = self
            .normalizer
            .truncate(bundle.tokenizer.as_ref(), text)
            .map_err(AnalysisError::Inference)?;

        let top = bundle
            .classifier
            .classify(&text)
            .await
            .map_err(AnalysisError::Inference)?;
        let sentiment = self.labels.resolve(&top.label).map_err(AnalysisError::Inference)?;

        let distribution = match bundle.classifier.classify_all(&text).await {
            Ok(ClassifierOutput::Distribution(items)) => items,
            Ok(ClassifierOutput::Single(item)) => vec![item],
            Err(e) => {
                warn!(error = %format!("{:#}", e), "distribution call failed, using top label only");
                vec![top.clone()]
            }
        };
        let positive_score = self.labels.positive_mass(&distribution);

        let word_sentiments = score_words(bundle.lexicon.as_ref(), &text, self.limits.word_scoring_limit);

        Ok(AnalysisRecord {
            text,
            sentiment,
            score: top.score,
            positive_score,
            word_sentiments,
            timestamp: Utc::now(),
        })
    }

    /// Classifies up to `max_batch_size` texts. Results keep input order and
    /// are not stored.
    pub async fn analyze_batch(&self, texts: Vec<String>) -> Result<Vec<BatchResult>, AnalysisError> {
        if texts.is_empty() {
            return Err(AnalysisError::EmptyBatch);
        }
        if texts.len() > self.limits.max_batch_size {
            return Err(AnalysisError::BatchTooLarge {
                max: self.limits.max_batch_size,
                got: texts.len(),
            });
        }

        let bundle = self.models.bundle().await?;
        let inputs = texts
            .iter()
            .map(|text| self.normalizer.truncate(bundle.tokenizer.as_ref(), text))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(AnalysisError::Inference)?;

        let distributions = bundle
            .classifier
            .classify_all_batch(&inputs)
            .await
            .map_err(AnalysisError::Inference)?;
        if distributions.len() != inputs.len() {
            return Err(AnalysisError::Inference(anyhow::anyhow!(
                "classifier returned {} results for {} inputs",
                distributions.len(),
                inputs.len()
            )));
        }

        let results = inputs
            .into_iter()
            .zip(distributions)
            .map(|(text, distribution)| self.batch_item(text, &distribution))
            .collect::<Result<Vec<_>, _>>()?;

        info!(items = results.len(), "batch analyzed");
        Ok(results)
    }

    fn batch_item(&self, text: String, distribution: &[LabelScore]) -> Result<BatchResult, AnalysisError> {
        let top = top_of(distribution)
            .ok_or_else(|| AnalysisError::Inference(anyhow::anyhow!("empty distribution")))?;
        let sentiment = self.labels.resolve(&top.label).map_err(AnalysisError::Inference)?;
        Ok(BatchResult {
            text,
            sentiment,
            score: top.score,
            positive_score: self.labels.positive_mass(distribution),
        })
    }

    pub async fn stats(&self) -> Result<Stats, AnalysisError> {
        Ok(self.store.stats().await?)
    }

    /// Drops the loaded models; the next analysis loads them again.
    pub async fn release_models(&self) -> usize {
        self.models.release().await
    }
}
