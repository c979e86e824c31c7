//! Sequence classification backed by the local inference sidecar.
//!
//! The sidecar hosts the pretrained model and mirrors the call shape of a
//! HuggingFace `text-classification` pipeline:
//!
//! - `{"inputs": "text", "top_k": 1}` returns the top class,
//! - `{"inputs": "text", "top_k": null}` returns the full distribution,
//! - `{"inputs": ["a", "b"], "top_k": null}` returns one distribution per input.
//!
//! Depending on the sidecar version a single class comes back either bare or
//! wrapped in a list, so both shapes are accepted.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::sentiment::LabelScore;

/// Result of a full-distribution call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ClassifierOutput {
    Distribution(Vec<LabelScore>),
    Single(LabelScore),
}

impl ClassifierOutput {
    pub fn into_distribution(self) -> Vec<LabelScore> {
        match self {
            ClassifierOutput::Distribution(items) => items,
            ClassifierOutput::Single(item) => vec![item],
        }
    }

    /// Highest scoring class, if any.
    pub fn top(&self) -> Option<&LabelScore> {
        match self {
            ClassifierOutput::Distribution(items) => top_of(items),
            ClassifierOutput::Single(item) => Some(item),
        }
    }
}

pub fn top_of(items: &[LabelScore]) -> Option<&LabelScore> {
    items
        .iter()
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Top label and its confidence.
    async fn classify(&self, text: &str) -> Result<LabelScore>;

    /// Score distribution over every class.
    async fn classify_all(&self, text: &str) -> Result<ClassifierOutput>;

    /// One distribution per input, in input order.
    async fn classify_all_batch(&self, texts: &[String]) -> Result<Vec<Vec<LabelScore>>>;
}

/// HTTP client for the inference sidecar.
///
/// No request timeout is set: a hung sidecar blocks the calling request.
pub struct RemoteClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteClassifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, body: serde_json::Value) -> Result<T> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("classifier sidecar unreachable at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            bail!("classifier sidecar returned {}", status);
        }

        response
            .json::<T>()
            .await
            .context("classifier sidecar sent an unparseable body")
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify(&self, text: &str) -> Result<LabelScore> {
        let output: ClassifierOutput = self.call(json!({ "inputs": text, "top_k": 1 })).await?;
        output
            .top()
            .cloned()
            .map(clamp_score)
            .ok_or_else(|| anyhow!("classifier returned no classes"))
    }

    async fn classify_all(&self, text: &str) -> Result<ClassifierOutput> {
        let output: ClassifierOutput = self.call(json!({ "inputs": text, "top_k": null })).await?;
        Ok(match output {
            ClassifierOutput::Distribution(items) => {
                ClassifierOutput::Distribution(items.into_iter().map(clamp_score).collect())
            }
            ClassifierOutput::Single(item) => ClassifierOutput::Single(clamp_score(item)),
        })
    }

    async fn classify_all_batch(&self, texts: &[String]) -> Result<Vec<Vec<LabelScore>>> {
        let outputs: Vec<ClassifierOutput> =
            self.call(json!({ "inputs": texts, "top_k": null })).await?;
        if outputs.len() != texts.len() {
            bail!(
                "classifier returned {} results for {} inputs",
                outputs.len(),
                texts.len()
            );
        }
        Ok(outputs
            .into_iter()
            .map(|o| o.into_distribution().into_iter().map(clamp_score).collect())
            .collect())
    }
}

fn clamp_score(mut item: LabelScore) -> LabelScore {
    item.score = if item.score.is_finite() { item.score.clamp(0.0, 1.0) } else { 0.0 };
    item
}
