//! Core sentiment types shared by the pipeline, the store and the API.

use anyhow::{anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub const ALL: [Sentiment; 3] = [Sentiment::Negative, Sentiment::Neutral, Sentiment::Positive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }

    /// Sign of a lexicon compound score; exactly zero is neutral.
    pub fn from_polarity(compound: f64) -> Self {
        if compound > 0.0 {
            Sentiment::Positive
        } else if compound < 0.0 {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(anyhow!("unknown sentiment: {}", other)),
        }
    }
}

/// One class of a classifier response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

/// Table from the classifier's raw class names to sentiments.
///
/// The ordering of `LABEL_0/1/2` is a property of the pretrained model, so it
/// is configured rather than inferred.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    entries: Vec<(String, Sentiment)>,
}

impl LabelMap {
    pub fn new(entries: Vec<(String, Sentiment)>) -> anyhow::Result<Self> {
        for sentiment in Sentiment::ALL {
            let hits = entries.iter().filter(|(_, s)| *s == sentiment).count();
            if hits != 1 {
                bail!("label map must name {} exactly once (found {})", sentiment, hits);
            }
        }
        for (i, (label, _)) in entries.iter().enumerate() {
            if entries[..i].iter().any(|(other, _)| other == label) {
                bail!("label {} is mapped twice", label);
            }
        }
        Ok(Self { entries })
    }

    pub fn resolve(&self, label: &str) -> anyhow::Result<Sentiment> {
        self.entries
            .iter()
            .find(|(raw, _)| raw == label)
            .map(|(_, sentiment)| *sentiment)
            .ok_or_else(|| anyhow!("classifier returned unmapped label {}", label))
    }

    pub fn label_for(&self, sentiment: Sentiment) -> &str {
        self.entries
            .iter()
            .find(|(_, s)| *s == sentiment)
            .map(|(raw, _)| raw.as_str())
            .unwrap_or_default()
    }

    /// Probability mass the distribution assigns to the positive class, or 0.
    pub fn positive_mass(&self, distribution: &[LabelScore]) -> f64 {
        let positive = self.label_for(Sentiment::Positive);
        distribution
            .iter()
            .find(|item| item.label == positive)
            .map(|item| item.score)
            .unwrap_or(0.0)
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self {
            entries: vec![
                ("LABEL_0".to_string(), Sentiment::Negative),
                ("LABEL_1".to_string(), Sentiment::Neutral),
                ("LABEL_2".to_string(), Sentiment::Positive),
            ],
        }
    }
}

impl FromStr for LabelMap {
    type Err = anyhow::Error;

    /// Parses `LABEL_0=negative,LABEL_1=neutral,LABEL_2=positive`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (label, sentiment) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("expected LABEL=sentiment, got {}", pair))?;
            entries.push((label.trim().to_string(), sentiment.parse()?));
        }
        LabelMap::new(entries)
    }
}

/// Lexicon verdict for one word of the analyzed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WordSentiment {
    pub text: String,
    pub sentiment: Sentiment,
    /// Magnitude of the compound polarity, in `[0, 1]`.
    pub score: f64,
}

/// A completed single analysis. Never mutated after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AnalysisRecord {
    /// Text that was analyzed, after sanitizing and truncation.
    pub text: String,
    pub sentiment: Sentiment,
    pub score: f64,
    pub positive_score: f64,
    pub word_sentiments: Vec<WordSentiment>,
    pub timestamp: DateTime<Utc>,
}

/// One item of a batch analysis. Batch results are not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BatchResult {
    pub text: String,
    pub sentiment: Sentiment,
    pub score: f64,
    pub positive_score: f64,
}
