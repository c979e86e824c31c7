//! Offline stand-ins for the tokenizer, classifier and model loader.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::classifier::{top_of, Classifier, ClassifierOutput};
use crate::lexicon::VaderLexicon;
use crate::models::{ModelBundle, ModelLoader};
use crate::sentiment::LabelScore;
use crate::tokenizer::TextTokenizer;

const BOS: u32 = 0;
const EOS: u32 = 2;
const FIRST_WORD_ID: u32 = 10;

/// Whitespace tokenizer that wraps every encoding in `<s> ... </s>`.
pub struct WordTokenizer {
    vocab: Mutex<(HashMap<String, u32>, Vec<String>)>,
}

impl WordTokenizer {
    pub fn new() -> Self {
        Self { vocab: Mutex::new((HashMap::new(), Vec::new())) }
    }
}

impl TextTokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut guard = self.vocab.lock().unwrap();
        let (ids, words) = &mut *guard;
        let mut out = vec![BOS];
        for word in text.split_whitespace() {
            let id = match ids.get(word) {
                Some(id) => *id,
                None => {
                    let id = FIRST_WORD_ID + words.len() as u32;
                    ids.insert(word.to_string(), id);
                    words.push(word.to_string());
                    id
                }
            };
            out.push(id);
        }
        out.push(EOS);
        Ok(out)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let guard = self.vocab.lock().unwrap();
        let words: Vec<&str> = ids
            .iter()
            .filter(|id| **id >= FIRST_WORD_ID)
            .filter_map(|id| guard.1.get((id - FIRST_WORD_ID) as usize).map(String::as_str))
            .collect();
        Ok(words.join(" "))
    }
}

/// Keyword classifier emitting `LABEL_0/1/2` distributions.
#[derive(Default)]
pub struct KeywordClassifier {
    /// Makes `classify_all` fail, to exercise the degraded path.
    pub fail_distribution: bool,
    /// Makes `classify_all` answer with a bare class instead of a list.
    pub single_distribution: bool,
    /// Makes `classify` fail.
    pub fail_top: bool,
}

impl KeywordClassifier {
    pub fn distribution(text: &str) -> Vec<LabelScore> {
        let lower = text.to_lowercase();
        let (neg, neu, pos) = if ["love", "great", "good"].iter().any(|w| lower.contains(w)) {
            (0.02, 0.08, 0.90)
        } else if ["hate", "terrible", "bad"].iter().any(|w| lower.contains(w)) {
            (0.85, 0.10, 0.05)
        } else {
            (0.15, 0.70, 0.15)
        };
        vec![
            LabelScore { label: "LABEL_0".into(), score: neg },
            LabelScore { label: "LABEL_1".into(), score: neu },
            LabelScore { label: "LABEL_2".into(), score: pos },
        ]
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<LabelScore> {
        if self.fail_top {
            bail!("inference backend crashed");
        }
        let distribution = Self::distribution(text);
        Ok(top_of(&distribution).cloned().expect("non-empty distribution"))
    }

    async fn classify_all(&self, text: &str) -> Result<ClassifierOutput> {
        if self.fail_distribution {
            bail!("distribution call failed");
        }
        let distribution = Self::distribution(text);
        if self.single_distribution {
            return Ok(ClassifierOutput::Single(distribution[1].clone()));
        }
        Ok(ClassifierOutput::Distribution(distribution))
    }

    async fn classify_all_batch(&self, texts: &[String]) -> Result<Vec<Vec<LabelScore>>> {
        Ok(texts.iter().map(|t| Self::distribution(t)).collect())
    }
}

/// Loader that builds fresh fakes, counts loads and can fail a number of times first.
pub struct FakeLoader {
    pub loads: AtomicUsize,
    pub failures_left: AtomicUsize,
    pub delay: Duration,
    pub classifier: fn() -> KeywordClassifier,
}

impl FakeLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
            classifier: KeywordClassifier::default,
        })
    }

    pub fn with(classifier: fn() -> KeywordClassifier) -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
            classifier,
        })
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay,
            classifier: KeywordClassifier::default,
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load(&self) -> Result<ModelBundle> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            bail!("model weights unavailable");
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(ModelBundle {
            tokenizer: Arc::new(WordTokenizer::new()),
            classifier: Arc::new((self.classifier)()),
            lexicon: Arc::new(VaderLexicon::builtin()),
        })
    }
}
