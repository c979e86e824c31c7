//! Lexicon-based word polarity, used to explain a classification word by word.
//!
//! Scoring follows the VADER rules that matter for a single token: valence
//! lookup on the lowercased word, exclamation/question emphasis, and the
//! `s / sqrt(s^2 + alpha)` normalisation into a compound score in `[-1, 1]`.
//! A subset of the VADER lexicon is bundled; the full `vader_lexicon.txt`
//! can be loaded instead.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;

use crate::sentiment::{Sentiment, WordSentiment};

const NORMALIZATION_ALPHA: f64 = 15.0;
const EXCLAMATION_BOOST: f64 = 0.292;
const MAX_EXCLAMATIONS: usize = 4;
const QUESTION_BOOST: f64 = 0.18;
const MAX_QUESTION_BOOST: f64 = 0.96;

/// Words shorter than this are not scored.
const MIN_WORD_CHARS: usize = 3;

/// Bundled subset of the VADER lexicon, `word<TAB>mean` on the -4..4 scale.
const BUNDLED_LEXICON: &str = include_str!("../data/vader_lexicon.txt");

static BUILTIN_VALENCE: Lazy<HashMap<String, f64>> = Lazy::new(|| VaderLexicon::parse(BUNDLED_LEXICON).valence);

pub trait LexiconScorer: Send + Sync {
    /// Compound polarity of `word`, in `[-1, 1]`.
    fn score(&self, word: &str) -> f64;
}

pub struct VaderLexicon {
    valence: HashMap<String, f64>,
}

impl VaderLexicon {
    pub fn builtin() -> Self {
        Self {
            valence: BUILTIN_VALENCE.clone(),
        }
    }

    /// Loads a `vader_lexicon.txt`-style file: `word<TAB>mean<TAB>stddev<TAB>ratings`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read lexicon {}", path.display()))?;
        let lexicon = Self::parse(&raw);
        if lexicon.valence.is_empty() {
            anyhow::bail!("lexicon {} has no usable entries", path.display());
        }
        Ok(lexicon)
    }

    fn parse(raw: &str) -> Self {
        let valence = raw
            .lines()
            .filter_map(|line| {
                let mut cols = line.split('\t');
                let word = cols.next()?.trim();
                let mean = cols.next()?.trim().parse::<f64>().ok()?;
                (!word.is_empty()).then(|| (word.to_lowercase(), mean))
            })
            .collect();
        Self { valence }
    }

    pub fn len(&self) -> usize {
        self.valence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valence.is_empty()
    }
}

impl LexiconScorer for VaderLexicon {
    fn score(&self, word: &str) -> f64 {
        let key = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        let mut sum = match self.valence.get(&key) {
            Some(v) => *v,
            None => return 0.0,
        };

        // Emphasis only amplifies an existing sentiment.
        let emphasis = punctuation_emphasis(word);
        if sum > 0.0 {
            sum += emphasis;
        } else if sum < 0.0 {
            sum -= emphasis;
        }
        normalize(sum)
    }
}

fn punctuation_emphasis(word: &str) -> f64 {
    let exclamations = word.matches('!').count().min(MAX_EXCLAMATIONS);
    let questions = word.matches('?').count();
    let question_boost = match questions {
        0 | 1 => 0.0,
        2 | 3 => questions as f64 * QUESTION_BOOST,
        _ => MAX_QUESTION_BOOST,
    };
    exclamations as f64 * EXCLAMATION_BOOST + question_boost
}

fn normalize(sum: f64) -> f64 {
    (sum / (sum * sum + NORMALIZATION_ALPHA).sqrt()).clamp(-1.0, 1.0)
}

/// Scores each whitespace-separated word of three or more characters.
///
/// Returns an empty list once the text reaches `word_limit` words.
pub fn score_words(lexicon: &dyn LexiconScorer, text: &str, word_limit: usize) -> Vec<WordSentiment> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() >= word_limit {
        return Vec::new();
    }

    words
        .into_iter()
        .filter(|word| word.chars().count() >= MIN_WORD_CHARS)
        .map(|word| {
            let compound = lexicon.score(word);
            WordSentiment {
                text: word.to_string(),
                sentiment: Sentiment::from_polarity(compound),
                score: compound.abs(),
            }
        })
        .collect()
}
