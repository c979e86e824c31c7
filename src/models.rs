//! Lazy lifecycle for the tokenizer, classifier and lexicon.
//!
//! `ModelManager` is owned by the pipeline rather than living in a global. The
//! first caller loads the bundle while holding the init lock; concurrent
//! first-callers wait on that lock and then share the same `Arc`. Inference
//! runs on the cloned `Arc`s, outside the lock.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::classifier::{Classifier, RemoteClassifier};
use crate::config::Settings;
use crate::error::AnalysisError;
use crate::lexicon::{LexiconScorer, VaderLexicon};
use crate::tokenizer::{HfTokenizer, TextTokenizer};

/// Number of resources a loaded bundle holds.
const BUNDLE_RESOURCES: usize = 3;

/// Fully initialized set of model resources.
#[derive(Clone)]
pub struct ModelBundle {
    pub tokenizer: Arc<dyn TextTokenizer>,
    pub classifier: Arc<dyn Classifier>,
    pub lexicon: Arc<dyn LexiconScorer>,
}

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<ModelBundle>;
}

/// Loads the pretrained tokenizer from disk and connects to the inference sidecar.
pub struct PretrainedLoader {
    tokenizer_path: PathBuf,
    classifier_url: String,
    lexicon_path: Option<PathBuf>,
}

impl PretrainedLoader {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tokenizer_path: settings.tokenizer_path.clone(),
            classifier_url: settings.classifier_url.clone(),
            lexicon_path: settings.lexicon_path.clone(),
        }
    }
}

#[async_trait]
impl ModelLoader for PretrainedLoader {
    async fn load(&self) -> Result<ModelBundle> {
        let tokenizer_path = self.tokenizer_path.clone();
        let tokenizer = tokio::task::spawn_blocking(move || HfTokenizer::from_file(&tokenizer_path))
            .await
            .context("tokenizer loader panicked")??;

        let classifier = RemoteClassifier::new(self.classifier_url.clone());
        // Warm-up: an unreachable sidecar fails the load instead of the first request.
        classifier
            .classify("warm up")
            .await
            .context("classifier warm-up failed")?;

        let lexicon = match &self.lexicon_path {
            Some(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || VaderLexicon::from_file(&path))
                    .await
                    .context("lexicon loader panicked")??
            }
            None => VaderLexicon::builtin(),
        };
        info!(entries = lexicon.len(), "lexicon ready");

        Ok(ModelBundle {
            tokenizer: Arc::new(tokenizer),
            classifier: Arc::new(classifier),
            lexicon: Arc::new(lexicon),
        })
    }
}

pub struct ModelManager {
    loader: Arc<dyn ModelLoader>,
    handle: Mutex<Option<Arc<ModelBundle>>>,
}

impl ModelManager {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            handle: Mutex::new(None),
        }
    }

    /// Returns the loaded bundle, loading it first if needed.
    ///
    /// A failed load leaves the manager uninitialized so a later call retries.
    pub async fn bundle(&self) -> Result<Arc<ModelBundle>, AnalysisError> {
        let mut handle = self.handle.lock().await;
        if let Some(bundle) = handle.as_ref() {
            return Ok(Arc::clone(bundle));
        }

        info!("loading sentiment models");
        let bundle = match self.loader.load().await {
            Ok(bundle) => Arc::new(bundle),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "model load failed");
                return Err(AnalysisError::ModelLoad(e));
            }
        };
        *handle = Some(Arc::clone(&bundle));
        info!("models loaded successfully");
        Ok(bundle)
    }

    pub async fn classifier(&self) -> Result<Arc<dyn Classifier>, AnalysisError> {
        Ok(Arc::clone(&self.bundle().await?.classifier))
    }

    pub async fn lexicon(&self) -> Result<Arc<dyn LexiconScorer>, AnalysisError> {
        Ok(Arc::clone(&self.bundle().await?.lexicon))
    }

    pub async fn tokenizer(&self) -> Result<Arc<dyn TextTokenizer>, AnalysisError> {
        Ok(Arc::clone(&self.bundle().await?.tokenizer))
    }

    pub async fn is_initialized(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Drops the held bundle and returns how many resources were released.
    ///
    /// Requests already holding the bundle keep it until they finish; memory is
    /// reclaimed when the last of them drops its `Arc`.
    pub async fn release(&self) -> usize {
        let released = self.handle.lock().await.take();
        match released {
            Some(_) => {
                info!("model resources released");
                BUNDLE_RESOURCES
            }
            None => 0,
        }
    }
}
