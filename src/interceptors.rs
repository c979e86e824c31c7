//! Ordered request interceptors run by the router before the pipeline.

use serde_json::Value;
use std::sync::Arc;

use crate::error::AnalysisError;
use crate::normalize::TextNormalizer;
use crate::rate_limit::RateLimiter;

/// What an interceptor may inspect or rewrite.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_id: String,
    pub payload: Value,
}

impl RequestContext {
    pub fn new(client_id: impl Into<String>, payload: Value) -> Self {
        Self {
            client_id: client_id.into(),
            payload,
        }
    }
}

pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewrites the context in place, or stops the request with an error.
    fn intercept(&self, ctx: &mut RequestContext) -> Result<(), AnalysisError>;
}

#[derive(Clone, Default)]
pub struct InterceptorChain {
    steps: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, step: Arc<dyn Interceptor>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Runs every step in order; the first error stops the chain.
    pub fn run(&self, ctx: &mut RequestContext) -> Result<(), AnalysisError> {
        for step in &self.steps {
            step.intercept(ctx)?;
        }
        Ok(())
    }
}

/// Strips disallowed characters from `text` and from each item of `texts`.
pub struct Sanitize;

impl Interceptor for Sanitize {
    fn name(&self) -> &'static str {
        "sanitize"
    }

    fn intercept(&self, ctx: &mut RequestContext) -> Result<(), AnalysisError> {
        let Some(body) = ctx.payload.as_object_mut() else {
            return Ok(());
        };

        if let Some(Value::String(text)) = body.get_mut("text") {
            *text = TextNormalizer::sanitize(text);
        }
        if let Some(Value::Array(items)) = body.get_mut("texts") {
            let cleaned = TextNormalizer::sanitize_batch(items);
            *items = cleaned.into_iter().map(Value::String).collect();
        }
        Ok(())
    }
}

/// Admits the request against the client's sliding window.
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Interceptor for RateLimit {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn intercept(&self, ctx: &mut RequestContext) -> Result<(), AnalysisError> {
        if self.limiter.admit(&ctx.client_id) {
            Ok(())
        } else {
            Err(AnalysisError::RateLimited)
        }
    }
}
