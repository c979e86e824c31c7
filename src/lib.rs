pub mod api;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod interceptors;
pub mod lexicon;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod rate_limit;
pub mod sentiment;
pub mod tokenizer;

#[cfg(test)]
mod test_support;
