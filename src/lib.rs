//! Retrieval-augmented question answering over a dojo's content library.
//!
//! A query is normalized, looked up in a short-lived result cache, embedded,
//! matched against several vector collections at once, and answered by a
//! hosted chat model with citations and media pulled from the matched items.
//! See [`pipeline`] for the stage order and failure policy.

pub mod api;
pub mod cache;
pub mod clients;
pub mod config;
pub mod data_models;
pub mod db;
pub mod embedding;
pub mod error;
pub mod media;
pub mod normalizer;
pub mod pipeline;
pub mod prompt;
pub mod query_log;
pub mod retrieval;
pub mod synthesizer;
pub mod types;
