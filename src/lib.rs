//! Sales-pipeline persistence and orchestration.
//!
//! Leads, tasks and quotes are stored either through a remote HTTP API or
//! in a local demo store, picked once per process from configuration. On
//! top of the repositories sit the pipeline state machine and an AI
//! orchestrator that always answers, with fallbacks when generation fails.

pub mod ai;
pub mod config;
pub mod crm;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod settings;
pub mod transcode;
pub mod web;

pub use crm::Crm;
pub use error::{AiError, ConfigError, RepositoryError};
