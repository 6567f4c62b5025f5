//! Offload Worker - Rust Implementation
//!
//! A worker that pulls natural-language tasks (summaries, headlines,
//! simplification, chat and more) from a remote task queue and runs them on
//! locally hosted language models, one task at a time.
//!
//! # Overview
//!
//! - Boundary-aware chunking and recursive, round-capped summarization
//! - Per-model backend cache with single-flight construction
//! - Provider registration kept in sync with the enabled flag and the models on disk
//! - A single-task dispatcher loop with adaptive idle backoff
//! - A small control endpoint for the hosting platform
//!
//! # Quick Start
//!
//! ```rust
//! use offload_worker::text::split;
//!
//! let text = "First sentence. Second sentence.";
//! let chunks: Vec<&str> = split(text, 16).map(|chunk| chunk.text).collect();
//!
//! assert_eq!(chunks.concat(), text);
//! assert!(chunks.len() > 1);
//! ```

pub mod catalog;
pub mod config;
pub mod control;
pub mod error;
pub mod llm;
pub mod observability;
pub mod processors;
pub mod testing;
pub mod text;
pub mod transport;
pub mod worker;

pub use catalog::{ModelCatalog, ModelSpec};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use processors::{ProcessorCache, ProcessorDescriptor, ProcessorRegistry, TaskKind};
pub use transport::{AppApiTaskSource, TaskSource};
pub use worker::{Dispatcher, Registrar, WorkerContext, WorkerService};
