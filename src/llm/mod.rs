//! Inference backend abstraction
//!
//! Processors talk to models only through the [`LlmProvider`] trait; the
//! [`BackendFactory`] decides how a backend is brought up for a given model.

pub mod factory;
pub mod provider;
pub mod providers;

pub use factory::{BackendFactory, LocalBackendFactory};
pub use provider::*;
pub use providers::*;
