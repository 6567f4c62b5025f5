//! LLM provider implementations

pub mod local;

pub use local::{ComputeDevice, LocalProvider, LocalProviderConfig};
