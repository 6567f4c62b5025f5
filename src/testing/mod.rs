//! Testing utilities and mock implementations
//!
//! Mocks for the task source, the completion backend and backend
//! construction, shared by unit and integration tests.

pub mod mocks;

pub use mocks::*;
