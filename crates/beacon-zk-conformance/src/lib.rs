//! Circuit conformance suite
//!
//! Native reference models of every light-client sub-circuit, fixed test vectors with
//! tampered negative counterparts, and a suite runner that checks each module
//! independently, either against the native models or against an external circuit tester.

pub mod bls;
pub mod hash_to_field;
pub mod modules;
pub mod suite;
pub mod vectors;

use thiserror::Error;

pub use modules::CircuitModule;
pub use suite::{run_suite, CircuitChecker, CommandChecker, ModuleReport, NativeChecker, SuiteReport};
pub use vectors::{
    builtin_by_module, builtin_module_vectors, builtin_vectors, load_module_vectors, tampered, write_vectors,
    ModuleVectors, TestVector,
};

/// Error types for conformance checks
#[derive(Error, Debug)]
pub enum ConformanceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unknown circuit module: {0}")]
    UnknownModule(String),
    #[error("No test vectors for {0}")]
    MissingVectors(String),
    #[error("Checker command failed to start: {0}")]
    Command(String),
    #[error("Checker timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
