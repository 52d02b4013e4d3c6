//! Provisioning core — types, compilation, resolution, installation, execution.

pub mod activation;
pub mod archive;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod installer;
pub mod interpreter;
pub mod resolver;
pub mod state;
pub mod types;
