//! Tripwire — provenance tracing and BLAKE3 content hashing.

pub mod eventlog;
pub mod hasher;
