//! wpforge — blueprint provisioning engine for sandboxed WordPress sites.
//!
//! Compiles declarative blueprints into ordered steps, resolves archive,
//! directory and git resources, installs and activates plugins and themes,
//! and reconciles each site with its persistent mount.

pub mod cli;
pub mod core;
pub mod runtime;
pub mod storage;
pub mod transport;
pub mod tripwire;

#[cfg(test)]
pub(crate) mod testing;
