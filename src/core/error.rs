//! WF-002: Error taxonomy of the provisioning engine.

use thiserror::Error;

/// Everything that can go wrong while compiling, resolving, installing,
/// activating or mounting.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Malformed or ambiguous step
    #[error("invalid step: {0}")]
    InvalidStep(String),

    /// Network or repository resolution failure
    #[error("cannot fetch {locator}: {reason}")]
    ResourceFetch { locator: String, reason: String },

    /// Structural precondition of an installable unit violated
    #[error("malformed asset: {0}")]
    MalformedAsset(String),

    #[error("cannot install asset at {path} since it already exists")]
    AlreadyInstalled { path: String },

    /// Runtime refused or failed to activate a unit
    #[error("cannot activate {name}: {reason}")]
    Activation { name: String, reason: String },

    #[error("filesystem error at {path}: {reason}")]
    Filesystem { path: String, reason: String },

    /// Mount device unavailable
    #[error("cannot prepare storage: {0}")]
    BootDecision(String),

    #[error("parse error: {0}")]
    Parse(String),

    /// Failure of a step, annotated with its position and kind
    #[error("step #{index} ({step}) failed: {source}")]
    Step {
        index: usize,
        step: String,
        #[source]
        source: Box<ProvisionError>,
    },
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    pub fn filesystem(path: impl AsRef<str>, err: impl std::fmt::Display) -> Self {
        Self::Filesystem {
            path: path.as_ref().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn fetch(locator: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ResourceFetch {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }

    /// Annotate with the failing step. Already-annotated errors pass through.
    pub fn at_step(self, index: usize, step: &str) -> Self {
        match self {
            Self::Step { .. } => self,
            other => Self::Step {
                index,
                step: step.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Innermost error, below any step annotation.
    pub fn root_cause(&self) -> &ProvisionError {
        match self {
            Self::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Index of the failing step, if annotated.
    pub fn step_index(&self) -> Option<usize> {
        match self {
            Self::Step { index, .. } => Some(*index),
            _ => None,
        }
    }
}
