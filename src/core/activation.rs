//! WF-008: Activation of installed plugins and themes.

use super::error::{ProvisionError, Result};
use super::types::AssetKind;
use crate::runtime::{ProgressObserver, Runtime};

/// Activate the unit at `path`. The install is never rolled back on failure.
pub async fn activate(
    runtime: &dyn Runtime,
    kind: AssetKind,
    path: &str,
    name: &str,
    observer: Option<&dyn ProgressObserver>,
) -> Result<()> {
    if let Some(observer) = observer {
        observer.set_caption(&format!("Activating {}", name));
    }
    match runtime.activate(kind, path, name).await {
        Ok(()) => {
            tracing::info!(%kind, name, path, "activated");
            Ok(())
        }
        Err(e @ ProvisionError::Activation { .. }) => Err(e),
        Err(other) => Err(ProvisionError::Activation {
            name: name.to_string(),
            reason: other.to_string(),
        }),
    }
}
