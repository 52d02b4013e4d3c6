//! WF-013: Mount reconciliation — decide how a site boots.
//!
//! For each site: choose the backing device, probe it for an existing
//! installation, and pick the manifest to run. A populated device boots
//! from the stored runtime configuration with no steps; an empty one
//! (or an ephemeral site) is provisioned from the original blueprint.

pub mod device;

use crate::core::compiler;
use crate::core::error::{ProvisionError, Result};
use crate::core::interpreter::{self, EventLog, RunConfig};
use crate::core::resolver::ResourceResolver;
use crate::core::types::*;
use crate::runtime::{ProgressObserver, Runtime, WriteOptions, DOCUMENT_ROOT};
use crate::tripwire::eventlog;
use device::{DeviceAccessor, DeviceHandle};
use std::path::Path;

/// Object-store path of a site's namespace.
pub fn opfs_path(slug: &str) -> String {
    format!("/site-{}", slug)
}

/// Choose mount, manifest and whether provisioning must run.
pub async fn prepare_environment(
    site: &SiteMetadata,
    devices: &dyn DeviceAccessor,
) -> Result<PreparedEnvironment> {
    let device = match site.storage {
        StorageKind::None => {
            return Ok(PreparedEnvironment {
                mount: None,
                effective_manifest: compiler::compile(&site.original_blueprint),
                should_provision: true,
            });
        }
        StorageKind::Opfs => MountDevice::Opfs {
            path: opfs_path(&site.slug),
        },
        StorageKind::LocalFs => {
            let path = devices.directory_handle(&site.slug)?.ok_or_else(|| {
                ProvisionError::BootDecision(format!(
                    "no local directory registered for site {}",
                    site.slug
                ))
            })?;
            MountDevice::LocalFs { path }
        }
    };

    let handle = devices.open(&device).await?;
    let installed = handle.probe_installation().await?;
    tracing::debug!(site = %site.slug, storage = %site.storage, installed, "probed device");

    let effective_manifest = if installed {
        compiler::compile(&Blueprint::from(&site.runtime_configuration))
    } else {
        compiler::compile(&site.original_blueprint)
    };

    Ok(PreparedEnvironment {
        mount: Some(MountDescriptor {
            device,
            mountpoint: DOCUMENT_ROOT.to_string(),
            initial_sync_direction: SyncDirection::OpfsToMemfs,
        }),
        effective_manifest,
        should_provision: !installed,
    })
}

/// Copy the device contents into the runtime at `mountpoint`. Returns the
/// tree that was loaded, which later decides what the device may lose.
pub async fn sync_device_to_runtime(
    handle: &DeviceHandle,
    runtime: &dyn Runtime,
    mountpoint: &str,
) -> Result<FileTree> {
    let tree = handle.read_tree().await?;
    if !tree.is_empty() {
        runtime
            .write_tree(mountpoint, &tree, WriteOptions::default())
            .await?;
    }
    tracing::debug!(files = tree.len(), direction = %SyncDirection::OpfsToMemfs, "synced");
    Ok(tree)
}

/// Merge the runtime's `mountpoint` onto the device. Only files that were
/// `loaded` from the device and are gone from the runtime get deleted;
/// anything else on the device stays as it is.
pub async fn sync_runtime_to_device(
    runtime: &dyn Runtime,
    mountpoint: &str,
    handle: &DeviceHandle,
    loaded: &FileTree,
) -> Result<usize> {
    let tree = runtime.read_tree(mountpoint).await?;
    handle.write_tree(&tree).await?;
    let stale: Vec<String> = loaded
        .iter()
        .map(|(path, _)| path)
        .filter(|path| !tree.contains(path))
        .map(str::to_string)
        .collect();
    let removed = if stale.is_empty() {
        0
    } else {
        handle.remove_files(stale).await?
    };
    tracing::debug!(
        files = tree.len(),
        removed,
        direction = %SyncDirection::MemfsToOpfs,
        "synced"
    );
    Ok(tree.len())
}

/// Everything a boot needs.
pub struct BootConfig<'a> {
    pub site: &'a SiteMetadata,
    pub runtime: &'a dyn Runtime,
    pub devices: &'a dyn DeviceAccessor,
    pub resolver: &'a ResourceResolver,
    pub observer: Option<&'a dyn ProgressObserver>,
    /// Provenance events go to `<state_dir>/<slug>/events.jsonl` when set
    pub state_dir: Option<&'a Path>,
}

/// What a boot did.
#[derive(Debug)]
pub struct BootReport {
    pub environment: PreparedEnvironment,
    /// Present only when provisioning ran
    pub run: Option<RunReport>,
    pub files_loaded: usize,
    pub files_persisted: usize,
}

/// prepare → load device → provision if needed → persist.
pub async fn boot(cfg: &BootConfig<'_>) -> Result<BootReport> {
    let site = cfg.site;
    let environment = prepare_environment(site, cfg.devices).await?;
    tracing::info!(
        site = %site.slug,
        storage = %site.storage,
        should_provision = environment.should_provision,
        "boot decided"
    );
    if let Some(state_dir) = cfg.state_dir {
        let event = ProvenanceEvent::BootDecided {
            site: site.slug.clone(),
            storage: site.storage,
            should_provision: environment.should_provision,
        };
        if let Err(e) = eventlog::append_event(state_dir, &site.slug, event) {
            tracing::warn!(site = %site.slug, error = %e, "cannot append provenance event");
        }
    }

    let handle = match &environment.mount {
        Some(mount) => Some((cfg.devices.open(&mount.device).await?, mount.mountpoint.as_str())),
        None => None,
    };

    let loaded = match &handle {
        Some((h, mountpoint)) => sync_device_to_runtime(h, cfg.runtime, mountpoint).await?,
        None => FileTree::new(),
    };

    let run = if environment.should_provision {
        if let Some(observer) = cfg.observer {
            observer.set_caption("Installing WordPress");
        }
        cfg.runtime
            .install_application(&environment.effective_manifest.versions)
            .await?;
        let report = interpreter::run(&RunConfig {
            manifest: &environment.effective_manifest,
            runtime: cfg.runtime,
            resolver: cfg.resolver,
            observer: cfg.observer,
            event_log: cfg.state_dir.map(|state_dir| EventLog {
                state_dir,
                site: &site.slug,
            }),
        })
        .await?;
        Some(report)
    } else {
        None
    };

    let files_persisted = match &handle {
        Some((h, mountpoint)) => sync_runtime_to_device(cfg.runtime, mountpoint, h, &loaded).await?,
        None => 0,
    };

    Ok(BootReport {
        environment,
        run,
        files_loaded: loaded.len(),
        files_persisted,
    })
}
