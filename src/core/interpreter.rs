//! WF-009: Step interpreter — the provisioning loop.
//!
//! validate → for each step in order: resolve → install → activate → events.
//! Fail-fast: the first step error aborts the run with its index attached.
//! Effects of earlier steps persist. Activation failures are recorded and
//! the run continues.

use super::activation;
use super::compiler;
use super::error::{ProvisionError, Result};
use super::installer;
use super::resolver::ResourceResolver;
use super::types::*;
use crate::runtime::{absolutize, join_paths, ProgressObserver, Runtime};
use crate::tripwire::eventlog;
use std::path::Path;
use std::time::Instant;

/// Where provenance events for a run go.
#[derive(Debug, Clone, Copy)]
pub struct EventLog<'a> {
    pub state_dir: &'a Path,
    pub site: &'a str,
}

impl EventLog<'_> {
    fn record(&self, event: ProvenanceEvent) {
        if let Err(e) = eventlog::append_event(self.state_dir, self.site, event) {
            tracing::warn!(site = self.site, error = %e, "cannot append provenance event");
        }
    }
}

/// Configuration for a provisioning run.
pub struct RunConfig<'a> {
    pub manifest: &'a Manifest,
    pub runtime: &'a dyn Runtime,
    pub resolver: &'a ResourceResolver,
    pub observer: Option<&'a dyn ProgressObserver>,
    pub event_log: Option<EventLog<'a>>,
}

impl RunConfig<'_> {
    fn caption(&self, caption: &str) {
        if let Some(observer) = self.observer {
            observer.set_caption(caption);
        }
    }

    fn record(&self, event: impl FnOnce(String) -> ProvenanceEvent) {
        if let Some(log) = &self.event_log {
            log.record(event(log.site.to_string()));
        }
    }
}

/// Fail on the first invalid step, before anything is written.
pub fn preflight(manifest: &Manifest) -> Result<()> {
    let first = compiler::validate_manifest(manifest)
        .into_iter()
        .find(|e| e.index.is_some());
    match first {
        Some(e) => {
            let index = e.index.unwrap_or_default();
            Err(ProvisionError::InvalidStep(e.message).at_step(index, e.step.unwrap_or("step")))
        }
        None => Ok(()),
    }
}

/// Execute every step of the manifest, strictly in order.
pub async fn run(cfg: &RunConfig<'_>) -> Result<RunReport> {
    let start = Instant::now();
    let run_id = eventlog::generate_run_id();
    let steps = &cfg.manifest.steps;

    preflight(cfg.manifest)?;

    tracing::info!(run_id = %run_id, steps = steps.len(), "provisioning started");
    cfg.record(|site| ProvenanceEvent::RunStarted {
        site,
        run_id: run_id.clone(),
        steps: steps.len(),
        wpforge_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let mut results = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        let kind = step.kind();
        cfg.record(|site| ProvenanceEvent::StepStarted {
            site,
            index,
            step: kind.to_string(),
        });

        let step_start = Instant::now();
        let result = match execute_step(cfg, index, step).await {
            Ok(r) => r,
            Err(e) => {
                let e = e.at_step(index, kind);
                tracing::error!(index, step = kind, error = %e, "step failed");
                cfg.record(|site| ProvenanceEvent::StepFailed {
                    site,
                    index,
                    step: kind.to_string(),
                    error: e.root_cause().to_string(),
                });
                return Err(e);
            }
        };
        let duration = step_start.elapsed();

        if let ActivationStatus::Failed { reason } = &result.activation {
            let name = result
                .install
                .as_ref()
                .map(|o| o.result.asset_folder_name.clone())
                .unwrap_or_default();
            tracing::warn!(index, name = %name, reason = %reason, "activation failed");
            cfg.record(|site| ProvenanceEvent::ActivationFailed {
                site,
                index,
                name,
                error: reason.clone(),
            });
        }

        cfg.record(|site| ProvenanceEvent::StepCompleted {
            site,
            index,
            step: kind.to_string(),
            duration_seconds: duration.as_secs_f64(),
            path: result
                .install
                .as_ref()
                .map(|o| o.result.asset_folder_path.clone()),
            hash: result
                .install
                .as_ref()
                .map(|o| o.hash.clone())
                .filter(|h| !h.is_empty()),
        });
        tracing::info!(index, step = kind, seconds = duration.as_secs_f64(), "step completed");
        cfg.caption(&format!("Completed step {} of {}", index + 1, steps.len()));

        results.push(StepResult { duration, ..result });
    }

    let report = RunReport {
        run_id,
        results,
        total_duration: start.elapsed(),
    };
    cfg.record(|site| ProvenanceEvent::RunCompleted {
        site,
        run_id: report.run_id.clone(),
        steps_completed: report.results.len(),
        activation_failures: report.activation_failures().len(),
        total_seconds: report.total_duration.as_secs_f64(),
    });
    tracing::info!(
        run_id = %report.run_id,
        steps = report.results.len(),
        seconds = report.total_duration.as_secs_f64(),
        "provisioning completed"
    );
    Ok(report)
}

async fn execute_step(cfg: &RunConfig<'_>, index: usize, step: &Step) -> Result<StepResult> {
    let empty = StepResult {
        index,
        step: step.kind(),
        install: None,
        activation: ActivationStatus::NotRequested,
        duration: Default::default(),
    };
    match step {
        Step::InstallPlugin(_) | Step::InstallTheme(_) => {
            let Some(spec) = step.install_spec() else {
                return Err(ProvisionError::InvalidStep("not an install step".to_string()));
            };
            install_step(cfg, index, spec).await
        }
        Step::WriteFile(s) => {
            let path = absolutize(cfg.runtime.document_root(), &s.path);
            let data = match cfg.resolver.resolve(&s.data).await? {
                Content::File(f) => f.bytes,
                Content::Directory(d) => {
                    return Err(ProvisionError::InvalidStep(format!(
                        "writeFile data {} is a directory",
                        d.name
                    )))
                }
            };
            tracing::debug!(path = %path, bytes = data.len(), "writeFile");
            cfg.runtime.write_file(&path, &data).await?;
            Ok(empty)
        }
        Step::Mkdir(s) => {
            let path = absolutize(cfg.runtime.document_root(), &s.path);
            tracing::debug!(path = %path, "mkdir");
            cfg.runtime.mkdir(&path).await?;
            Ok(empty)
        }
        Step::Unsupported => Err(ProvisionError::InvalidStep(
            "unsupported step kind".to_string(),
        )),
    }
}

async fn install_step(cfg: &RunConfig<'_>, index: usize, spec: InstallSpec<'_>) -> Result<StepResult> {
    let reference = match (spec.directory, spec.archive) {
        (Some(dir), Some(archive)) => {
            tracing::warn!(
                index,
                directory = %dir.locator(),
                archive = %archive.locator(),
                "both directory and archive resources given; using the directory"
            );
            dir
        }
        (Some(dir), None) => dir,
        (None, Some(archive)) => archive,
        (None, None) => {
            return Err(ProvisionError::InvalidStep(format!(
                "install{} step has no resource",
                if spec.kind == AssetKind::Plugin { "Plugin" } else { "Theme" }
            )))
        }
    };

    tracing::debug!(index, resource = %reference.locator(), "resolving");
    let content = cfg.resolver.resolve(reference).await?;
    let name = installer::display_name(&content);
    cfg.caption(&format!("Installing the {} {}", name, spec.kind));

    let target_parent = join_paths(&[
        cfg.runtime.document_root(),
        "wp-content",
        spec.kind.content_dir(),
    ]);
    let outcome = installer::install(cfg.runtime, content, &target_parent, spec.policy, spec.kind).await?;
    tracing::info!(
        index,
        kind = %spec.kind,
        path = %outcome.result.asset_folder_path,
        disposition = %outcome.disposition,
        "installed"
    );

    let activation = if spec.activate {
        match activation::activate(
            cfg.runtime,
            spec.kind,
            &outcome.result.asset_folder_path,
            &outcome.result.asset_folder_name,
            cfg.observer,
        )
        .await
        {
            Ok(()) => ActivationStatus::Activated,
            Err(e) => ActivationStatus::Failed {
                reason: e.to_string(),
            },
        }
    } else {
        ActivationStatus::NotRequested
    };

    Ok(StepResult {
        index,
        step: if spec.kind == AssetKind::Plugin { "installPlugin" } else { "installTheme" },
        install: Some(outcome),
        activation,
        duration: Default::default(),
    })
}
