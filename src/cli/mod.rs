//! WF-017: CLI subcommands — init, validate, compile, apply, site, boot, status.

use crate::core::resolver::{ResolverConfig, ResourceResolver};
use crate::core::{compiler, interpreter, state, types};
use crate::runtime::host::HostRuntime;
use crate::storage::{self, device::HostDevices};
use crate::tripwire::eventlog;
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new blueprint project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a blueprint without fetching anything
    Validate {
        /// Path to the blueprint (JSON or YAML)
        #[arg(short, long, default_value = "blueprint.json")]
        file: PathBuf,
    },

    /// Print the compiled manifest as JSON
    Compile {
        /// Path to the blueprint (JSON or YAML)
        #[arg(short, long, default_value = "blueprint.json")]
        file: PathBuf,
    },

    /// Run a blueprint's steps against a WordPress document root on this host
    Apply {
        /// Path to the blueprint (JSON or YAML)
        #[arg(short, long, default_value = "blueprint.json")]
        file: PathBuf,

        /// Host directory serving as the document root
        #[arg(long)]
        root: PathBuf,

        /// Site name used for the provenance log
        #[arg(long, default_value = "local")]
        site: String,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Manage site records
    Site {
        #[command(subcommand)]
        command: SiteCommands,
    },

    /// Boot a site: mount its storage, provision if needed, persist
    Boot {
        /// Site slug
        #[arg(long)]
        site: String,

        /// Host directory the runtime works in (default: <state-dir>/<slug>/www)
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Root of the object-store namespaces
        #[arg(long, default_value = "state/opfs")]
        opfs_root: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Show known sites and their last recorded run
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Show a specific site
        #[arg(short, long)]
        site: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SiteCommands {
    /// Create a site record from a blueprint
    Create {
        /// Display name; the slug is derived from it
        #[arg(long)]
        name: String,

        /// Blueprint to provision the site with (default: empty blueprint)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Storage backend: none, opfs, local-fs
        #[arg(long, default_value = "none", value_parser = parse_storage)]
        storage: types::StorageKind,

        /// Local directory to grant (required for local-fs)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },
}

fn parse_storage(s: &str) -> Result<types::StorageKind, String> {
    match s {
        "none" => Ok(types::StorageKind::None),
        "opfs" => Ok(types::StorageKind::Opfs),
        "local-fs" => Ok(types::StorageKind::LocalFs),
        other => Err(format!(
            "unknown storage '{}' (expected none, opfs, local-fs)",
            other
        )),
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Compile { file } => cmd_compile(&file),
        Commands::Apply {
            file,
            root,
            site,
            state_dir,
        } => cmd_apply(&file, &root, &site, &state_dir),
        Commands::Site {
            command:
                SiteCommands::Create {
                    name,
                    file,
                    storage,
                    dir,
                    state_dir,
                },
        } => cmd_site_create(&name, file.as_deref(), storage, dir.as_deref(), &state_dir),
        Commands::Boot {
            site,
            workdir,
            opfs_root,
            state_dir,
        } => cmd_boot(&site, workdir.as_deref(), &opfs_root, &state_dir),
        Commands::Status { state_dir, site } => cmd_status(&state_dir, site.as_deref()),
    }
}

fn async_runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start async runtime: {}", e))
}

fn default_resolver() -> Result<ResourceResolver, String> {
    ResourceResolver::from_config(&ResolverConfig::default()).map_err(|e| e.to_string())
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let blueprint_path = path.join("blueprint.json");
    if blueprint_path.exists() {
        return Err(format!("{} already exists", blueprint_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let template = r#"{
  "preferredVersions": { "php": "latest", "wp": "latest" },
  "phpExtensionBundles": ["kitchen-sink"],
  "steps": [
    {
      "step": "installPlugin",
      "pluginZipFile": { "resource": "wordpress.org/plugins", "slug": "hello-dolly" },
      "options": { "activate": true, "ifAlreadyInstalled": "skip" }
    }
  ]
}
"#;
    std::fs::write(&blueprint_path, template)
        .map_err(|e| format!("cannot write {}: {}", blueprint_path.display(), e))?;

    println!("Initialized wpforge project at {}", path.display());
    println!("  Created: {}", blueprint_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

/// Parse, compile and validate a blueprint file, reporting every error.
fn parse_and_validate(file: &Path) -> Result<types::Manifest, String> {
    let blueprint = compiler::parse_blueprint_file(file).map_err(|e| e.to_string())?;
    let manifest = compiler::compile(&blueprint);
    let errors = compiler::validate_manifest(&manifest);
    if errors.is_empty() {
        return Ok(manifest);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let manifest = parse_and_validate(file)?;
    println!(
        "OK: {} (php {}, wp {}, {} steps)",
        file.display(),
        manifest.versions.php,
        manifest.versions.wp,
        manifest.steps.len()
    );
    Ok(())
}

fn cmd_compile(file: &Path) -> Result<(), String> {
    let blueprint = compiler::parse_blueprint_file(file).map_err(|e| e.to_string())?;
    let manifest = compiler::compile(&blueprint);
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| format!("JSON serialize error: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn print_caption(caption: &str) {
    println!("  .. {}", caption);
}

fn cmd_apply(file: &Path, root: &Path, site: &str, state_dir: &Path) -> Result<(), String> {
    let manifest = parse_and_validate(file)?;
    std::fs::create_dir_all(root)
        .map_err(|e| format!("cannot create {}: {}", root.display(), e))?;

    let runtime = HostRuntime::new(root);
    let resolver = default_resolver()?;
    let observer = print_caption;
    let cfg = interpreter::RunConfig {
        manifest: &manifest,
        runtime: &runtime,
        resolver: &resolver,
        observer: Some(&observer),
        event_log: Some(interpreter::EventLog { state_dir, site }),
    };

    let report = async_runtime()?
        .block_on(interpreter::run(&cfg))
        .map_err(|e| e.to_string())?;
    print_run_report(&report);

    let failures = report.activation_failures();
    println!();
    if !failures.is_empty() {
        println!(
            "Apply completed with errors: {} step(s), {} activation FAILED",
            report.results.len(),
            failures.len()
        );
        return Err(format!("{} activation(s) failed", failures.len()));
    }
    println!(
        "Apply complete: {} step(s) ({:.1}s).",
        report.results.len(),
        report.total_duration.as_secs_f64()
    );
    Ok(())
}

fn print_run_report(report: &types::RunReport) {
    for r in &report.results {
        let detail = match &r.install {
            Some(o) => format!(
                " {} {} [{}]",
                o.disposition, o.result.asset_folder_path, o.result.asset_folder_name
            ),
            None => String::new(),
        };
        let activation = match &r.activation {
            types::ActivationStatus::NotRequested => String::new(),
            types::ActivationStatus::Activated => " (activated)".to_string(),
            types::ActivationStatus::Failed { reason } => format!(" (activation FAILED: {})", reason),
        };
        println!(
            "  [{}] {}:{}{} ({:.2}s)",
            r.index,
            r.step,
            detail,
            activation,
            r.duration.as_secs_f64()
        );
    }
}

fn cmd_site_create(
    name: &str,
    file: Option<&Path>,
    storage: types::StorageKind,
    dir: Option<&Path>,
    state_dir: &Path,
) -> Result<(), String> {
    let blueprint = match file {
        Some(f) => compiler::parse_blueprint_file(f).map_err(|e| e.to_string())?,
        None => types::Blueprint::default(),
    };
    let site = state::new_site(name, blueprint, storage);
    if state::load_site(state_dir, &site.slug)?.is_some() {
        return Err(format!("site {} already exists", site.slug));
    }

    match (storage, dir) {
        (types::StorageKind::LocalFs, Some(dir)) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
            state::register_handle(state_dir, &site.slug, dir)?;
        }
        (types::StorageKind::LocalFs, None) => {
            return Err("local-fs storage requires --dir".to_string());
        }
        (_, Some(_)) => {
            return Err("--dir is only valid with --storage local-fs".to_string());
        }
        (_, None) => {}
    }

    state::save_site(state_dir, &site)?;
    println!("Created site {} ({})", site.slug, site.name);
    println!("  Storage: {}", site.storage);
    println!(
        "  Runtime: php {}, wp {}",
        site.runtime_configuration.preferred_versions.php,
        site.runtime_configuration.preferred_versions.wp
    );
    Ok(())
}

fn cmd_boot(
    slug: &str,
    workdir: Option<&Path>,
    opfs_root: &Path,
    state_dir: &Path,
) -> Result<(), String> {
    let site = state::load_site(state_dir, slug)?
        .ok_or_else(|| format!("no site {} in {}", slug, state_dir.display()))?;
    let workdir = workdir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| state_dir.join(&site.slug).join("www"));
    std::fs::create_dir_all(&workdir)
        .map_err(|e| format!("cannot create {}: {}", workdir.display(), e))?;

    let runtime = HostRuntime::new(&workdir);
    let devices = HostDevices::new(opfs_root, state_dir);
    let resolver = default_resolver()?;
    let observer = print_caption;
    let cfg = storage::BootConfig {
        site: &site,
        runtime: &runtime,
        devices: &devices,
        resolver: &resolver,
        observer: Some(&observer),
        state_dir: Some(state_dir),
    };

    println!("Booting {} [{}]...", site.slug, site.storage);
    let report = async_runtime()?
        .block_on(storage::boot(&cfg))
        .map_err(|e| e.to_string())?;

    match &report.run {
        Some(run) => {
            print_run_report(run);
            println!(
                "Booted {}: provisioned ({} step(s), {} activation failure(s)).",
                site.slug,
                run.results.len(),
                run.activation_failures().len()
            );
        }
        None => println!(
            "Booted {} from existing installation ({} files).",
            site.slug, report.files_loaded
        ),
    }
    if report.environment.mount.is_some() {
        println!("  Persisted: {} files", report.files_persisted);
    }
    Ok(())
}

fn cmd_status(state_dir: &Path, site_filter: Option<&str>) -> Result<(), String> {
    let sites = state::list_sites(state_dir)?;
    let mut found = false;

    for site in &sites {
        if let Some(filter) = site_filter {
            if site.slug != filter {
                continue;
            }
        }
        found = true;
        println!("Site: {} ({})", site.slug, site.name);
        println!("  Created: {}", site.when_created);
        println!("  Storage: {}", site.storage);
        println!(
            "  Runtime: php {}, wp {}",
            site.runtime_configuration.preferred_versions.php,
            site.runtime_configuration.preferred_versions.wp
        );
        println!("  Steps:   {}", site.original_blueprint.steps.len());

        let events = eventlog::read_events(state_dir, &site.slug)?;
        let last_run = events.iter().rev().find_map(|e| match &e.event {
            types::ProvenanceEvent::RunCompleted {
                steps_completed,
                activation_failures,
                total_seconds,
                ..
            } => Some(format!(
                "{}: {} step(s), {} activation failure(s) ({:.2}s)",
                e.ts, steps_completed, activation_failures, total_seconds
            )),
            types::ProvenanceEvent::StepFailed { index, error, .. } => {
                Some(format!("{}: FAILED at step {}: {}", e.ts, index, error))
            }
            _ => None,
        });
        if let Some(last) = last_run {
            println!("  Last run: {}", last);
        }
        println!();
    }

    if !found {
        println!("No sites found. Run `wpforge site create` first.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LITERAL_BLUEPRINT: &str = r#"{
        "steps": [
            {"step": "mkdir", "path": "wp-content/uploads"},
            {"step": "writeFile", "path": "wp-content/uploads/hello.txt",
             "data": {"resource": "literal", "name": "hello.txt", "contents": "aGVsbG8="}}
        ]
    }"#;

    #[test]
    fn test_wf017_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("test-project");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("blueprint.json").exists());
        assert!(sub.join("state").is_dir());
        cmd_validate(&sub.join("blueprint.json")).unwrap();
    }

    #[test]
    fn test_wf017_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blueprint.json"), "{}").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_wf017_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blueprint.json");
        std::fs::write(&file, r#"{"steps":[{"step":"installTheme"},{"step":"runPHP"}]}"#).unwrap();
        let err = cmd_validate(&file).unwrap_err();
        assert_eq!(err, "2 validation error(s)");
    }

    #[test]
    fn test_wf017_validate_unparseable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blueprint.json");
        std::fs::write(&file, "{ nope").unwrap();
        assert!(cmd_validate(&file).unwrap_err().contains("parse error"));
    }

    #[test]
    fn test_wf017_compile() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blueprint.yaml");
        std::fs::write(&file, "preferredVersions:\n  php: \"8.1\"\n").unwrap();
        cmd_compile(&file).unwrap();
    }

    #[test]
    fn test_wf017_parse_storage() {
        assert_eq!(parse_storage("local-fs"), Ok(types::StorageKind::LocalFs));
        assert_eq!(parse_storage("none"), Ok(types::StorageKind::None));
        assert!(parse_storage("s3").is_err());
    }

    #[test]
    fn test_wf017_apply_literal_steps() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blueprint.json");
        std::fs::write(&file, LITERAL_BLUEPRINT).unwrap();
        let root = dir.path().join("www");
        let state = dir.path().join("state");
        dispatch(Commands::Apply {
            file,
            root: root.clone(),
            site: "local".to_string(),
            state_dir: state.clone(),
        })
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join("wp-content/uploads/hello.txt")).unwrap(),
            "hello"
        );
        assert!(state.join("local/events.jsonl").is_file());
    }

    #[test]
    fn test_wf017_site_create_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        dispatch(Commands::Site {
            command: SiteCommands::Create {
                name: "My Blog".to_string(),
                file: None,
                storage: types::StorageKind::Opfs,
                dir: None,
                state_dir: state.clone(),
            },
        })
        .unwrap();
        let site = state::load_site(&state, "my-blog").unwrap().unwrap();
        assert_eq!(site.storage, types::StorageKind::Opfs);

        let again = cmd_site_create("My Blog", None, types::StorageKind::None, None, &state);
        assert!(again.unwrap_err().contains("already exists"));

        cmd_status(&state, None).unwrap();
        cmd_status(&state, Some("my-blog")).unwrap();
        cmd_status(&state, Some("nonexistent")).unwrap();
    }

    #[test]
    fn test_wf017_site_create_local_fs_requires_dir() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        let err = cmd_site_create("L", None, types::StorageKind::LocalFs, None, &state).unwrap_err();
        assert!(err.contains("--dir"));

        let granted = dir.path().join("granted");
        cmd_site_create("L", None, types::StorageKind::LocalFs, Some(&granted), &state).unwrap();
        assert_eq!(state::load_handle(&state, "l").unwrap(), Some(granted.clone()));
        assert!(granted.is_dir());
    }

    #[test]
    fn test_wf017_boot_existing_installation() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        let opfs = dir.path().join("opfs");
        cmd_site_create("Blog", None, types::StorageKind::Opfs, None, &state).unwrap();
        std::fs::create_dir_all(opfs.join("site-blog/wp-content")).unwrap();
        std::fs::write(opfs.join("site-blog/wp-config.php"), "<?php").unwrap();
        std::fs::write(opfs.join("site-blog/wp-content/index.php"), "<?php").unwrap();

        let workdir = dir.path().join("www");
        dispatch(Commands::Boot {
            site: "blog".to_string(),
            workdir: Some(workdir.clone()),
            opfs_root: opfs.clone(),
            state_dir: state.clone(),
        })
        .unwrap();
        assert!(workdir.join("wp-config.php").is_file());
        assert!(workdir.join("wp-content/index.php").is_file());
        assert!(opfs.join("site-blog/wp-config.php").is_file());
        cmd_status(&state, Some("blog")).unwrap();
    }

    #[test]
    fn test_wf017_boot_unknown_site() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_boot("ghost", None, &dir.path().join("opfs"), dir.path()).unwrap_err();
        assert!(err.contains("no site ghost"));
    }

    #[test]
    fn test_wf017_status_empty() {
        let dir = tempfile::tempdir().unwrap();
        cmd_status(&dir.path().join("state"), None).unwrap();
    }
}
