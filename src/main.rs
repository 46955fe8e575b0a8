//! CLI entry point for the mirror tool.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mirror_core::download::PathLocks;
use mirror_core::{
    FileSystem, Hasher, HttpTransport, LocalFs, Manifest, QuarantinePolicy, SyncEngine,
    SyncOptions, SyncReport, Transport, Verifier,
};
use tracing::{debug, error, info, warn};

mod app_config;
mod cli;

use app_config::{FileConfig, LoadedConfig};
use cli::{Args, Command, SyncArgs};

/// Process outcome, mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    Success,
    Partial,
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::from(1),
            ProcessExit::Partial => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so `digest` output stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match run(args).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            error!("{e:#}");
            ProcessExit::Failure.into()
        }
    }
}

async fn run(args: Args) -> Result<ProcessExit> {
    let loaded = match args.config.as_deref() {
        Some(path) => app_config::load_explicit_file_config(path)?,
        None => app_config::load_default_file_config()?,
    };
    log_config_source(&loaded);
    let config = loaded.config;

    match args.command {
        Command::Sync(sync) => run_sync(&sync, &config).await,
        Command::Check { url, path } => run_check(&url, &path, &config).await,
        Command::Digest { paths } => Ok(run_digest(&paths).await),
    }
}

fn log_config_source(loaded: &LoadedConfig) {
    match (&loaded.path, loaded.loaded_from_file) {
        (Some(path), true) => debug!(path = %path.display(), "config loaded"),
        (Some(path), false) => debug!(path = %path.display(), "no config file, using defaults"),
        (None, _) => debug!("no config location known, using defaults"),
    }
}

fn build_transport(config: &FileConfig) -> Result<Arc<dyn Transport>> {
    let transport =
        HttpTransport::with_timeouts(config.connect_timeout_secs(), config.read_timeout_secs())
            .context("Failed to build HTTP client")?;
    Ok(Arc::new(transport))
}

/// CLI flags override file values.
fn sync_options(sync: &SyncArgs, config: &FileConfig) -> SyncOptions {
    let quarantine = sync
        .quarantine
        .as_deref()
        .or(config.quarantine_extension.as_deref());
    SyncOptions {
        verify_sizes: !sync.no_verify && config.verify_sizes.unwrap_or(true),
        compute_digests: sync.digests || config.compute_digests.unwrap_or(false),
        quarantine: QuarantinePolicy::from_extension(quarantine),
        concurrency: sync
            .concurrency
            .map_or_else(|| config.concurrency(), usize::from),
    }
}

async fn run_sync(sync: &SyncArgs, config: &FileConfig) -> Result<ProcessExit> {
    let raw = tokio::fs::read_to_string(&sync.manifest)
        .await
        .with_context(|| format!("Failed to read manifest '{}'", sync.manifest.display()))?;
    let manifest = Manifest::from_json(&raw)
        .with_context(|| format!("Failed to parse manifest '{}'", sync.manifest.display()))?;

    info!(
        entries = manifest.len(),
        dir = %sync.dir.display(),
        "Mirror starting"
    );

    let engine = SyncEngine::new(
        build_transport(config)?,
        Arc::new(LocalFs),
        config.host_fallbacks(),
        sync_options(sync, config),
    )?;
    let report = engine.sync_directory(&sync.dir, &manifest).await?;

    print_sync_report(&report);
    Ok(determine_exit_outcome(&report))
}

fn print_sync_report(report: &SyncReport) {
    for line in sync_report_lines(report) {
        println!("{line}");
    }
}

/// One line per entry outcome and per directory finding, then a summary.
fn sync_report_lines(report: &SyncReport) -> Vec<String> {
    use mirror_core::EntryStatus;

    let mut lines = Vec::new();
    for outcome in &report.outcomes {
        let name = &outcome.entry.filename;
        lines.push(match &outcome.status {
            EntryStatus::Downloaded { bytes, digest, .. } => {
                format!("downloaded  {name} ({bytes} bytes){}", digest_suffix(digest.as_ref()))
            }
            EntryStatus::UpToDate { digest } => {
                format!("up-to-date  {name}{}", digest_suffix(digest.as_ref()))
            }
            EntryStatus::Failed { error, .. } => format!("failed      {name}: {error}"),
            EntryStatus::Rejected { reason } => format!("rejected    {name:?}: {reason}"),
        });
    }

    let reconcile = &report.reconcile;
    for entry in &reconcile.quarantined {
        lines.push(format!("quarantined {} -> {}", entry.original, entry.renamed));
    }
    for name in &reconcile.unexpected {
        lines.push(format!("unexpected  {name}"));
    }
    for name in &reconcile.missing {
        lines.push(format!("missing     {name}"));
    }
    for name in &reconcile.temporary {
        lines.push(format!("scratch     {name}"));
    }
    for failure in &reconcile.rename_failures {
        lines.push(format!(
            "unrenamed   {} -> {}: {}",
            failure.from.display(),
            failure.to.display(),
            failure.reason
        ));
    }
    lines.push(format!(
        "{} downloaded, {} up to date, {} failed, {} rejected, {} quarantined, {} missing",
        report.downloaded(),
        report.up_to_date(),
        report.failed(),
        report.rejected(),
        reconcile.quarantined.len(),
        reconcile.missing.len()
    ));
    lines
}

fn digest_suffix(digest: Option<&mirror_core::DigestOutcome>) -> String {
    match digest {
        Some(mirror_core::DigestOutcome::Computed(digest)) => format!(" sha256={digest}"),
        Some(mirror_core::DigestOutcome::Unavailable { .. }) => " sha256=unavailable".to_string(),
        None => String::new(),
    }
}

/// Maps a sync report to the process exit outcome.
fn determine_exit_outcome(report: &SyncReport) -> ProcessExit {
    let completed = report.downloaded() + report.up_to_date();
    let failed = report.failed() + report.rejected();
    if failed == 0 {
        ProcessExit::Success
    } else if completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

async fn run_check(url: &str, path: &Path, config: &FileConfig) -> Result<ProcessExit> {
    let verifier = Verifier::new(
        build_transport(config)?,
        Arc::new(LocalFs),
        Arc::new(PathLocks::new()),
    );
    let comparison = verifier.compare(url, path).await?;

    let show = |size: Option<u64>| size.map_or_else(|| "unknown".to_string(), |n| n.to_string());
    println!("local:  {}", show(comparison.local_size));
    println!("remote: {}", show(comparison.remote_size));
    println!("equal:  {}", comparison.equal);

    Ok(if comparison.equal {
        ProcessExit::Success
    } else {
        ProcessExit::Partial
    })
}

async fn run_digest(paths: &[std::path::PathBuf]) -> ProcessExit {
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFs);
    let hasher = Hasher::new(fs);
    let mut failed = 0_usize;

    for path in paths {
        match hasher.digest(path).await {
            Ok(digest) => println!("{digest}  {}", path.display()),
            Err(e) => {
                warn!(error = %e, "digest failed");
                failed += 1;
            }
        }
    }

    if failed == 0 {
        ProcessExit::Success
    } else {
        ProcessExit::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::reconcile::ReconcileReport;
    use mirror_core::{EntryOutcome, EntryStatus, ManifestEntry, TransferErrorKind};

    fn report_of(statuses: Vec<EntryStatus>) -> SyncReport {
        SyncReport {
            outcomes: statuses
                .into_iter()
                .map(|status| EntryOutcome {
                    entry: ManifestEntry::new("http://example.com/a", "a"),
                    destination: None,
                    status,
                })
                .collect(),
            reconcile: ReconcileReport::default(),
        }
    }

    fn failed() -> EntryStatus {
        EntryStatus::Failed {
            kind: TransferErrorKind::HttpStatus(404),
            error: "404".to_string(),
        }
    }

    #[test]
    fn test_exit_outcome_success_when_no_failures() {
        let report = report_of(vec![EntryStatus::UpToDate { digest: None }]);
        assert_eq!(determine_exit_outcome(&report), ProcessExit::Success);
        assert_eq!(determine_exit_outcome(&report_of(vec![])), ProcessExit::Success);
    }

    #[test]
    fn test_exit_outcome_partial_when_mixed() {
        let report = report_of(vec![EntryStatus::UpToDate { digest: None }, failed()]);
        assert_eq!(determine_exit_outcome(&report), ProcessExit::Partial);
    }

    #[test]
    fn test_exit_outcome_failure_when_all_failed() {
        let report = report_of(vec![
            failed(),
            EntryStatus::Rejected {
                reason: "unsafe".to_string(),
            },
        ]);
        assert_eq!(determine_exit_outcome(&report), ProcessExit::Failure);
    }

    #[test]
    fn test_report_lines_include_missing_and_scratch_entries() {
        let mut report = report_of(vec![failed()]);
        report.reconcile = ReconcileReport {
            unexpected: vec!["stray.txt".to_string()],
            missing: vec!["a".to_string()],
            temporary: vec!["b.jpg.tmp".to_string()],
            ..ReconcileReport::default()
        };

        let lines = sync_report_lines(&report);

        assert_eq!(lines[0], "failed      a: 404");
        assert!(lines.contains(&"unexpected  stray.txt".to_string()));
        assert!(lines.contains(&"missing     a".to_string()));
        assert!(lines.contains(&"scratch     b.jpg.tmp".to_string()));
        assert_eq!(
            lines.last().unwrap(),
            "0 downloaded, 0 up to date, 1 failed, 0 rejected, 0 quarantined, 1 missing"
        );
    }

    #[test]
    fn test_cli_flags_override_config() {
        let args = Args::try_parse_from([
            "mirror", "sync", "-m", "m.json", "-d", "out", "--no-verify", "-c", "2",
            "--quarantine", "cli",
        ])
        .unwrap();
        let Command::Sync(sync) = args.command else {
            panic!("expected sync");
        };
        let config = FileConfig {
            concurrency: Some(16),
            quarantine_extension: Some("file".to_string()),
            verify_sizes: Some(true),
            compute_digests: Some(true),
            ..FileConfig::default()
        };

        let options = sync_options(&sync, &config);

        assert!(!options.verify_sizes);
        assert!(options.compute_digests);
        assert_eq!(options.concurrency, 2);
        assert_eq!(options.quarantine.unwrap().extension(), "cli");
    }

    #[test]
    fn test_config_supplies_defaults() {
        let args = Args::try_parse_from(["mirror", "sync", "-m", "m.json", "-d", "out"]).unwrap();
        let Command::Sync(sync) = args.command else {
            panic!("expected sync");
        };
        let config = FileConfig {
            concurrency: Some(16),
            quarantine_extension: Some("file".to_string()),
            ..FileConfig::default()
        };

        let options = sync_options(&sync, &config);

        assert!(options.verify_sizes);
        assert!(!options.compute_digests);
        assert_eq!(options.concurrency, 16);
        assert_eq!(options.quarantine.unwrap().extension(), "file");
    }
}
