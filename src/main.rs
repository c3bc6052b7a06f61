//! depbuild - Main entry point
//!
//! Loads the unit manifest, builds the command line from it, then drives the
//! pipeline against the completion record of the working root.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use depbuild::builder::UnitKind;
use depbuild::cli;
use depbuild::manifest::{egg_key, Manifest};
use depbuild::pipeline::{Pipeline, RunReport};
use depbuild::process_guard::{self, ProcessGuard};
use depbuild::{
    BuildEnv, BuildError, BuilderRegistry, HttpFetcher, Layout, StateSession, StateStore,
};

/// Initialize the tracing subscriber; RUST_LOG overrides the default `info`
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logger();

    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    // Build commands are stopped on SIGINT/SIGTERM and the record is still saved
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();
    debug!("Signal handlers initialized");

    let args: Vec<String> = std::env::args().collect();
    let manifest_path = cli::manifest_path_hint(&args);
    let manifest = match Manifest::load_from_file(&manifest_path) {
        Ok(manifest) => manifest,
        Err(e) => {
            // --help and --version must work without a manifest
            if let Err(clap_err) = cli::parse_invocation(&[], &args) {
                if matches!(
                    clap_err.kind(),
                    ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
                ) {
                    clap_err.exit();
                }
            }
            return Err(e);
        }
    };

    let units: Vec<(String, UnitKind)> = manifest
        .projects
        .iter()
        .map(|p| (p.name.clone(), UnitKind::Project))
        .chain(manifest.eggs.iter().map(|e| (egg_key(&e.name), UnitKind::Egg)))
        .collect();
    let invocation = match cli::parse_invocation(&units, &args) {
        Ok(invocation) => invocation,
        Err(e) => e.exit(),
    };
    let options = invocation.cli;

    let registry = BuilderRegistry::from_manifest(&manifest)?;
    let mut pipeline = Pipeline::new(&registry)
        .with_forced(invocation.forced)
        .with_dry_run(options.dry_run);
    if !options.only.is_empty() {
        pipeline = pipeline.with_only(options.only.clone());
    }
    pipeline.validate()?;

    let wdr = std::path::absolute(&options.wdr)
        .with_context(|| format!("Invalid working directory {:?}", options.wdr))?;
    let layout = Layout::for_platform(&wdr);
    info!("Working root: {}", layout.root().display());

    let fetcher = HttpFetcher::new()?;
    let mut env = BuildEnv::new(layout, options.build_options(), Box::new(fetcher));

    if options.dry_run {
        let mut state = StateStore::load(env.layout.state_file());
        let report = pipeline.run(&mut env, &mut state)?;
        print_summary(&report);
        return Ok(ExitCode::SUCCESS);
    }

    env.prepare()?;
    std::env::set_current_dir(env.root())
        .with_context(|| format!("Cannot enter {}", env.root().display()))?;

    let mut session = StateSession::open(env.layout.state_file());
    let result = pipeline.run(&mut env, &mut session);
    if let Err(e) = session.close() {
        error!("Failed to save completion record: {}", e);
    }

    match result {
        Ok(report) => {
            print_summary(&report);
            Ok(ExitCode::SUCCESS)
        }
        Err(BuildError::Interrupted) => {
            eprintln!("✗ Interrupted, progress saved");
            Ok(ExitCode::from(130))
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_summary(report: &RunReport) {
    let verb = if report.dry_run { "would run" } else { "ran" };
    for unit in &report.units {
        let ran = unit.ran();
        if ran.is_empty() {
            println!("  {:<20} nothing to do", unit.key);
        } else {
            println!("  {:<20} {} {}", unit.key, verb, ran);
        }
    }

    let pending = report.pending();
    if !pending.is_empty() {
        println!("⚠ Deferred steps remain for: {}", pending.join(", "));
    }
    let abandoned = report.abandoned();
    if !abandoned.is_empty() {
        println!("⚠ Abandoned after failure: {}", abandoned.join(", "));
    }
    if !report.dry_run {
        println!("✓ Build run complete");
    }
}
